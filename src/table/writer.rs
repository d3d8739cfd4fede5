//! CSV writer for annotated tables

use crate::detection::AnnotatedTable;
use crate::error::Result;
use std::io::Write;

/// 出力CSVのタイムスタンプ形式
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 異常スコア付きテーブルをCSVとして書き出す
///
/// 列順は時刻、元の特徴量、`Abnormality_score`、`top_feature_1..7`。
pub fn write_annotated_csv<W: Write>(table: &AnnotatedTable, writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(table.columns())?;

    let mut row: Vec<String> = Vec::with_capacity(table.columns().len());
    for record in table.records() {
        row.clear();
        row.push(
            record
                .observation
                .timestamp
                .format(TIMESTAMP_FORMAT)
                .to_string(),
        );
        row.extend(record.observation.values.iter().map(|v| v.to_string()));
        row.push(record.score.to_string());
        row.extend(record.top_features.iter().cloned());
        csv_writer.write_record(&row)?;
    }

    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{AnomalyRecord, TOP_FEATURE_COUNT};
    use crate::table::Observation;
    use chrono::NaiveDate;

    #[test]
    fn test_write_annotated_csv() {
        let mut top_features: [String; TOP_FEATURE_COUNT] = Default::default();
        top_features[0] = "pressure".to_string();
        let record = AnomalyRecord {
            observation: Observation {
                timestamp: NaiveDate::from_ymd_opt(2004, 1, 2)
                    .unwrap()
                    .and_hms_opt(3, 4, 5)
                    .unwrap(),
                values: vec![1.5, -2.0],
            },
            raw_score: -0.1,
            score: 87.5,
            top_features,
        };
        let table = AnnotatedTable::new(
            "Time",
            vec!["pressure".into(), "flow".into()],
            vec![record],
        );

        let mut buf = Vec::new();
        write_annotated_csv(&table, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next().unwrap(),
            "Time,pressure,flow,Abnormality_score,top_feature_1,top_feature_2,top_feature_3,\
             top_feature_4,top_feature_5,top_feature_6,top_feature_7"
        );
        assert_eq!(
            lines.next().unwrap(),
            "2004-01-02 03:04:05,1.5,-2,87.5,pressure,,,,,,"
        );
        assert!(lines.next().is_none());
    }
}
