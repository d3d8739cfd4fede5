//! Time-series table
//!
//! 時刻でソートされた多変量時系列データと、その入出力。
//!
//! ## 主要機能
//!
//! - **TimeSeriesTable**: 時刻列＋固定順序の数値特徴量列
//! - **TimeWindow**: 学習期間・分析期間の指定（両端を含む）
//! - **CSV入出力**: [`CsvSource`] による読み込みと [`write_annotated_csv`] による書き出し

pub mod loader;
pub mod writer;

pub use loader::CsvSource;
pub use writer::write_annotated_csv;

use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use ndarray::{s, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// 表データの供給元
///
/// 実装は時刻昇順・重複なし・固定された特徴量順序のテーブルを返すこと。
pub trait TableSource {
    /// テーブルを読み込む
    fn load(&self) -> Result<TimeSeriesTable>;
}

/// 時刻範囲（両端を含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// 開始時刻
    pub start: NaiveDateTime,
    /// 終了時刻
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// 指定時刻が範囲内か
    pub fn contains(&self, timestamp: &NaiveDateTime) -> bool {
        *timestamp >= self.start && *timestamp <= self.end
    }
}

/// 1行分の観測値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// タイムスタンプ
    pub timestamp: NaiveDateTime,
    /// 特徴量の値（テーブルの特徴量順）
    pub values: Vec<f64>,
}

/// 時系列テーブル
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesTable {
    time_column: String,
    feature_names: Vec<String>,
    timestamps: Vec<NaiveDateTime>,
    values: Array2<f64>,
}

impl TimeSeriesTable {
    /// 新しいテーブルを作成
    ///
    /// タイムスタンプは厳密に昇順（重複なし）でなければならない。
    pub fn new(
        time_column: impl Into<String>,
        feature_names: Vec<String>,
        timestamps: Vec<NaiveDateTime>,
        values: Array2<f64>,
    ) -> Result<Self> {
        let (rows, cols) = values.dim();
        if rows != timestamps.len() {
            return Err(Error::Validation(format!(
                "Row count mismatch: {} timestamps, {} value rows",
                timestamps.len(),
                rows
            )));
        }
        if cols != feature_names.len() {
            return Err(Error::Validation(format!(
                "Column count mismatch: {} feature names, {} value columns",
                feature_names.len(),
                cols
            )));
        }
        let mut seen = std::collections::HashSet::with_capacity(cols);
        if let Some(dup) = feature_names.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(Error::Validation(format!("Duplicate feature column: {dup}")));
        }
        if let Some(pair) = timestamps.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::Validation(format!(
                "Timestamps must be strictly increasing: {} is followed by {}",
                pair[0], pair[1]
            )));
        }

        Ok(Self {
            time_column: time_column.into(),
            feature_names,
            timestamps,
            values,
        })
    }

    /// 観測値の列からテーブルを作成
    pub fn from_observations(
        time_column: impl Into<String>,
        feature_names: Vec<String>,
        observations: &[Observation],
    ) -> Result<Self> {
        let width = feature_names.len();
        if let Some(bad) = observations.iter().find(|o| o.values.len() != width) {
            return Err(Error::Validation(format!(
                "Observation at {} has {} values, expected {}",
                bad.timestamp,
                bad.values.len(),
                width
            )));
        }
        let flat: Vec<f64> = observations
            .iter()
            .flat_map(|o| o.values.iter().copied())
            .collect();
        let values = Array2::from_shape_vec((observations.len(), width), flat)
            .map_err(|e| Error::Validation(e.to_string()))?;
        let timestamps = observations.iter().map(|o| o.timestamp).collect();
        Self::new(time_column, feature_names, timestamps, values)
    }

    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// 指定列の値
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.feature_names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.values.column(idx))
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// i行目の観測値
    pub fn observation(&self, row: usize) -> Option<Observation> {
        self.timestamps.get(row).map(|&timestamp| Observation {
            timestamp,
            values: self.values.row(row).to_vec(),
        })
    }

    /// 時刻範囲に含まれる連続した行を切り出す
    pub fn select_window(&self, window: &TimeWindow) -> TimeSeriesTable {
        let start = self.timestamps.partition_point(|t| *t < window.start);
        let end = self.timestamps.partition_point(|t| *t <= window.end);
        let end = end.max(start);

        TimeSeriesTable {
            time_column: self.time_column.clone(),
            feature_names: self.feature_names.clone(),
            timestamps: self.timestamps[start..end].to_vec(),
            values: self.values.slice(s![start..end, ..]).to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use ndarray::array;

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2004, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn hourly(n: usize) -> Vec<NaiveDateTime> {
        (0..n).map(|i| base() + Duration::hours(i as i64)).collect()
    }

    #[test]
    fn test_rejects_unsorted_timestamps() {
        let mut ts = hourly(3);
        ts.swap(0, 1);
        let result = TimeSeriesTable::new(
            "Time",
            vec!["a".to_string()],
            ts,
            array![[1.0], [2.0], [3.0]],
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_rejects_duplicate_columns() {
        let result = TimeSeriesTable::new(
            "Time",
            vec!["a".to_string(), "a".to_string()],
            hourly(1),
            array![[1.0, 2.0]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_select_window_inclusive() {
        let table = TimeSeriesTable::new(
            "Time",
            vec!["a".to_string()],
            hourly(10),
            Array2::from_shape_fn((10, 1), |(i, _)| i as f64),
        )
        .unwrap();

        let window = TimeWindow::new(base() + Duration::hours(2), base() + Duration::hours(5));
        let selected = table.select_window(&window);
        assert_eq!(selected.len(), 4);
        assert_eq!(selected.values()[[0, 0]], 2.0);
        assert_eq!(selected.values()[[3, 0]], 5.0);

        let empty = table.select_window(&TimeWindow::new(
            base() + Duration::hours(20),
            base() + Duration::hours(30),
        ));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_from_observations() {
        let obs: Vec<Observation> = hourly(2)
            .into_iter()
            .enumerate()
            .map(|(i, timestamp)| Observation {
                timestamp,
                values: vec![i as f64, 10.0 + i as f64],
            })
            .collect();
        let table =
            TimeSeriesTable::from_observations("Time", vec!["a".into(), "b".into()], &obs).unwrap();
        assert_eq!(table.column("b").unwrap().to_vec(), vec![10.0, 11.0]);
        assert_eq!(table.observation(1), Some(obs[1].clone()));
    }
}
