//! Run summary
//!
//! 処理結果の概要（スコア範囲、分布、学習期間の統計、上位特徴量の出現回数）。

use super::AnnotatedTable;
use crate::error::Result;
use crate::table::TimeWindow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

/// スコア分布（normal ≤10, slight ≤30, moderate ≤60, significant ≤90, severe >90）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreDistribution {
    pub normal: usize,
    pub slight: usize,
    pub moderate: usize,
    pub significant: usize,
    pub severe: usize,
}

impl ScoreDistribution {
    fn record(&mut self, score: f64) {
        match score {
            s if s <= 10.0 => self.normal += 1,
            s if s <= 30.0 => self.slight += 1,
            s if s <= 60.0 => self.moderate += 1,
            s if s <= 90.0 => self.significant += 1,
            _ => self.severe += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingPeriodStats {
    pub mean: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCount {
    pub feature: String,
    pub count: usize,
}

/// 実行結果の概要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_rows: usize,
    pub score_range: ScoreRange,
    pub score_distribution: ScoreDistribution,
    pub training_period_stats: TrainingPeriodStats,
    /// 第1位の特徴量として現れた回数（多い順）
    pub top_features: Vec<FeatureCount>,
}

impl RunSummary {
    pub fn from_table(table: &AnnotatedTable, training_window: &TimeWindow) -> Self {
        let mut distribution = ScoreDistribution::default();
        let mut range = ScoreRange {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        };
        let mut training_sum = 0.0;
        let mut training_count = 0usize;
        let mut training_max = 0.0f64;
        let mut counts: HashMap<&str, usize> = HashMap::new();

        for record in table.records() {
            distribution.record(record.score);
            range.min = range.min.min(record.score);
            range.max = range.max.max(record.score);

            if training_window.contains(&record.observation.timestamp) {
                training_sum += record.score;
                training_max = training_max.max(record.score);
                training_count += 1;
            }

            let first = record.top_features[0].as_str();
            if !first.is_empty() {
                *counts.entry(first).or_insert(0) += 1;
            }
        }

        if table.is_empty() {
            range = ScoreRange { min: 0.0, max: 0.0 };
        }

        let training_period_stats = if training_count > 0 {
            TrainingPeriodStats {
                mean: training_sum / training_count as f64,
                max: training_max,
            }
        } else {
            TrainingPeriodStats::default()
        };

        let mut top_features: Vec<FeatureCount> = counts
            .into_iter()
            .map(|(feature, count)| FeatureCount {
                feature: feature.to_string(),
                count,
            })
            .collect();
        top_features.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.feature.cmp(&b.feature)));

        Self {
            total_rows: table.len(),
            score_range: range,
            score_distribution: distribution,
            training_period_stats,
            top_features,
        }
    }

    pub fn write_json<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{AnomalyRecord, TOP_FEATURE_COUNT};
    use crate::table::Observation;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn at(hour: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2004, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::hours(hour)
    }

    fn record(hour: i64, score: f64, first: &str) -> AnomalyRecord {
        let mut top_features: [String; TOP_FEATURE_COUNT] = Default::default();
        top_features[0] = first.to_string();
        AnomalyRecord {
            observation: Observation {
                timestamp: at(hour),
                values: vec![0.0],
            },
            raw_score: 0.0,
            score,
            top_features,
        }
    }

    #[test]
    fn test_summary_from_table() {
        let records = vec![
            record(0, 5.0, "a"),
            record(1, 25.0, "b"),
            record(2, 50.0, "a"),
            record(3, 80.0, "c"),
            record(4, 95.0, "b"),
            record(5, 100.0, "a"),
        ];
        let table = AnnotatedTable::new("Time", vec!["a".into(), "b".into(), "c".into()], records);
        let summary = RunSummary::from_table(&table, &TimeWindow::new(at(0), at(1)));

        assert_eq!(summary.total_rows, 6);
        assert_eq!(summary.score_range, ScoreRange { min: 5.0, max: 100.0 });
        assert_eq!(
            summary.score_distribution,
            ScoreDistribution {
                normal: 1,
                slight: 1,
                moderate: 1,
                significant: 1,
                severe: 2,
            }
        );
        assert_eq!(summary.training_period_stats.mean, 15.0);
        assert_eq!(summary.training_period_stats.max, 25.0);
        assert_eq!(summary.top_features[0].feature, "a");
        assert_eq!(summary.top_features[0].count, 3);
        assert_eq!(summary.top_features[1].feature, "b");
        assert_eq!(summary.top_features[2].feature, "c");
    }

    #[test]
    fn test_summary_json_uses_camel_case() {
        let table = AnnotatedTable::new("Time", vec!["a".into()], vec![record(0, 0.0, "a")]);
        let summary = RunSummary::from_table(&table, &TimeWindow::new(at(10), at(20)));

        let mut buf = Vec::new();
        summary.write_json(&mut buf).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        assert_eq!(json["totalRows"], 1);
        assert_eq!(json["trainingPeriodStats"]["mean"], 0.0);
        assert!(json["scoreDistribution"]["normal"].is_number());
    }
}
