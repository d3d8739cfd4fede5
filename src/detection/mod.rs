//! Multivariate time-series anomaly detection
//!
//! 正常期間で学習した Isolation Forest による異常スコアリングと、
//! 摂動による特徴量寄与度の説明。
//!
//! ## 主要機能
//!
//! - **特徴量行列**: 一定列の除外、欠損・非有限値の置換、学習期間での標準化
//! - **Isolation Forest**: 正常期間で学習し、決定関数の値（低いほど異常）を返す
//! - **寄与度**: 各特徴量を列平均へ置き換えたときのスコア変化
//! - **スコア変換**: 0-100 のパーセンタイルスコアと上位7特徴量
//!
//! ## 使用例
//!
//! ```rust,no_run
//! use tsad_rs::config::DetectorConfig;
//! use tsad_rs::detection::AnomalyPipeline;
//! use tsad_rs::table::{CsvSource, TableSource};
//!
//! # fn example() -> tsad_rs::Result<()> {
//! let config = DetectorConfig::load(None)?;
//! let table = CsvSource::new("sensors.csv", &config.time_column).load()?;
//!
//! let annotated = AnomalyPipeline::new(config)?.run(&table)?;
//! for record in annotated.records().iter().filter(|r| r.score > 90.0) {
//!     println!("{} {:.1} {:?}", record.observation.timestamp, record.score, record.top_features);
//! }
//! # Ok(())
//! # }
//! ```

pub mod attribution;
pub mod detector;
pub mod features;
pub mod forest;
pub mod pipeline;
pub mod summary;
pub mod transform;

pub use attribution::FeatureAttributor;
pub use detector::AnomalyDetector;
pub use features::{Feature, FeatureMatrix, FeatureMatrixBuilder, FeatureScaler};
pub use forest::{FittedForest, ForestParams, IsolationForest, MaxSamples};
pub use pipeline::{run, AnomalyPipeline, PipelineStage};
pub use summary::RunSummary;
pub use transform::ScoreTransformer;

use crate::error::{Error, Result};
use crate::table::Observation;
use serde::{Deserialize, Serialize};

/// 出力する上位特徴量の数
pub const TOP_FEATURE_COUNT: usize = 7;

/// スコア列の名前
pub const SCORE_COLUMN: &str = "Abnormality_score";

/// 上位特徴量列の名前（rank は 1 始まり）
pub fn top_feature_column(rank: usize) -> String {
    format!("top_feature_{}", rank)
}

/// 出力列と衝突する入力列名か
pub fn is_reserved_column(name: &str) -> bool {
    name == SCORE_COLUMN || name.starts_with("top_feature_")
}

/// 出力列と同名の特徴量列を拒否
pub fn check_reserved_columns(feature_names: &[String]) -> Result<()> {
    let reserved: Vec<&str> = feature_names
        .iter()
        .map(String::as_str)
        .filter(|name| is_reserved_column(name))
        .collect();
    if !reserved.is_empty() {
        return Err(Error::Validation(format!(
            "Input columns collide with output columns: {:?}",
            reserved
        )));
    }
    Ok(())
}

/// 異常スコア付きの1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    /// 元の観測値
    pub observation: Observation,
    /// 決定関数の値（低いほど異常）
    pub raw_score: f64,
    /// 0-100 のスコア（高いほど異常）
    pub score: f64,
    /// 寄与度の大きい順の特徴量名（不足分は空文字列）
    pub top_features: [String; TOP_FEATURE_COUNT],
}

/// 異常スコア付きテーブル
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedTable {
    time_column: String,
    feature_names: Vec<String>,
    columns: Vec<String>,
    records: Vec<AnomalyRecord>,
}

impl AnnotatedTable {
    pub fn new(
        time_column: impl Into<String>,
        feature_names: Vec<String>,
        records: Vec<AnomalyRecord>,
    ) -> Self {
        let time_column = time_column.into();
        let mut columns = Vec::with_capacity(feature_names.len() + TOP_FEATURE_COUNT + 2);
        columns.push(time_column.clone());
        columns.extend(feature_names.iter().cloned());
        columns.push(SCORE_COLUMN.to_string());
        columns.extend((1..=TOP_FEATURE_COUNT).map(top_feature_column));

        Self {
            time_column,
            feature_names,
            columns,
            records,
        }
    }

    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    /// 元のテーブルの特徴量列
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// 出力列（時刻、特徴量、スコア、上位特徴量）
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[AnomalyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 0-100 スコアの列
    pub fn scores(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.score).collect()
    }

    /// 出力スキーマの確認
    pub fn validate_schema(&self) -> Result<()> {
        let mut missing = Vec::new();
        if !self.columns.iter().any(|c| c == SCORE_COLUMN) {
            missing.push(SCORE_COLUMN.to_string());
        }
        for rank in 1..=TOP_FEATURE_COUNT {
            let name = top_feature_column(rank);
            if !self.columns.contains(&name) {
                missing.push(name);
            }
        }
        if !missing.is_empty() {
            return Err(Error::Schema(format!(
                "Missing required columns: {:?}",
                missing
            )));
        }

        let top_columns = self
            .columns
            .iter()
            .filter(|c| c.starts_with("top_feature_"))
            .count();
        if top_columns != TOP_FEATURE_COUNT {
            return Err(Error::Schema(format!(
                "Expected {} top feature columns, found {}",
                TOP_FEATURE_COUNT, top_columns
            )));
        }
        Ok(())
    }
}
