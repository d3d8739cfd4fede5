//! Feature Matrix
//!
//! テーブルから固定幅の数値行列を作成します。
//!
//! - 非有限値（NaN, ±Inf）はスケーリング前に 0.0 に置換
//! - 学習期間で一定の列は除外
//! - 学習期間の平均・標準偏差で標準化（分析期間では再計算しない）

use crate::error::{Error, Result};
use crate::table::TimeSeriesTable;
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// 特徴量（学習期間の統計量付き）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// 特徴量名
    pub name: String,
    /// 学習期間の平均
    pub mean: f64,
    /// 学習期間の標準偏差（常に正）
    pub std_dev: f64,
}

/// 標準化済みの特徴量行列
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    names: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }
}

/// 特徴量行列ビルダー
#[derive(Debug, Clone)]
pub struct FeatureMatrixBuilder {
    min_training_rows: usize,
}

impl FeatureMatrixBuilder {
    pub fn new(min_training_rows: usize) -> Self {
        Self { min_training_rows }
    }

    /// 学習期間のテーブルから統計量を計算し、標準化した行列を返す
    pub fn fit(&self, table: &TimeSeriesTable) -> Result<(FeatureScaler, FeatureMatrix)> {
        if table.len() < self.min_training_rows {
            return Err(Error::Validation(format!(
                "Insufficient training data: {} rows, minimum required: {}",
                table.len(),
                self.min_training_rows
            )));
        }

        let raw = nan_to_num(table.values());
        let mut columns = Vec::new();
        let mut features = Vec::new();

        for (idx, (name, column)) in table
            .feature_names()
            .iter()
            .zip(raw.axis_iter(Axis(1)))
            .enumerate()
        {
            let (lo, hi) = column
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            if lo >= hi {
                warn!("Removing constant feature: {}", name);
                continue;
            }

            let mean = column.mean().unwrap_or(0.0);
            let std_dev = column.std(0.0);
            debug!("Feature {}: mean={:.4}, std={:.4}", name, mean, std_dev);

            columns.push(idx);
            features.push(Feature {
                name: name.clone(),
                mean,
                std_dev,
            });
        }

        if features.is_empty() {
            return Err(Error::Validation(
                "No feature with non-zero variance in the training window".to_string(),
            ));
        }

        info!(
            "Fitted scaler on {} rows: {} features ({} dropped)",
            table.len(),
            features.len(),
            table.feature_names().len() - features.len()
        );

        let scaler = FeatureScaler {
            input_names: table.feature_names().to_vec(),
            columns,
            features,
        };
        let matrix = scaler.standardize(&raw);
        Ok((scaler, matrix))
    }
}

/// 学習済みスケーラー（不変）
///
/// 入力テーブルの列集合と、モデルに使う特徴量の順序を固定する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    input_names: Vec<String>,
    columns: Vec<usize>,
    features: Vec<Feature>,
}

impl FeatureScaler {
    /// モデルに使う特徴量（固定順序）
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    /// 学習時の統計量で標準化（統計量は再計算しない）
    pub fn transform(&self, table: &TimeSeriesTable) -> Result<FeatureMatrix> {
        let names = table.feature_names();
        let expected: HashSet<&str> = self.input_names.iter().map(String::as_str).collect();
        let actual: HashSet<&str> = names.iter().map(String::as_str).collect();

        if expected != actual {
            let mut missing: Vec<&str> = expected.difference(&actual).copied().collect();
            let mut unexpected: Vec<&str> = actual.difference(&expected).copied().collect();
            missing.sort_unstable();
            unexpected.sort_unstable();
            return Err(Error::Validation(format!(
                "Feature set mismatch: missing {:?}, unexpected {:?}",
                missing, unexpected
            )));
        }

        // 列順が学習時と異なる場合は名前で対応付ける
        let position: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let reordered: Vec<usize> = self
            .input_names
            .iter()
            .map(|n| position[n.as_str()])
            .collect();

        let raw = nan_to_num(table.values());
        let aligned = raw.select(Axis(1), &reordered);
        Ok(self.standardize(&aligned))
    }

    fn standardize(&self, raw: &Array2<f64>) -> FeatureMatrix {
        let mut values = raw.select(Axis(1), &self.columns);
        for (mut column, feature) in values.axis_iter_mut(Axis(1)).zip(&self.features) {
            column.mapv_inplace(|x| (x - feature.mean) / feature.std_dev);
        }
        FeatureMatrix {
            names: self.feature_names(),
            values,
        }
    }
}

/// NaN と ±Inf を 0.0 に置換
pub fn nan_to_num(values: ArrayView2<'_, f64>) -> Array2<f64> {
    values.mapv(|x| if x.is_finite() { x } else { 0.0 })
}
