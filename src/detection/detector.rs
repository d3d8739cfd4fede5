//! Anomaly Detector
//!
//! Isolation Forest を保持する異常検知器。学習前のスコア計算は
//! [`Error::NotFitted`] で失敗する。

use super::forest::{FittedForest, ForestParams, IsolationForest};
use crate::error::{Error, Result};
use ndarray::{Array1, ArrayView2};
use tracing::{info, warn};

/// 学習データ確認用フォレストの異常割合
const TRAINING_CHECK_CONTAMINATION: f64 = 0.05;

/// 異常検知器
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    /// パラメータ
    params: ForestParams,
    /// 学習済みモデル
    model: Option<FittedForest>,
}

impl AnomalyDetector {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            model: None,
        }
    }

    /// 正常期間のデータでモデルを学習（再学習時は既存モデルを破棄）
    pub fn train(&mut self, training: ArrayView2<'_, f64>) -> Result<()> {
        info!(
            "Training anomaly detection model on {} rows, {} features",
            training.nrows(),
            training.ncols()
        );
        self.model = None;

        // 学習データ中の異常候補を確認（本番モデルには影響しない）
        let check = IsolationForest::new(ForestParams {
            contamination: TRAINING_CHECK_CONTAMINATION,
            random_seed: self.params.random_seed,
            ..ForestParams::default()
        })
        .fit(training)?;
        let suspicious = check.predict(training)?.iter().filter(|&&p| p == -1).count();
        if suspicious > 0 {
            warn!(
                "Found {} potential anomalies in training data. Proceeding with training.",
                suspicious
            );
        }

        let model = IsolationForest::new(self.params.clone()).fit(training)?;
        info!(
            "Model training completed (trees={}, subsample={}, offset={:.4})",
            model.trees().len(),
            model.subsample_size(),
            model.offset()
        );
        self.model = Some(model);
        Ok(())
    }

    /// 学習済みモデル
    pub fn model(&self) -> Result<&FittedForest> {
        self.model.as_ref().ok_or_else(|| {
            Error::NotFitted("Model must be trained before prediction".to_string())
        })
    }

    /// 決定関数の値（低いほど異常）
    pub fn score(&self, data: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        self.model()?.decision_function(data)
    }

    /// 1 = 正常, -1 = 異常
    pub fn predict(&self, data: ArrayView2<'_, f64>) -> Result<Array1<i8>> {
        self.model()?.predict(data)
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }
}
