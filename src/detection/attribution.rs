//! Feature Attribution
//!
//! 摂動による特徴量寄与度。各特徴量を説明対象行列の列平均に置き換えたときの
//! 決定関数の変化量（ベースライン − 摂動後）を寄与度とする。

use super::detector::AnomalyDetector;
use crate::error::Result;
use ndarray::{Array2, ArrayView2, Axis};
use tracing::debug;

/// 寄与度計算器
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureAttributor;

impl FeatureAttributor {
    pub fn new() -> Self {
        Self
    }

    /// 寄与度行列（行 × 特徴量）を計算
    ///
    /// 特徴量ごとに1回ずつ全行のスコアを再計算する。結果はキャッシュしない。
    pub fn attribute(
        &self,
        detector: &AnomalyDetector,
        data: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>> {
        let baseline = detector.score(data)?;
        let (n_rows, n_features) = data.dim();
        let mut contributions = Array2::zeros((n_rows, n_features));

        let mut perturbed = data.to_owned();
        for feature in 0..n_features {
            let original = data.column(feature);
            let mean = original.mean().unwrap_or(0.0);

            perturbed.column_mut(feature).fill(mean);
            let perturbed_scores = detector.score(perturbed.view())?;
            perturbed.column_mut(feature).assign(&original);

            contributions
                .column_mut(feature)
                .assign(&(&baseline - &perturbed_scores));
        }

        debug!(
            "Computed feature contributions for {} rows x {} features",
            n_rows, n_features
        );
        Ok(contributions)
    }

    /// 全特徴量を同時に列平均へ置き換えたときのスコア
    pub fn neutralized_scores(
        &self,
        detector: &AnomalyDetector,
        data: ArrayView2<'_, f64>,
    ) -> Result<ndarray::Array1<f64>> {
        let means = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| ndarray::Array1::zeros(data.ncols()));
        let neutral = Array2::from_shape_fn(data.dim(), |(_, c)| means[c]);
        detector.score(neutral.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::forest::ForestParams;
    use crate::error::Error;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand::distributions::Distribution;
    use statrs::distribution::Normal;

    fn trained_detector() -> AnomalyDetector {
        let mut rng = StdRng::seed_from_u64(3);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let training = Array2::from_shape_simple_fn((300, 3), || normal.sample(&mut rng));
        let mut detector = AnomalyDetector::new(ForestParams::default());
        detector.train(training.view()).unwrap();
        detector
    }

    #[test]
    fn test_attribute_requires_training() {
        let detector = AnomalyDetector::new(ForestParams::default());
        let data = Array2::<f64>::zeros((4, 3));
        assert!(matches!(
            FeatureAttributor::new().attribute(&detector, data.view()),
            Err(Error::NotFitted(_))
        ));
    }

    #[test]
    fn test_outlying_feature_dominates() {
        let detector = trained_detector();
        let mut data = Array2::<f64>::zeros((20, 3));
        for r in 0..20 {
            data[[r, 0]] = (r as f64 - 10.0) / 10.0;
            data[[r, 2]] = (10.0 - r as f64) / 12.0;
        }
        data[[5, 1]] = 9.0;

        let contributions = FeatureAttributor::new()
            .attribute(&detector, data.view())
            .unwrap();
        assert_eq!(contributions.dim(), (20, 3));

        let row = contributions.row(5);
        assert!(row[1].abs() > row[0].abs());
        assert!(row[1].abs() > row[2].abs());
        // 異常値を平均へ戻すとスコアが上がる（= 寄与度は負）
        assert!(row[1] < 0.0);
    }

    #[test]
    fn test_constant_column_has_zero_contribution() {
        let detector = trained_detector();
        let mut data = Array2::<f64>::zeros((10, 3));
        for r in 0..10 {
            data[[r, 0]] = r as f64 / 5.0 - 1.0;
            data[[r, 1]] = 0.25;
        }

        let contributions = FeatureAttributor::new()
            .attribute(&detector, data.view())
            .unwrap();
        assert!(contributions.column(1).iter().all(|&c| c == 0.0));
        assert!(contributions.column(2).iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_neutralizing_moves_anomaly_toward_normal() {
        let detector = trained_detector();
        let mut data = Array2::<f64>::zeros((30, 3));
        for r in 0..30 {
            data[[r, 0]] = ((r % 5) as f64 - 2.0) / 3.0;
        }
        data[[7, 2]] = 10.0;

        let baseline = detector.score(data.view()).unwrap();
        let neutral = FeatureAttributor::new()
            .neutralized_scores(&detector, data.view())
            .unwrap();
        assert!(neutral[7] > baseline[7]);
    }
}
