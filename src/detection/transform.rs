//! Score Transformer
//!
//! 決定関数の値を 0-100 のスコアに変換し、寄与度行列から行ごとの上位特徴量を選ぶ。

use super::TOP_FEATURE_COUNT;
use ndarray::{Array1, ArrayView1, ArrayView2};

/// 上位特徴量の最小寄与度のデフォルト
pub const DEFAULT_MIN_CONTRIBUTION: f64 = 0.01;

/// スコア変換器
#[derive(Debug, Clone, Copy)]
pub struct ScoreTransformer {
    min_contribution: f64,
}

impl Default for ScoreTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONTRIBUTION)
    }
}

impl ScoreTransformer {
    pub fn new(min_contribution: f64) -> Self {
        Self { min_contribution }
    }

    /// パーセンタイル順位による 0-100 変換
    ///
    /// `100 - (バッチ内で s 以下の割合) × 100`。変換対象のバッチ自身を基準にするため、
    /// 異なるバッチ間でスコアは比較できない。同値のスコアは同じ値になる。
    pub fn transform_scores(&self, raw: ArrayView1<'_, f64>) -> Array1<f64> {
        let n = raw.len();
        if n == 0 {
            return Array1::zeros(0);
        }

        let mut sorted = raw.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        raw.mapv(|s| {
            let at_or_below = sorted.partition_point(|v| *v <= s);
            let percentile_rank = at_or_below as f64 * 100.0 / n as f64;
            (100.0 - percentile_rank).clamp(0.0, 100.0)
        })
    }

    /// 行ごとの上位特徴量名（常に TOP_FEATURE_COUNT 個、不足分は空文字列）
    pub fn top_features(
        &self,
        contributions: ArrayView2<'_, f64>,
        feature_names: &[String],
    ) -> Vec<[String; TOP_FEATURE_COUNT]> {
        contributions
            .rows()
            .into_iter()
            .map(|row| self.top_features_for_row(row, feature_names))
            .collect()
    }

    fn top_features_for_row(
        &self,
        row: ArrayView1<'_, f64>,
        feature_names: &[String],
    ) -> [String; TOP_FEATURE_COUNT] {
        let magnitudes: Vec<(usize, f64)> = row.iter().map(|c| c.abs()).enumerate().collect();

        let mut candidates: Vec<(usize, f64)> = magnitudes
            .iter()
            .copied()
            .filter(|&(_, m)| m >= self.min_contribution)
            .collect();
        if candidates.is_empty() {
            candidates = magnitudes;
        }

        // 安定ソート: 同値は列順を保つ
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut slots: [String; TOP_FEATURE_COUNT] = Default::default();
        for (slot, (idx, _)) in slots.iter_mut().zip(candidates) {
            if let Some(name) = feature_names.get(idx) {
                slot.clone_from(name);
            }
        }
        slots
    }
}
