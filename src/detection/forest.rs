//! Isolation Forest
//!
//! 外れ値は少ない分割で孤立するため、ランダム分割木での経路長が短くなる。
//! 各木はノードをフラットな配列（アリーナ）に保持し、子ノードは添字で参照する。
//!
//! 木の構築は木ごとに独立しており rayon で並列化している。各木は
//! `(random_seed, 木の番号)` から導出したシードの専用乱数生成器を使うため、
//! スレッド数に関係なく結果はビット単位で再現される。

use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// auto 指定時のサブサンプル数の上限
pub const DEFAULT_MAX_SAMPLES: usize = 256;

const EULER_GAMMA: f64 = 0.5772156649;

/// 各木のサブサンプル数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxSamples {
    /// min(256, n)
    Auto,
    /// min(count, n)
    Count(usize),
}

impl MaxSamples {
    fn resolve(self, n_rows: usize) -> usize {
        match self {
            MaxSamples::Auto => DEFAULT_MAX_SAMPLES.min(n_rows),
            MaxSamples::Count(count) => count.max(2).min(n_rows),
        }
    }
}

/// Isolation Forest のパラメータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    /// 木の本数
    pub n_estimators: usize,
    /// サブサンプル数
    pub max_samples: MaxSamples,
    /// 学習データ中の異常割合（オフセットの校正にのみ使用）
    pub contamination: f64,
    /// 乱数シード
    pub random_seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: MaxSamples::Auto,
            contamination: 0.1,
            random_seed: 42,
        }
    }
}

impl ForestParams {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            n_estimators: config.estimator_count,
            max_samples: config
                .max_samples
                .map_or(MaxSamples::Auto, MaxSamples::Count),
            contamination: config.contamination,
            random_seed: config.random_seed,
        }
    }
}

/// n 点の一様乱数に対する二分探索木の平均経路長 c(n)
pub fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
}

/// 木ごとのシード（splitmix64）
fn tree_seed(seed: u64, tree_index: usize) -> u64 {
    let mut z = seed.wrapping_add((tree_index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: u32,
        right: u32,
    },
    Leaf {
        size: usize,
    },
}

/// Isolation Tree
#[derive(Debug, Clone)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    /// `rows` の行から木を構築（`rows` は並べ替えられる）
    fn grow<R: Rng>(
        data: ArrayView2<'_, f64>,
        rows: &mut [usize],
        max_depth: usize,
        rng: &mut R,
    ) -> Self {
        let mut tree = Self {
            nodes: Vec::with_capacity(2 * rows.len()),
        };
        tree.grow_node(data, rows, 0, max_depth, rng);
        tree
    }

    fn grow_node<R: Rng>(
        &mut self,
        data: ArrayView2<'_, f64>,
        rows: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node::Leaf { size: rows.len() });

        if rows.len() <= 1 || depth >= max_depth {
            return id;
        }

        let feature = rng.gen_range(0..data.ncols());
        let (lo, hi) = rows
            .iter()
            .map(|&r| data[[r, feature]])
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });

        // 分割できない
        if lo >= hi {
            return id;
        }

        let threshold = rng.gen_range(lo..hi);
        let split = partition_rows(rows, |r| data[[r, feature]] < threshold);
        let (left_rows, right_rows) = rows.split_at_mut(split);

        let left = self.grow_node(data, left_rows, depth + 1, max_depth, rng);
        let right = self.grow_node(data, right_rows, depth + 1, max_depth, rng);

        self.nodes[id as usize] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    /// 経路長（辺の数 + c(葉のサイズ)）
    pub fn path_length(&self, sample: ArrayView1<'_, f64>) -> f64 {
        let mut node = 0usize;
        let mut depth = 0usize;
        loop {
            match self.nodes[node] {
                Node::Leaf { size } => return depth as f64 + average_path_length(size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let next = if sample[feature] < threshold { left } else { right };
                    node = next as usize;
                    depth += 1;
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 葉に格納された行数（合計はサブサンプル数に一致）
    pub fn leaf_sizes(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Leaf { size } => Some(*size),
                Node::Split { .. } => None,
            })
            .collect()
    }
}

/// 条件を満たす行を前方に集め、その個数を返す
fn partition_rows(rows: &mut [usize], mut goes_left: impl FnMut(usize) -> bool) -> usize {
    let mut split = 0;
    for i in 0..rows.len() {
        if goes_left(rows[i]) {
            rows.swap(split, i);
            split += 1;
        }
    }
    split
}

/// 線形補間によるパーセンタイル（q は 0-100）
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}

/// 未学習の Isolation Forest
#[derive(Debug, Clone)]
pub struct IsolationForest {
    params: ForestParams,
}

impl IsolationForest {
    pub fn new(params: ForestParams) -> Self {
        Self { params }
    }

    /// 学習して不変の [`FittedForest`] を返す
    pub fn fit(&self, data: ArrayView2<'_, f64>) -> Result<FittedForest> {
        let (n_rows, n_features) = data.dim();
        if n_rows < 2 {
            return Err(Error::Validation(format!(
                "Isolation Forest needs at least 2 training rows, got {n_rows}"
            )));
        }
        if n_features == 0 {
            return Err(Error::Validation(
                "Isolation Forest needs at least one feature".to_string(),
            ));
        }
        if self.params.n_estimators == 0 {
            return Err(Error::Config(
                "n_estimators must be at least 1".to_string(),
            ));
        }

        let subsample_size = self.params.max_samples.resolve(n_rows);
        let max_depth = (subsample_size as f64).log2().ceil() as usize;
        let seed = self.params.random_seed;

        let trees: Vec<IsolationTree> = (0..self.params.n_estimators)
            .into_par_iter()
            .map(|tree_index| {
                let mut rng = StdRng::seed_from_u64(tree_seed(seed, tree_index));
                let mut rows = rand::seq::index::sample(&mut rng, n_rows, subsample_size).into_vec();
                IsolationTree::grow(data, &mut rows, max_depth, &mut rng)
            })
            .collect();

        debug!(
            "Built {} isolation trees (subsample={}, max_depth={}, nodes={})",
            trees.len(),
            subsample_size,
            max_depth,
            trees.iter().map(IsolationTree::node_count).sum::<usize>()
        );

        let mut fitted = FittedForest {
            trees,
            subsample_size,
            n_features,
            offset: 0.0,
        };
        let training_scores = fitted.isolation_scores(data)?.to_vec();
        fitted.offset = percentile(
            &training_scores,
            100.0 * (1.0 - self.params.contamination),
        );

        Ok(fitted)
    }
}

/// 学習済み Isolation Forest（不変）
#[derive(Debug, Clone)]
pub struct FittedForest {
    trees: Vec<IsolationTree>,
    subsample_size: usize,
    n_features: usize,
    offset: f64,
}

impl FittedForest {
    pub fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }

    pub fn subsample_size(&self) -> usize {
        self.subsample_size
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// 決定関数のオフセット（学習データの isolation score の上位 contamination 点）
    pub fn offset(&self) -> f64 {
        self.offset
    }

    fn check_width(&self, data: &ArrayView2<'_, f64>) -> Result<()> {
        if data.ncols() != self.n_features {
            return Err(Error::Validation(format!(
                "Feature dimension mismatch: model has {}, matrix has {}",
                self.n_features,
                data.ncols()
            )));
        }
        Ok(())
    }

    /// isolation score `2^(-E[h(x)] / c(ψ))`（1に近いほど異常）
    pub fn isolation_scores(&self, data: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        self.check_width(&data)?;
        let normalizer = average_path_length(self.subsample_size);
        let n_trees = self.trees.len() as f64;

        let scores: Vec<f64> = (0..data.nrows())
            .into_par_iter()
            .map(|r| {
                let row = data.row(r);
                let total: f64 = self.trees.iter().map(|t| t.path_length(row)).sum();
                2f64.powf(-(total / n_trees) / normalizer)
            })
            .collect();

        Ok(Array1::from_vec(scores))
    }

    /// 決定関数 `offset - isolation score`（低いほど異常、負なら異常判定）
    pub fn decision_function(&self, data: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let offset = self.offset;
        Ok(self.isolation_scores(data)?.mapv_into(|s| offset - s))
    }

    /// 1 = 正常, -1 = 異常
    pub fn predict(&self, data: ArrayView2<'_, f64>) -> Result<Array1<i8>> {
        Ok(self
            .decision_function(data)?
            .mapv(|d| if d < 0.0 { -1 } else { 1 }))
    }
}
