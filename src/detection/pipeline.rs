//! Anomaly Detection Pipeline
//!
//! 読み込み → 期間分割 → 前処理 → 学習 → スコア計算 → 寄与度 → 変換 → 検証 を
//! 順に実行する。各段階は一方向で再試行しない。いずれかで失敗した場合は
//! その段階のエラーをそのまま返し、部分的な結果は出力しない。

use super::{
    check_reserved_columns, AnnotatedTable, AnomalyDetector, AnomalyRecord, FeatureAttributor,
    FeatureMatrixBuilder, ForestParams, ScoreTransformer,
};
use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use crate::table::{write_annotated_csv, CsvSource, TableSource, TimeSeriesTable};
use statrs::statistics::Statistics;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, warn};

/// パイプラインの段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    Loaded,
    Split,
    Preprocessed,
    Trained,
    Scored,
    Attributed,
    Transformed,
    Validated,
}

/// 段階の遷移を記録（前進のみ）
#[derive(Debug)]
struct StageTracker {
    current: PipelineStage,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            current: PipelineStage::Loaded,
        }
    }

    fn advance(&mut self, next: PipelineStage) {
        debug_assert!(next > self.current, "{:?} -> {:?}", self.current, next);
        debug!("Pipeline stage: {:?} -> {:?}", self.current, next);
        self.current = next;
    }
}

/// 異常検知パイプライン
#[derive(Debug, Clone)]
pub struct AnomalyPipeline {
    config: DetectorConfig,
}

/// `run_files` が書き込み中に使う一時ファイル（出力と同じディレクトリ）
pub fn partial_path(output: &Path) -> PathBuf {
    output.with_extension("partial")
}

/// 設定を検証してテーブルを処理する
pub fn run(table: &TimeSeriesTable, config: &DetectorConfig) -> Result<AnnotatedTable> {
    AnomalyPipeline::new(config.clone())?.run(table)
}

impl AnomalyPipeline {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// ソースから読み込んで処理
    pub fn run_source<S: TableSource>(&self, source: &S) -> Result<AnnotatedTable> {
        let table = source.load()?;
        self.run(&table)
    }

    /// CSVを読み込んで処理し、結果をCSVに書き出す
    ///
    /// 出力ファイルは処理がすべて成功した後にのみ作成される。
    pub fn run_files(&self, input: &Path, output: &Path) -> Result<AnnotatedTable> {
        let annotated = self.run_source(&CsvSource::new(input, &self.config.time_column))?;

        let partial = partial_path(output);
        let written = fs::File::create(&partial)
            .map_err(Error::from)
            .and_then(|file| write_annotated_csv(&annotated, file))
            .and_then(|_| fs::rename(&partial, output).map_err(Error::from));
        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        info!(
            "Anomaly detection completed. Results saved to {}",
            output.display()
        );
        Ok(annotated)
    }

    /// テーブルを処理して異常スコア付きテーブルを返す
    pub fn run(&self, table: &TimeSeriesTable) -> Result<AnnotatedTable> {
        let span = info_span!("anomaly_run", rows = table.len());
        let _enter = span.enter();
        info!("Starting anomaly detection process");

        let config = &self.config;
        let mut stage = StageTracker::new();

        if table.time_column() != config.time_column {
            return Err(Error::Validation(format!(
                "Table must contain a '{}' time column (found '{}')",
                config.time_column,
                table.time_column()
            )));
        }

        check_reserved_columns(table.feature_names())?;

        // 期間分割
        let training = table.select_window(&config.training_window);
        let analysis = table.select_window(&config.analysis_window);
        if training.len() < config.min_training_rows {
            return Err(Error::Validation(format!(
                "Insufficient training data: {} rows, minimum required: {}",
                training.len(),
                config.min_training_rows
            )));
        }
        if analysis.is_empty() {
            return Err(Error::Validation(format!(
                "Analysis window {} - {} contains no rows",
                config.analysis_window.start, config.analysis_window.end
            )));
        }
        info!(
            "Training data: {} rows, analysis data: {} rows",
            training.len(),
            analysis.len()
        );
        stage.advance(PipelineStage::Split);

        // 前処理
        let builder = FeatureMatrixBuilder::new(config.min_training_rows);
        let (scaler, training_matrix) = builder.fit(&training)?;
        let analysis_matrix = scaler.transform(&analysis)?;
        stage.advance(PipelineStage::Preprocessed);

        // 学習
        let mut detector = AnomalyDetector::new(ForestParams::from_config(config));
        detector.train(training_matrix.view())?;
        stage.advance(PipelineStage::Trained);

        // スコア計算
        let raw_scores = detector.score(analysis_matrix.view())?;
        stage.advance(PipelineStage::Scored);

        // 寄与度
        let contributions = FeatureAttributor::new().attribute(&detector, analysis_matrix.view())?;
        stage.advance(PipelineStage::Attributed);

        // 変換
        let transformer = ScoreTransformer::new(config.min_contribution_fraction);
        let scores = transformer.transform_scores(raw_scores.view());
        let top_features = transformer.top_features(contributions.view(), analysis_matrix.names());

        let records: Vec<AnomalyRecord> = top_features
            .into_iter()
            .enumerate()
            .filter_map(|(row, top_features)| {
                analysis.observation(row).map(|observation| AnomalyRecord {
                    observation,
                    raw_score: raw_scores[row],
                    score: scores[row],
                    top_features,
                })
            })
            .collect();
        let annotated = AnnotatedTable::new(
            analysis.time_column(),
            analysis.feature_names().to_vec(),
            records,
        );
        stage.advance(PipelineStage::Transformed);

        // 検証
        self.validate(&annotated)?;
        stage.advance(PipelineStage::Validated);

        Ok(annotated)
    }

    /// 結果の検証
    ///
    /// 学習期間のスコアがしきい値を超えても警告のみ。スキーマ不備はエラー。
    fn validate(&self, annotated: &AnnotatedTable) -> Result<()> {
        info!("Validating results");
        let advisory = &self.config.advisory;

        let training_scores: Vec<f64> = annotated
            .records()
            .iter()
            .filter(|r| self.config.training_window.contains(&r.observation.timestamp))
            .map(|r| r.score)
            .collect();

        if !training_scores.is_empty() {
            let mean = Statistics::mean(&training_scores);
            let max = Statistics::max(&training_scores);
            info!(
                "Training period - Mean score: {:.2}, Max score: {:.2}",
                mean, max
            );

            if mean > advisory.training_mean_max {
                warn!(
                    "Training period mean score ({:.2}) is above recommended threshold ({})",
                    mean, advisory.training_mean_max
                );
            }
            if max > advisory.training_peak_max {
                warn!(
                    "Training period max score ({:.2}) is above recommended threshold ({})",
                    max, advisory.training_peak_max
                );
            }
        }

        let all_scores = annotated.scores();
        if !all_scores.is_empty() {
            info!(
                "Score distribution - Min: {:.2}, Max: {:.2}, Mean: {:.2}",
                Statistics::min(&all_scores),
                Statistics::max(&all_scores),
                Statistics::mean(&all_scores)
            );
        }

        annotated.validate_schema()?;
        info!("Results validation completed");
        Ok(())
    }
}
