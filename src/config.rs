//! 検知パイプライン設定
//!
//! デフォルト値 → 設定ファイル（TOML）→ 環境変数（`TSAD_` で始まる変数）の順で読み込みます。

use crate::error::{Error, Result};
use crate::table::TimeWindow;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// 設定ファイルの探索パス
const CONFIG_PATHS: [&str; 3] = ["tsad.toml", "config/tsad.toml", "config.toml"];

/// 検知設定
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectorConfig {
    /// 学習データ中の異常割合の想定値（0.0-1.0、両端を除く）
    pub contamination: f64,
    /// 乱数シード
    pub random_seed: u64,
    /// 決定木の本数
    pub estimator_count: usize,
    /// 各木のサブサンプル数（None = auto: min(256, n)）
    pub max_samples: Option<usize>,
    /// 学習に必要な最小行数
    pub min_training_rows: usize,
    /// 上位特徴量として採用する最小寄与度
    pub min_contribution_fraction: f64,
    /// 時刻列の名前
    pub time_column: String,
    /// 学習期間（正常データ）
    pub training_window: TimeWindow,
    /// 分析期間
    pub analysis_window: TimeWindow,
    /// 検証時の助言しきい値
    pub advisory: AdvisoryThresholds,
}

/// 学習期間のスコアに対する助言しきい値（超過時は警告のみ）
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AdvisoryThresholds {
    /// 学習期間の平均スコア上限
    pub training_mean_max: f64,
    /// 学習期間の最大スコア上限
    pub training_peak_max: f64,
}

impl Default for AdvisoryThresholds {
    fn default() -> Self {
        Self {
            training_mean_max: 10.0,
            training_peak_max: 25.0,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            random_seed: 42,
            estimator_count: 100,
            max_samples: None,
            min_training_rows: 72,
            min_contribution_fraction: 0.01,
            time_column: "Time".to_string(),
            training_window: TimeWindow::new(
                datetime(2004, 1, 1, 0, 0, 0),
                datetime(2004, 1, 5, 23, 59, 59),
            ),
            analysis_window: TimeWindow::new(
                datetime(2004, 1, 1, 0, 0, 0),
                datetime(2004, 1, 19, 7, 59, 59),
            ),
            advisory: AdvisoryThresholds::default(),
        }
    }
}

fn datetime(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(hh, mm, ss))
        .unwrap_or_default()
}

impl DetectorConfig {
    /// 設定ファイルから読み込み、環境変数で上書き
    ///
    /// `path` を指定しない場合は `CONFIG_PATHS` の最初に存在するファイルを使用します。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                settings = settings.add_source(config::File::from(path));
            }
            None => {
                if let Some(found) = CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
                    info!("Loading configuration from {}", found);
                    settings = settings.add_source(config::File::with_name(found));
                }
            }
        }

        settings = settings.add_source(
            config::Environment::with_prefix("TSAD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: DetectorConfig = settings.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// 設定値の妥当性チェック
    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(Error::Config(format!(
                "contamination must be in (0, 1), got {}",
                self.contamination
            )));
        }
        if self.estimator_count == 0 {
            return Err(Error::Config(
                "estimator_count must be at least 1".to_string(),
            ));
        }
        if matches!(self.max_samples, Some(n) if n < 2) {
            return Err(Error::Config(
                "max_samples must be at least 2 when set".to_string(),
            ));
        }
        if self.min_training_rows < 2 {
            return Err(Error::Config(format!(
                "min_training_rows must be at least 2, got {}",
                self.min_training_rows
            )));
        }
        if !self.min_contribution_fraction.is_finite() || self.min_contribution_fraction < 0.0 {
            return Err(Error::Config(format!(
                "min_contribution_fraction must be a non-negative number, got {}",
                self.min_contribution_fraction
            )));
        }
        if self.time_column.trim().is_empty() {
            return Err(Error::Config("time_column must not be empty".to_string()));
        }
        for (name, window) in [
            ("training_window", &self.training_window),
            ("analysis_window", &self.analysis_window),
        ] {
            if window.start > window.end {
                return Err(Error::Config(format!(
                    "{name} starts after it ends ({} > {})",
                    window.start, window.end
                )));
            }
        }
        Ok(())
    }

    /// サンプル設定ファイルの内容を生成
    pub fn sample_toml() -> Result<String> {
        let body = toml::to_string_pretty(&Self::default())
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(format!(
            r#"# tsad-rs configuration
#
# Save as tsad.toml. Every key can be overridden from the environment,
# e.g. TSAD_CONTAMINATION=0.05 or TSAD_TRAINING_WINDOW__START=2004-01-02T00:00:00

{body}"#
        ))
    }
}
