use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// ログファイル名
const LOG_FILE_NAME: &str = "tsad-rs.log";

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// ログレベル (trace, debug, info, warn, error) または EnvFilter 形式
    pub level: String,
    /// ログディレクトリ（None の場合ファイル出力なし）
    pub log_dir: Option<PathBuf>,
    /// ファイルローテーション設定
    pub rotation: LogRotation,
    /// コンソール出力有効
    pub console_enabled: bool,
    /// JSON形式で出力
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// 日次ローテーション
    Daily,
    /// 時間毎ローテーション
    Hourly,
    /// ローテーションなし
    Never,
}

impl FromStr for LogRotation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(LogRotation::Daily),
            "hourly" => Ok(LogRotation::Hourly),
            "never" => Ok(LogRotation::Never),
            other => Err(Error::Config(format!("Unknown log rotation: {}", other))),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            rotation: LogRotation::Daily,
            console_enabled: true,
            json: false,
        }
    }
}

impl LogConfig {
    /// カスタムログディレクトリを設定
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// ローテーション設定
    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// ログレベル設定
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// コンソール出力制御
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console_enabled = enabled;
        self
    }

    /// JSON出力制御
    pub fn with_json(mut self, enabled: bool) -> Self {
        self.json = enabled;
        self
    }

    /// RUST_LOG があればそれを優先
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// ログディレクトリを確保
fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// ログシステムを初期化
///
/// ファイル出力を有効にした場合、返されたガードが破棄されるまで書き込みが続く。
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut guard = None;

    let file_layer = match &config.log_dir {
        Some(dir) => {
            ensure_log_dir(dir)?;
            let file_appender = match config.rotation {
                LogRotation::Daily => rolling::daily(dir, LOG_FILE_NAME),
                LogRotation::Hourly => rolling::hourly(dir, LOG_FILE_NAME),
                LogRotation::Never => rolling::never(dir, LOG_FILE_NAME),
            };
            let (writer, file_guard) = non_blocking(file_appender);
            guard = Some(file_guard);

            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            Some(if config.json {
                layer.json().boxed()
            } else {
                layer.with_target(true).boxed()
            })
        }
        None => None,
    };

    let console_layer = config.console_enabled.then(|| {
        let layer = fmt::layer().with_writer(std::io::stderr);
        if config.json {
            layer.json().boxed()
        } else {
            layer.with_target(false).boxed()
        }
    });

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(
        level = %config.level,
        log_dir = ?config.log_dir,
        json = config.json,
        "Logging initialized"
    );

    Ok(guard)
}
