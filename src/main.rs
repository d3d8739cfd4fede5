use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tsad_rs::detection::pipeline::partial_path;
use tsad_rs::logging::{init_logging, LogConfig, LogRotation};
use tsad_rs::{AnomalyPipeline, DetectorConfig, RunSummary};

/// Exit code used when `--timeout-secs` expires
const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Parser, Debug)]
#[command(
    name = "tsad-rs",
    version,
    about = "Isolation Forest anomaly detection for multivariate time series"
)]
struct Cli {
    /// Input CSV with a time column and numeric sensor columns
    #[arg(required_unless_present = "generate_config")]
    input: Option<PathBuf>,

    /// Output CSV (input columns + Abnormality_score + top_feature_1..7)
    #[arg(required_unless_present = "generate_config")]
    output: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "TSAD_CONFIG")]
    config: Option<PathBuf>,

    /// Override contamination (0.0-1.0, exclusive)
    #[arg(long)]
    contamination: Option<f64>,

    /// Override random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override number of trees
    #[arg(long)]
    estimators: Option<usize>,

    /// Write a JSON run summary to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Abort the run after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Log level or filter directive
    #[arg(long, env = "TSAD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Write logs to this directory in addition to stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log file rotation (daily, hourly, never)
    #[arg(long, default_value = "daily")]
    log_rotation: LogRotation,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print a sample configuration file and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.generate_config {
        return match DetectorConfig::sample_toml() {
            Ok(sample) => {
                println!("{}", sample);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::from(e.exit_code() as u8)
            }
        };
    }

    let mut log_config = LogConfig::default()
        .with_level(cli.log_level.clone())
        .with_rotation(cli.log_rotation)
        .with_json(cli.log_json);
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir);
    }
    let guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let code = match execute(cli).await {
        Ok(()) => return ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            exit_code_for(&e)
        }
    };

    // 実行中のブロッキングタスクを待たずに終了する
    drop(guard);
    std::process::exit(code)
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config =
        DetectorConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(contamination) = cli.contamination {
        config.contamination = contamination;
    }
    if let Some(seed) = cli.seed {
        config.random_seed = seed;
    }
    if let Some(estimators) = cli.estimators {
        config.estimator_count = estimators;
    }

    let training_window = config.training_window;
    let pipeline = AnomalyPipeline::new(config).context("Invalid configuration")?;

    let input = cli.input.context("Input path is required")?;
    let output = cli.output.context("Output path is required")?;
    info!("Reading {}", input.display());

    let task = {
        let (input, output) = (input.clone(), output.clone());
        tokio::task::spawn_blocking(move || pipeline.run_files(&input, &output))
    };
    let joined = match cli.timeout_secs {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), task).await {
            Ok(joined) => joined,
            Err(_) => {
                let partial = partial_path(&output);
                if partial.exists() {
                    let _ = std::fs::remove_file(&partial);
                }
                return Err(TimedOut(secs).into());
            }
        },
        None => task.await,
    };
    let annotated = joined
        .context("Detection task panicked")?
        .with_context(|| format!("Anomaly detection failed for {}", input.display()))?;

    if let Some(path) = cli.summary_json {
        let summary = RunSummary::from_table(&annotated, &training_window);
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        summary
            .write_json(file)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        info!("Summary written to {}", path.display());
    }

    info!(
        "Processed {} rows, results saved to {}",
        annotated.len(),
        output.display()
    );
    Ok(())
}

#[derive(Debug, thiserror::Error)]
#[error("Run exceeded timeout of {0} seconds")]
struct TimedOut(u64);

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<TimedOut>().is_some() {
        return TIMEOUT_EXIT_CODE;
    }
    err.downcast_ref::<tsad_rs::Error>()
        .map(tsad_rs::Error::exit_code)
        .unwrap_or(1)
}
