//! # tsad-rs
//!
//! Multivariate time-series anomaly detection with Isolation Forest.
//!
//! A forest is trained on a known-normal training window, every row of an analysis
//! window is scored on a 0-100 scale (higher = more anomalous), and each row is
//! annotated with the seven features that contributed most to its score.

pub mod config;
pub mod detection;
pub mod error;
pub mod logging;
pub mod table;

pub use config::DetectorConfig;
pub use detection::{run, AnnotatedTable, AnomalyPipeline, RunSummary};
pub use error::{Error, Result};
pub use table::{CsvSource, TableSource, TimeSeriesTable, TimeWindow};
