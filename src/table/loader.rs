//! CSV Loader
//!
//! CSVファイルを読み込み、検証・整形して [`TimeSeriesTable`] を作成します。

use super::{TableSource, TimeSeriesTable};
use crate::detection::check_reserved_columns;
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime};
use ndarray::Array2;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// 受け付けるタイムスタンプ形式
const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// CSVファイルからテーブルを読み込むソース
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    time_column: String,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, time_column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            time_column: time_column.into(),
        }
    }
}

impl TableSource for CsvSource {
    fn load(&self) -> Result<TimeSeriesTable> {
        info!("Loading data from {}", self.path.display());
        let file = std::fs::File::open(&self.path)?;
        let table = read_table(file, &self.time_column)?;
        info!(
            "Data loaded successfully: {} rows, {} features",
            table.len(),
            table.feature_names().len()
        );
        Ok(table)
    }
}

/// CSVを読み込んでテーブルを作成
///
/// - 時刻列は必須
/// - 数値として解釈できない列は除外
/// - 欠損値は前方補完し、先頭の欠損は後方補完
/// - 全期間で一定の列は除外
pub fn read_table<R: Read>(reader: R, time_column: &str) -> Result<TimeSeriesTable> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let time_idx = headers
        .iter()
        .position(|h| h == time_column)
        .ok_or_else(|| {
            Error::Validation(format!("CSV must contain a '{time_column}' column"))
        })?;

    let records = csv_reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut timestamps = Vec::with_capacity(records.len());
    for (line, record) in records.iter().enumerate() {
        let raw = record.get(time_idx).unwrap_or_default();
        let ts = parse_timestamp(raw).ok_or_else(|| {
            Error::Validation(format!(
                "Unparseable timestamp '{raw}' in data row {}",
                line + 1
            ))
        })?;
        timestamps.push(ts);
    }

    // 数値列のみを抽出
    let mut columns: Vec<(String, Vec<Option<f64>>)> = Vec::new();
    for (col_idx, name) in headers.iter().enumerate() {
        if col_idx == time_idx {
            continue;
        }
        match parse_numeric_column(&records, col_idx) {
            Some(cells) => columns.push((name.to_string(), cells)),
            None => warn!("Dropping non-numeric column: {}", name),
        }
    }

    let numeric_names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();
    check_reserved_columns(&numeric_names)?;

    // 時刻順にソート
    let mut order: Vec<usize> = (0..timestamps.len()).collect();
    order.sort_by_key(|&i| timestamps[i]);
    let timestamps: Vec<NaiveDateTime> = order.iter().map(|&i| timestamps[i]).collect();
    if let Some(pair) = timestamps.windows(2).find(|w| w[0] == w[1]) {
        return Err(Error::Validation(format!(
            "Duplicate timestamp: {}",
            pair[0]
        )));
    }
    check_intervals(&timestamps);

    let mut kept_names = Vec::with_capacity(columns.len());
    let mut kept_values: Vec<Vec<f64>> = Vec::with_capacity(columns.len());
    for (name, cells) in columns {
        let sorted: Vec<Option<f64>> = order.iter().map(|&i| cells[i]).collect();
        let missing = sorted.iter().filter(|c| c.is_none()).count();
        if missing > 0 {
            info!("Filling {} missing values in {}", missing, name);
        }
        let filled = fill_missing(&sorted);

        if is_constant(&filled) {
            warn!("Removing constant feature: {}", name);
            continue;
        }
        kept_names.push(name);
        kept_values.push(filled);
    }

    let rows = timestamps.len();
    let cols = kept_names.len();
    let values = Array2::from_shape_fn((rows, cols), |(r, c)| kept_values[c][r]);

    TimeSeriesTable::new(time_column, kept_names, timestamps, values)
}

/// タイムスタンプを解析
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

/// 列を数値として解析（解釈できないセルが1つでもあれば None）
fn parse_numeric_column(records: &[csv::StringRecord], col_idx: usize) -> Option<Vec<Option<f64>>> {
    let mut cells = Vec::with_capacity(records.len());
    for record in records {
        let raw = record.get(col_idx).unwrap_or_default();
        if raw.is_empty() {
            cells.push(None);
            continue;
        }
        let value: f64 = raw.parse().ok()?;
        cells.push(if value.is_nan() { None } else { Some(value) });
    }
    Some(cells)
}

/// 前方補完 → 後方補完。全欠損の列は NaN のまま
fn fill_missing(cells: &[Option<f64>]) -> Vec<f64> {
    let mut filled = Vec::with_capacity(cells.len());
    let mut last = None;
    for cell in cells {
        if cell.is_some() {
            last = *cell;
        }
        filled.push(last);
    }

    let first = filled.iter().flatten().next().copied();
    filled
        .into_iter()
        .map(|v| v.or(first).unwrap_or(f64::NAN))
        .collect()
}

fn is_constant(values: &[f64]) -> bool {
    match values.first() {
        None => true,
        Some(first) if first.is_nan() => true,
        Some(first) => values.iter().all(|v| v == first),
    }
}

/// サンプリング間隔の規則性をチェック（警告のみ）
fn check_intervals(timestamps: &[NaiveDateTime]) {
    let intervals: BTreeSet<i64> = timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds())
        .collect();

    if intervals.len() > 2 {
        warn!(
            "Time intervals are not perfectly regular ({} distinct intervals)",
            intervals.len()
        );
    } else {
        debug!("Sampling intervals (seconds): {:?}", intervals);
    }
}
