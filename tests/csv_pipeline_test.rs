//! CSV Pipeline Integration Tests
//!
//! ファイル入力 → 検知 → ファイル出力 の全体をテストします。

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use tsad_rs::detection::TOP_FEATURE_COUNT;
use tsad_rs::{AnomalyPipeline, DetectorConfig, Error, RunSummary, TimeWindow};

fn at(hour: usize) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2004, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::hours(hour as i64)
}

/// テスト用CSVを作成
///
/// 列: Time, sensor_a, sensor_b, label（文字列）, sensor_c（欠損あり）, idle（一定）
fn create_test_csv(path: &Path, rows: usize) {
    let mut text = String::from("Time,sensor_a,sensor_b,label,sensor_c,idle\n");
    for r in 0..rows {
        let a = (r as f64 * 0.21).sin() * 2.0;
        let b = (r as f64 * 0.13).cos() + ((r * 7) % 5) as f64 * 0.1;
        let c = if r % 17 == 3 {
            String::new()
        } else {
            format!("{:.3}", ((r * 11) % 13) as f64 / 4.0)
        };
        let a = if r == 150 { 25.0 } else { a };
        writeln!(
            text,
            "{},{:.4},{:.4},unit-{},{},1.0",
            at(r).format("%Y-%m-%d %H:%M:%S"),
            a,
            b,
            r % 3,
            c
        )
        .unwrap();
    }
    fs::write(path, text).unwrap();
}

fn create_test_config(training_rows: usize, total_rows: usize) -> DetectorConfig {
    DetectorConfig {
        estimator_count: 60,
        training_window: TimeWindow::new(at(0), at(training_rows - 1)),
        analysis_window: TimeWindow::new(at(0), at(total_rows - 1)),
        ..DetectorConfig::default()
    }
}

#[test]
fn test_run_files_writes_annotated_csv() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.csv");
    let output = dir.path().join("output.csv");
    create_test_csv(&input, 200);

    let pipeline = AnomalyPipeline::new(create_test_config(120, 200)).unwrap();
    let annotated = pipeline.run_files(&input, &output).unwrap();
    assert_eq!(annotated.len(), 200);

    let mut reader = csv::Reader::from_path(&output).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    let mut expected = vec![
        "Time".to_string(),
        "sensor_a".to_string(),
        "sensor_b".to_string(),
        "sensor_c".to_string(),
        "Abnormality_score".to_string(),
    ];
    expected.extend((1..=TOP_FEATURE_COUNT).map(|i| format!("top_feature_{}", i)));
    assert_eq!(headers, expected);

    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 200);
    assert_eq!(&rows[0][0], "2004-01-01 00:00:00");
    for row in &rows {
        let score: f64 = row[4].parse().unwrap();
        assert!((0.0..=100.0).contains(&score));
    }

    // スパイク行は最も高いスコアで sensor_a が第1位
    let spike = &rows[150];
    assert_eq!(spike[4].parse::<f64>().unwrap(), 100.0 - 100.0 / 200.0);
    assert_eq!(&spike[5], "sensor_a");

    assert!(!dir.path().join("output.partial").exists());
}

#[test]
fn test_failed_run_leaves_no_output() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.csv");
    let output = dir.path().join("output.csv");
    create_test_csv(&input, 100);

    let pipeline = AnomalyPipeline::new(create_test_config(40, 100)).unwrap();
    let result = pipeline.run_files(&input, &output);

    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(!output.exists());
    assert!(!dir.path().join("output.partial").exists());
}

#[test]
fn test_missing_input_is_io_error() {
    let dir = tempdir().unwrap();
    let pipeline = AnomalyPipeline::new(DetectorConfig::default()).unwrap();
    let result = pipeline.run_files(&dir.path().join("absent.csv"), &dir.path().join("out.csv"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_missing_time_column_rejected() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.csv");
    fs::write(&input, "Timestamp,a\n2004-01-01 00:00:00,1.0\n").unwrap();

    let pipeline = AnomalyPipeline::new(DetectorConfig::default()).unwrap();
    let result = pipeline.run_files(&input, &dir.path().join("out.csv"));
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[test]
fn test_summary_json_for_file_run() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.csv");
    let output = dir.path().join("output.csv");
    create_test_csv(&input, 200);

    let config = create_test_config(120, 200);
    let training_window = config.training_window;
    let annotated = AnomalyPipeline::new(config)
        .unwrap()
        .run_files(&input, &output)
        .unwrap();

    let summary = RunSummary::from_table(&annotated, &training_window);
    let summary_path = dir.path().join("summary.json");
    summary
        .write_json(fs::File::create(&summary_path).unwrap())
        .unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary_path).unwrap()).unwrap();
    assert_eq!(json["totalRows"], 200);
    assert_eq!(json["scoreRange"]["max"], 99.5);
    let buckets = &json["scoreDistribution"];
    let total: u64 = ["normal", "slight", "moderate", "significant", "severe"]
        .iter()
        .map(|k| buckets[*k].as_u64().unwrap())
        .sum();
    assert_eq!(total, 200);
}
