//! End-to-end detection against a throwaway store and model directory.

use std::path::Path;

use assert_cmd::Command;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use ranguard::analysis::forest::{IsolationForest, IsolationTree, Node};
use ranguard::analysis::model::{FEATURES_FILE, MODEL_FILE, SCALER_FILE};
use ranguard::config::{FeatureConfig, RanConfig};
use ranguard::detect::engine::DetectionCycle;
use ranguard::detect::AnomalyLabel;
use ranguard::storage::TelemetryStore;
use ranguard::telemetry::{format_timestamp, Sample};

/// Throughput above 5.0 is isolated after a single split.
fn write_model(dir: &Path) {
    let tree = IsolationTree {
        nodes: vec![
            Node::Split {
                feature: 0,
                threshold: 5.0,
                left: 1,
                right: 2,
            },
            Node::Leaf { size: 255 },
            Node::Leaf { size: 1 },
        ],
    };
    let forest = IsolationForest {
        n_features: 1,
        max_samples: 256,
        offset: -0.5,
        trees: vec![tree.clone(), tree],
    };
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(MODEL_FILE), serde_json::to_string(&forest).unwrap()).unwrap();
    std::fs::write(dir.join(FEATURES_FILE), r#"["DRB.UEThpDl"]"#).unwrap();
    std::fs::write(dir.join(SCALER_FILE), r#"{"mean": [0.0], "scale": [1.0]}"#).unwrap();
}

fn config(root: &Path) -> RanConfig {
    let mut cfg = RanConfig::default();
    cfg.store.path = root.join("data").join("ranguard.db");
    cfg.model.dir = root.join("models");
    cfg.detection.batch_window_secs = 600;
    write_model(&cfg.model.dir);
    cfg
}

fn report(ue: &str, at: DateTime<Utc>, thpt: f64, rsrp: f64, rsrq: f64) -> Sample {
    let raw = json!({
        "ue-id": ue,
        "measTimeStampRf": format_timestamp(&at),
        "DRB.UEThpDl": thpt,
        "RF.serving.RSRP": rsrp,
        "RF.serving.RSRQ": rsrq,
        "RF.serving.RSSINR": 12.0,
        "RRU.PrbUsedDl": 30.0
    });
    Sample::from_record(&raw, &FeatureConfig::default()).unwrap()
}

/// One UE with a healthy history and a degraded fresh report, plus a healthy UE.
fn seed_store(store: &TelemetryStore) {
    let features = FeatureConfig::default();
    let now = Utc::now();
    let history = now - Duration::hours(2);
    store
        .insert_report("UEReports", &report("ue-7", history, 100.0, -80.0, -9.0), &features)
        .unwrap();
    store
        .insert_report("UEReports", &report("ue-7", now, 40.0, -99.0, -12.0), &features)
        .unwrap();
    store
        .insert_report("UEReports", &report("ue-8", now, 2.0, -85.0, -10.0), &features)
        .unwrap();
}

#[test]
fn test_cycle_attributes_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let store = TelemetryStore::open(&cfg.store).unwrap();
    seed_store(&store);

    let cycle = DetectionCycle::from_config(&cfg, store.clone()).unwrap();
    let report = cycle.run_once().unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.flagged, 1);
    assert_eq!(report.written, 1);

    let anomalies = store.list_anomalies(10).unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].ue_id, "ue-7");
    assert_eq!(anomalies[0].measurement, "AD");
    assert_eq!(anomalies[0].label, AnomalyLabel::DualDegradation);
    assert_eq!(anomalies[0].degradation.as_deref(), Some("Throughput RSRP"));
}

#[test]
fn test_recorded_anomaly_leaves_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let store = TelemetryStore::open(&cfg.store).unwrap();
    seed_store(&store);

    let cycle = DetectionCycle::from_config(&cfg, store.clone()).unwrap();
    cycle.run_once().unwrap();

    // The degraded report no longer counts as history for ue-7.
    let baseline = cycle
        .engine()
        .causes()
        .baseline_for("ue-7", &store)
        .unwrap()
        .unwrap();
    assert_eq!(baseline.sample_count, 1);
    assert_eq!(baseline.max.throughput, 100.0);
}

#[test]
fn test_detect_command_reports_json() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let store = TelemetryStore::open(&cfg.store).unwrap();
    seed_store(&store);

    let cfg_path = dir.path().join("ranguard.toml");
    std::fs::write(&cfg_path, toml::to_string(&cfg).unwrap()).unwrap();

    let output = Command::cargo_bin("ranguard")
        .unwrap()
        .arg("--config")
        .arg(&cfg_path)
        .args(["detect", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["scanned"], 2);
    assert_eq!(report["flagged"], 1);
    assert_eq!(report["rows"][0]["label"], 2);
    assert_eq!(report["rows"][0]["degradation"], "Throughput RSRP");

    Command::cargo_bin("ranguard")
        .unwrap()
        .arg("--config")
        .arg(&cfg_path)
        .args(["anomalies", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("ue-7"));
}

#[test]
fn test_missing_model_aborts_detect() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.model.dir = dir.path().join("nowhere");
    let cfg_path = dir.path().join("ranguard.toml");
    std::fs::write(&cfg_path, toml::to_string(&cfg).unwrap()).unwrap();

    Command::cargo_bin("ranguard")
        .unwrap()
        .arg("--config")
        .arg(&cfg_path)
        .arg("detect")
        .assert()
        .failure()
        .stderr(predicates::str::contains("failed to load anomaly model"));
}
