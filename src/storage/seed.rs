//! Replay recorded UE reports into the telemetry store.
//!
//! Recorded reports are grouped into steps by their original timestamp. Each
//! step is written with fresh timestamps (one millisecond apart) so the data
//! looks live to the detector, with a pause between steps.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::TelemetryStore;
use crate::config::FeatureConfig;
use crate::telemetry::{format_timestamp, Sample};

/// Default pause between replayed steps.
pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_millis(700);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: usize,
    pub rejected: usize,
}

/// Read one JSON object per non-blank line.
pub fn load_jsonl(path: &Path) -> Result<Vec<Value>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), n + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Group records sharing the same original timestamp, in first-seen order.
pub fn group_steps(records: Vec<Value>, timestamp_field: &str) -> Vec<Vec<Value>> {
    let mut keys: Vec<Value> = Vec::new();
    let mut steps: Vec<Vec<Value>> = Vec::new();
    for record in records {
        let key = record.get(timestamp_field).cloned().unwrap_or(Value::Null);
        match keys.iter().position(|k| *k == key) {
            Some(i) => steps[i].push(record),
            None => {
                keys.push(key);
                steps.push(vec![record]);
            }
        }
    }
    steps
}

/// Write one step, stamping record `i` with `start + i ms`.
pub fn replay_step(
    store: &TelemetryStore,
    measurement: &str,
    step: &[Value],
    features: &FeatureConfig,
    start: DateTime<Utc>,
) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    for (i, record) in step.iter().enumerate() {
        let mut record = record.clone();
        let at = start + chrono::Duration::milliseconds(i as i64);
        if let Some(fields) = record.as_object_mut() {
            fields.insert(features.timestamp.clone(), Value::String(format_timestamp(&at)));
        }
        match Sample::from_record(&record, features) {
            Ok(sample) => {
                store.insert_report(measurement, &sample, features)?;
                report.inserted += 1;
            }
            Err(e) => {
                warn!(error = %e, "skipping seed record");
                report.rejected += 1;
            }
        }
    }
    Ok(report)
}

/// Replay all steps, once or until cancelled.
pub async fn run(
    store: TelemetryStore,
    measurement: String,
    steps: Vec<Vec<Value>>,
    features: FeatureConfig,
    interval: Duration,
    once: bool,
) -> Result<SeedReport> {
    let mut total = SeedReport::default();
    if steps.is_empty() {
        warn!("nothing to seed");
        return Ok(total);
    }

    loop {
        for step in &steps {
            let (store, measurement, features, step) =
                (store.clone(), measurement.clone(), features.clone(), step.clone());
            let report = tokio::task::spawn_blocking(move || {
                replay_step(&store, &measurement, &step, &features, Utc::now())
            })
            .await??;
            debug!(inserted = report.inserted, rejected = report.rejected, "seeded step");
            total.inserted += report.inserted;
            total.rejected += report.rejected;
            tokio::time::sleep(interval).await;
        }
        info!(inserted = total.inserted, rejected = total.rejected, "replayed recording");
        if once {
            return Ok(total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::temp_store;
    use serde_json::json;

    fn recording() -> Vec<Value> {
        vec![
            json!({"ue-id": "a", "measTimeStampRf": "t0", "DRB.UEThpDl": 1.0, "RF.serving.RSRP": -80.0, "RF.serving.RSRQ": -9.0}),
            json!({"ue-id": "b", "measTimeStampRf": "t0", "DRB.UEThpDl": 2.0, "RF.serving.RSRP": -81.0, "RF.serving.RSRQ": -9.0}),
            json!({"ue-id": "a", "measTimeStampRf": "t1", "DRB.UEThpDl": 3.0, "RF.serving.RSRP": -82.0, "RF.serving.RSRQ": -9.0}),
            json!({"ue-id": "c", "measTimeStampRf": "t0", "DRB.UEThpDl": 4.0}),
        ]
    }

    #[test]
    fn test_group_steps_preserves_first_seen_order() {
        let steps = group_steps(recording(), "measTimeStampRf");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].len(), 3);
        assert_eq!(steps[1].len(), 1);
        assert_eq!(steps[1][0]["DRB.UEThpDl"], json!(3.0));
    }

    #[test]
    fn test_replay_step_restamps_and_skips_invalid() -> Result<()> {
        let (_dir, store) = temp_store();
        let features = FeatureConfig::default();
        let steps = group_steps(recording(), "measTimeStampRf");
        let start = Utc::now();

        let report = replay_step(&store, "UEReports", &steps[0], &features, start)?;
        assert_eq!(report, SeedReport { inserted: 2, rejected: 1 });

        let batch = store.fetch_batch("UEReports", 0, start, 10, &features)?;
        assert_eq!(batch.samples.len(), 2);
        assert_eq!(batch.samples[0].timestamp, start_millis(start));
        assert_eq!(
            batch.samples[1].timestamp - batch.samples[0].timestamp,
            chrono::Duration::milliseconds(1)
        );
        Ok(())
    }

    #[test]
    fn test_load_jsonl_skips_blank_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ue.jsonl");
        std::fs::write(&path, "{\"ue-id\": \"a\"}\n\n{\"ue-id\": \"b\"}\n")?;

        let records = load_jsonl(&path)?;
        assert_eq!(records.len(), 2);

        std::fs::write(&path, "{\"ue-id\": \"a\"}\nnot json\n")?;
        let err = load_jsonl(&path).unwrap_err();
        assert!(err.to_string().contains(":2:"));
        Ok(())
    }

    #[tokio::test]
    async fn test_run_once_inserts_every_step() -> Result<()> {
        let (_dir, store) = temp_store();
        let steps = group_steps(recording(), "measTimeStampRf");

        let report = run(
            store.clone(),
            "UEReports".to_string(),
            steps,
            FeatureConfig::default(),
            Duration::from_millis(1),
            true,
        )
        .await?;
        assert_eq!(report, SeedReport { inserted: 3, rejected: 1 });
        Ok(())
    }

    /// Stored timestamps keep millisecond precision.
    fn start_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()).unwrap()
    }
}
