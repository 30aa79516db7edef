//! SQLite telemetry store -- UE reports in, classified anomalies out.

pub mod schema;
pub mod seed;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use rusqlite::types::Type;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{FeatureConfig, StoreConfig};
use crate::detect::cause::{BaselineProvider, BaselineQuery, BaselineRows};
use crate::detect::{AnomalyLabel, RetrievalError, Verdict};
use crate::telemetry::{format_timestamp, Sample};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path, timeout: Duration) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let busy_ms = timeout.as_millis();
    let manager = SqliteConnectionManager::file(path).with_init(move |c| {
        c.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = {busy_ms};"
        ))
    });

    let pool = R2D2Pool::builder()
        .connection_timeout(timeout)
        .build(manager)
        .with_context(|| format!("failed to open telemetry store {}", path.display()))?;

    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Samples read for one detection cycle.
#[derive(Debug, Default)]
pub struct FetchedBatch {
    pub samples: Vec<Sample>,
    /// Report id of each sample, aligned with `samples`.
    pub ids: Vec<i64>,
    /// Rows that failed ingestion validation and were left out.
    pub rejected: usize,
    /// Highest report id seen, including rejected rows.
    pub last_id: Option<i64>,
}

/// An anomaly previously written back to the store.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub id: Uuid,
    pub measurement: String,
    pub ue_id: String,
    pub measured_at: String,
    pub label: AnomalyLabel,
    pub degradation: Option<String>,
    pub sample: Value,
    pub created_at: String,
}

#[derive(Clone)]
pub struct TelemetryStore {
    pool: Pool,
    timeout: Duration,
}

impl TelemetryStore {
    pub fn new(pool: Pool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn open(cfg: &StoreConfig) -> Result<Self> {
        let timeout = Duration::from_millis(cfg.query_timeout_ms);
        Ok(Self::new(open_pool(&cfg.path, timeout)?, timeout))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Persist one UE report.
    pub fn insert_report(
        &self,
        measurement: &str,
        sample: &Sample,
        features: &FeatureConfig,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        let fields_json = serde_json::to_string(&sample.to_record(features))?;
        conn.execute(
            "INSERT INTO ue_reports (measurement, ue_id, measured_at, fields_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                measurement,
                sample.ue_id,
                format_timestamp(&sample.timestamp),
                fields_json
            ],
        )?;
        Ok(())
    }

    /// Reports newer than `after_id` measured at or after `since`, oldest first.
    pub fn fetch_batch(
        &self,
        measurement: &str,
        after_id: i64,
        since: DateTime<Utc>,
        limit: usize,
        features: &FeatureConfig,
    ) -> Result<FetchedBatch> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, fields_json FROM ue_reports
             WHERE measurement = ?1 AND id > ?2 AND measured_at >= ?3
             ORDER BY id ASC
             LIMIT ?4",
        )?;
        let rows: Vec<(i64, String)> = stmt
            .query_map(
                params![measurement, after_id, format_timestamp(&since), limit as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<Result<_, _>>()?;

        let mut batch = FetchedBatch::default();
        for (id, json) in rows {
            batch.last_id = Some(id);
            let parsed = serde_json::from_str::<Value>(&json)
                .map_err(|e| e.to_string())
                .and_then(|record| Sample::from_record(&record, features).map_err(|e| e.to_string()));
            match parsed {
                Ok(sample) => {
                    batch.samples.push(sample);
                    batch.ids.push(id);
                }
                Err(e) => {
                    warn!(id, error = %e, "rejecting stored report");
                    batch.rejected += 1;
                }
            }
        }
        Ok(batch)
    }

    /// Mark reports the scorer flagged, whatever their final label.
    pub fn mark_scorer_flagged(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut marked = 0;
        {
            let mut stmt = tx.prepare("UPDATE ue_reports SET scorer_flagged = 1 WHERE id = ?1")?;
            for id in ids {
                marked += stmt.execute([id])?;
            }
        }
        tx.commit().context("failed to mark flagged reports")?;
        Ok(marked)
    }

    /// Write back every row labelled anomalous. Returns the number written.
    ///
    /// Re-recording the same report is ignored.
    pub fn record_anomalies(
        &self,
        anomaly_measurement: &str,
        source_measurement: &str,
        rows: &[(&Sample, &Verdict)],
        features: &FeatureConfig,
    ) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let now = format_timestamp(&Utc::now());
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO anomalies (
                    id, measurement, source_measurement, ue_id, measured_at,
                    label, degradation, sample_json, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (sample, verdict) in rows.iter().filter(|(_, v)| v.label.is_anomalous()) {
                written += stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    anomaly_measurement,
                    source_measurement,
                    sample.ue_id,
                    format_timestamp(&sample.timestamp),
                    u8::from(verdict.label),
                    verdict.cause.to_field(),
                    serde_json::to_string(&sample.to_record(features))?,
                    now
                ])?;
            }
        }
        tx.commit().context("failed to commit anomalies")?;
        Ok(written)
    }

    /// Most recent anomalies, newest first.
    pub fn list_anomalies(&self, limit: usize) -> Result<Vec<AnomalyRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, measurement, ue_id, measured_at, label, degradation, sample_json, created_at
             FROM anomalies ORDER BY created_at DESC, measured_at DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: String = row.get(0)?;
            let label: u8 = row.get(4)?;
            let sample_json: String = row.get(6)?;
            Ok(AnomalyRecord {
                id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, Type::Text, e))?,
                measurement: row.get(1)?,
                ue_id: row.get(2)?,
                measured_at: row.get(3)?,
                label: AnomalyLabel::try_from(label).map_err(|e| conversion_error(4, Type::Integer, e))?,
                degradation: row.get(5)?,
                sample: serde_json::from_str(&sample_json).map_err(|e| conversion_error(6, Type::Text, e))?,
                created_at: row.get(7)?,
            })
        })?;

        let mut records = Vec::new();
        for r in rows {
            records.push(r.context("corrupt anomaly record")?);
        }
        Ok(records)
    }
}

/// Reject a stored column that does not decode into its domain type.
fn conversion_error(
    column: usize,
    ty: Type,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, ty, err.into())
}

impl BaselineProvider for TelemetryStore {
    /// Reports of one UE inside the lookback window, skipping any report the
    /// scorer flagged (in an earlier cycle or listed in `query.exclude`) and
    /// any report recorded as anomalous.
    fn query(&self, query: &BaselineQuery) -> Result<BaselineRows, RetrievalError> {
        let conn = self.pool.get_timeout(self.timeout).map_err(|e| {
            debug!(error = %e, "no store connection for baseline query");
            RetrievalError::Timeout(self.timeout)
        })?;
        let cutoff = format_timestamp(&(Utc::now() - query.lookback));

        let mut stmt = conn
            .prepare(
                "SELECT r.measured_at, r.fields_json FROM ue_reports r
                 WHERE r.measurement = ?1 AND r.ue_id = ?2 AND r.measured_at >= ?3
                 AND r.scorer_flagged = 0
                 AND NOT EXISTS (
                     SELECT 1 FROM anomalies a
                     WHERE a.source_measurement = r.measurement
                     AND a.ue_id = r.ue_id
                     AND a.measured_at = r.measured_at
                     AND a.label > 0
                 )
                 ORDER BY r.measured_at ASC",
            )
            .map_err(|e| RetrievalError::Query(e.to_string()))?;

        let raw: Vec<(String, String)> = stmt
            .query_map(params![query.measurement, query.ue_id, cutoff], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .and_then(|rows| rows.collect())
            .map_err(|e| RetrievalError::Query(e.to_string()))?;

        let excluded: HashSet<String> = query.exclude.iter().map(format_timestamp).collect();
        let mut rows = Vec::with_capacity(raw.len());
        for (measured_at, json) in raw {
            if excluded.contains(&measured_at) {
                continue;
            }
            let fields: Map<String, Value> =
                serde_json::from_str(&json).map_err(|e| RetrievalError::Malformed(e.to_string()))?;
            rows.push(
                query
                    .metrics
                    .iter()
                    .map(|m| fields.get(m).and_then(Value::as_f64))
                    .collect(),
            );
        }

        Ok(BaselineRows {
            columns: query.metrics.clone(),
            rows,
        })
    }
}
