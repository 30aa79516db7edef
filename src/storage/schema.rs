//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS ue_reports (
            id INTEGER PRIMARY KEY,
            measurement TEXT NOT NULL,
            ue_id TEXT NOT NULL,
            measured_at TEXT NOT NULL,
            fields_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS anomalies (
            id TEXT PRIMARY KEY,
            measurement TEXT NOT NULL,
            source_measurement TEXT NOT NULL,
            ue_id TEXT NOT NULL,
            measured_at TEXT NOT NULL,
            label INTEGER NOT NULL,
            degradation TEXT,
            sample_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ue_reports_ue
            ON ue_reports(measurement, ue_id, measured_at);
        CREATE INDEX IF NOT EXISTS idx_ue_reports_time
            ON ue_reports(measurement, measured_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_anomalies_report
            ON anomalies(source_measurement, ue_id, measured_at);
        CREATE INDEX IF NOT EXISTS idx_anomalies_created ON anomalies(created_at);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    // v2: remember reports the scorer flagged, so they never count as normal history.
    if version < 2 {
        conn.execute_batch(
            "ALTER TABLE ue_reports ADD COLUMN scorer_flagged INTEGER NOT NULL DEFAULT 0;
            INSERT OR IGNORE INTO schema_version (version) VALUES (2);",
        )?;
    }

    Ok(())
}
