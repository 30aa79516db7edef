//! TOML configuration for ranguard.
//!
//! Every section carries compiled-in defaults so a partial (or empty) file is
//! valid. The config file path may be overridden with `RANGUARD_CONFIG`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "RANGUARD_CONFIG";

const SYSTEM_CONFIG_PATH: &str = "/etc/ranguard/ranguard.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the detector process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RanConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RanConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in the `RANGUARD_CONFIG` environment variable.
    /// 2. `/etc/ranguard/ranguard.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "RANGUARD_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject configurations the detector cannot run with.
    pub fn validate(&self) -> Result<()> {
        let pct = self.detection.throughput_threshold_pct;
        if !(0.0..=100.0).contains(&pct) {
            bail!("detection.throughput_threshold_pct must be within 0..=100, got {pct}");
        }
        if self.detection.lookback_hours <= 0 {
            bail!(
                "detection.lookback_hours must be positive, got {}",
                self.detection.lookback_hours
            );
        }
        if self.detection.batch_limit == 0 {
            bail!("detection.batch_limit must be at least 1");
        }
        if self.detection.batch_window_secs <= 0 {
            bail!(
                "detection.batch_window_secs must be positive, got {}",
                self.detection.batch_window_secs
            );
        }
        if self.detection.poll_interval_ms == 0 {
            bail!("detection.poll_interval_ms must be at least 1");
        }
        if self.store.measurement.is_empty() || self.store.anomaly_measurement.is_empty() {
            bail!("store measurement names must not be empty");
        }
        for (key, value) in self.features.columns() {
            if value.is_empty() {
                bail!("features.{key} must name a column");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Telemetry store location and measurement names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: PathBuf,
    /// Measurement holding incoming UE reports.
    pub measurement: String,
    /// Measurement that classified anomalies are written back to.
    pub anomaly_measurement: String,
    /// Upper bound on waiting for a store connection (milliseconds).
    pub query_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/ranguard.db"),
            measurement: "UEReports".to_string(),
            anomaly_measurement: "AD".to_string(),
            query_timeout_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// Column names of the UE report fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// UE (device) identifier.
    pub ue: String,
    /// Report timestamp.
    pub timestamp: String,
    /// Downlink throughput.
    pub thpt: String,
    pub rsrp: String,
    pub rsrq: String,
    pub rssinr: String,
    /// PRB usage.
    pub prb_usage: String,
}

impl FeatureConfig {
    /// All configured column names, keyed by their config key.
    pub fn columns(&self) -> [(&'static str, &str); 7] {
        [
            ("ue", self.ue.as_str()),
            ("timestamp", self.timestamp.as_str()),
            ("thpt", self.thpt.as_str()),
            ("rsrp", self.rsrp.as_str()),
            ("rsrq", self.rsrq.as_str()),
            ("rssinr", self.rssinr.as_str()),
            ("prb_usage", self.prb_usage.as_str()),
        ]
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            ue: "ue-id".to_string(),
            timestamp: "measTimeStampRf".to_string(),
            thpt: "DRB.UEThpDl".to_string(),
            rsrp: "RF.serving.RSRP".to_string(),
            rsrq: "RF.serving.RSRQ".to_string(),
            rssinr: "RF.serving.RSSINR".to_string(),
            prb_usage: "RRU.PrbUsedDl".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Detection thresholds and cycle pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Percentage below the baseline maximum at which throughput counts as degraded.
    pub throughput_threshold_pct: f64,
    /// Baseline history window (hours).
    pub lookback_hours: i64,
    /// How far back a detection cycle reads fresh samples (seconds).
    pub batch_window_secs: i64,
    /// Maximum number of samples per cycle.
    pub batch_limit: usize,
    /// Delay between detection cycles in `serve` mode (milliseconds).
    pub poll_interval_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            throughput_threshold_pct: 30.0,
            lookback_hours: 240,
            batch_window_secs: 10,
            batch_limit: 1000,
            poll_interval_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Location of the pre-trained model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding `model.json`, `num_params.json` and `scale.json`.
    pub dir: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
