use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ranguard::config::RanConfig;
use ranguard::detect::cause::CauseEngine;
use ranguard::detect::engine::DetectionCycle;
use ranguard::storage::{seed, TelemetryStore};
use ranguard::telemetry::Metric;

#[derive(Parser)]
#[command(
    name = "ranguard",
    about = "Anomaly detection and root-cause attribution for RAN UE telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $RANGUARD_CONFIG, then /etc/ranguard/ranguard.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detector until Ctrl-C
    Serve,

    /// Run a single detection cycle over recent reports
    Detect {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Replay recorded UE reports (JSON lines) into the store
    Seed {
        /// Recording to replay
        #[arg(long)]
        file: PathBuf,

        /// Pause between replayed steps
        #[arg(long, default_value_t = seed::DEFAULT_STEP_INTERVAL.as_millis() as u64)]
        interval_ms: u64,

        /// Stop after one pass instead of looping
        #[arg(long)]
        once: bool,
    },

    /// Show the baseline maxima used for one UE
    Baseline {
        /// UE identifier
        #[arg(long)]
        ue: String,
    },

    /// List recently written anomalies
    Anomalies {
        /// Maximum number of records
        #[arg(long, default_value = "20")]
        limit: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(config: &RanConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    // Logs go to stderr so command output on stdout stays parseable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RanConfig::load(path)?,
        None => RanConfig::load_or_default(),
    };
    init_tracing(&config);
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Serve => {
            tracing::info!("Starting ranguard detector");
            ranguard::serve(config).await?;
        }
        Commands::Detect { json } => {
            let store = TelemetryStore::open(&config.store)?;
            let cycle = DetectionCycle::from_config(&config, store)
                .context("failed to load anomaly model")?;
            let report = tokio::task::spawn_blocking(move || cycle.run_once()).await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Scanned {} report(s): {} anomalous, {} written, {} malformed, {} rejected",
                    report.scanned, report.flagged, report.written, report.malformed, report.rejected
                );
                if !report.rows.is_empty() {
                    println!();
                    println!("{:<16} | {:<24} | {:<5} | Degradation", "UE", "Measured", "Label");
                    println!("{:-<16}-|-{:-<24}-|-{:-<5}-|-{:-<20}", "", "", "", "");
                    for row in &report.rows {
                        println!(
                            "{:<16} | {:<24} | {:<5} | {}",
                            row.ue_id,
                            row.timestamp.to_rfc3339(),
                            u8::from(row.label),
                            row.degradation.as_deref().unwrap_or("-")
                        );
                    }
                }
            }
        }
        Commands::Seed {
            file,
            interval_ms,
            once,
        } => {
            let store = TelemetryStore::open(&config.store)?;
            let records = seed::load_jsonl(&file)?;
            let steps = seed::group_steps(records, &config.features.timestamp);
            tracing::info!(file = %file.display(), steps = steps.len(), "Seeding telemetry store");

            let replay = seed::run(
                store,
                config.store.measurement.clone(),
                steps,
                config.features.clone(),
                Duration::from_millis(interval_ms),
                once,
            );
            tokio::select! {
                report = replay => {
                    let report = report?;
                    println!("Inserted {} report(s), rejected {}.", report.inserted, report.rejected);
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Seeding interrupted");
                }
            }
        }
        Commands::Baseline { ue } => {
            let store = TelemetryStore::open(&config.store)?;
            let engine = CauseEngine::new(
                config.features.clone(),
                config.store.measurement.clone(),
                config.detection.throughput_threshold_pct,
            )
            .with_lookback(chrono::Duration::hours(config.detection.lookback_hours));

            match engine.baseline_for(&ue, &store)? {
                None => println!("No usable history for UE '{}'.", ue),
                Some(baseline) => {
                    println!(
                        "Baseline for UE '{}' ({} report(s), last {}h):",
                        ue,
                        baseline.sample_count,
                        engine.lookback().num_hours()
                    );
                    for metric in Metric::MONITORED {
                        println!("  {:<12} max {}", metric.label(), baseline.max_of(metric));
                    }
                }
            }
        }
        Commands::Anomalies { limit, json } => {
            let store = TelemetryStore::open(&config.store)?;
            let records = store.list_anomalies(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No anomalies recorded.");
            } else {
                println!("{:<16} | {:<24} | {:<5} | Degradation", "UE", "Measured", "Label");
                println!("{:-<16}-|-{:-<24}-|-{:-<5}-|-{:-<20}", "", "", "", "");
                for r in &records {
                    println!(
                        "{:<16} | {:<24} | {:<5} | {}",
                        r.ue_id,
                        r.measured_at,
                        u8::from(r.label),
                        r.degradation.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    }

    Ok(())
}
