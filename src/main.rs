//! Synheart Session Agent CLI
//!
//! Delivers behavioral snapshots and reports session risk.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use synheart_session_agent::{
    config::Config,
    reconcile::Reconciler,
    report::RiskReport,
    risk::RiskClassifier,
    stats::DeliveryStats,
    store::{JsonFileStore, SessionStore},
    VERSION,
};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "gateway")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "gateway")]
use std::sync::Arc;
#[cfg(feature = "gateway")]
use std::time::Duration;
#[cfg(feature = "gateway")]
use synheart_session_agent::{
    queue::{DeliveryChannel, DeliveryQueue},
    snapshot::MetricSnapshot,
    HttpTransport,
};

#[derive(Parser)]
#[command(name = "synheart-session")]
#[command(author = "Synheart")]
#[command(version = VERSION)]
#[command(about = "Reliable delivery and risk scoring for behavioral session telemetry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deliver snapshots from a file to the collection endpoint
    #[cfg(feature = "gateway")]
    Send {
        /// JSON array or JSON Lines file of snapshots
        #[arg(long, short)]
        input: PathBuf,

        /// Collection endpoint (overrides config)
        #[arg(long)]
        endpoint: Option<String>,

        /// Bearer token (overrides config)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Reconcile stored rows and print the risk report
    Reconcile {
        /// JSON array or JSON Lines file of session rows (defaults to the local store)
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Only print this session
        #[arg(long)]
        session: Option<String>,
    },

    /// Run the collection server
    #[cfg(feature = "server")]
    Serve {
        /// Port to bind on 127.0.0.1 (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Keep rows in memory instead of the local store file
        #[arg(long)]
        memory: bool,
    },

    /// Show delivery statistics and store contents
    Status,

    /// Show configuration
    Config,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        #[cfg(feature = "gateway")]
        Commands::Send {
            input,
            endpoint,
            api_key,
        } => cmd_send(&input, endpoint, api_key),
        Commands::Reconcile { input, session } => cmd_reconcile(input.as_deref(), session.as_deref()),
        #[cfg(feature = "server")]
        Commands::Serve { port, memory } => cmd_serve(port, memory),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")
}

/// Read a JSON array, or one JSON value per line.
fn read_values(path: &Path) -> anyhow::Result<Vec<serde_json::Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if content.trim_start().starts_with('[') {
        return serde_json::from_str(&content)
            .with_context(|| format!("{} is not a JSON array", path.display()));
    }

    let mut values = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => values.push(value),
            Err(e) => tracing::warn!(line = line_no + 1, "Skipping malformed line: {e}"),
        }
    }
    Ok(values)
}

#[cfg(feature = "gateway")]
fn cmd_send(input: &Path, endpoint: Option<String>, api_key: Option<String>) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let snapshots: Vec<MetricSnapshot> = read_values(input)?
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| match serde_json::from_value(value) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(index = i, "Skipping invalid snapshot: {e}");
                None
            }
        })
        .collect();

    let mut gateway = config.gateway.clone();
    if let Some(endpoint) = endpoint {
        gateway.endpoint = endpoint;
    }
    if api_key.is_some() {
        gateway.api_key = api_key;
    }

    println!("Synheart Session Agent v{VERSION}");
    println!();
    println!("Endpoint: {}", gateway.url());
    println!("Snapshots: {}", snapshots.len());
    println!("Batch size: {}", config.delivery.batch_size);
    println!();
    println!("Press Ctrl+C to stop waiting");
    println!();

    let transport = HttpTransport::new(gateway)?;
    let stats = Arc::new(DeliveryStats::with_persistence(config.stats_path()));

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let channel = DeliveryChannel::new();
    let pending = runtime()?.block_on(async {
        let queue = channel.install(DeliveryQueue::with_stats(
            transport,
            config.delivery.clone(),
            stats.clone(),
        ));
        for snapshot in snapshots {
            if let Err(e) = queue.enqueue(snapshot) {
                tracing::warn!("Snapshot not queued: {e}");
            }
        }

        while running.load(Ordering::SeqCst) && (queue.queue_size() > 0 || queue.is_processing()) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        queue.queue_size()
    });
    channel.teardown();

    if pending > 0 {
        println!("Stopped with {pending} snapshot(s) still pending.");
    }
    println!("{}", stats.summary(pending));

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save delivery stats: {e}");
    }
    Ok(())
}

fn cmd_reconcile(input: Option<&Path>, session: Option<&str>) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    let reconciler = Reconciler::from_config(&config.reconcile);
    let classifier = RiskClassifier::from_thresholds(&config.risk);

    let reconciliation = match input {
        Some(path) => reconciler.reconcile_values(&read_values(path)?),
        None => {
            let store = JsonFileStore::open(config.store_path())?;
            reconciler.reconcile(&store.records()?)
        }
    };
    let report = RiskReport::from_reconciliation(reconciliation, &classifier);

    let json = match session {
        Some(id) => {
            let found = report
                .session(id)
                .with_context(|| format!("Unknown session: {id}"))?;
            serde_json::to_string_pretty(found)?
        }
        None => serde_json::to_string_pretty(&report)?,
    };
    println!("{json}");
    Ok(())
}

#[cfg(feature = "server")]
fn cmd_serve(port: Option<u16>, memory: bool) -> anyhow::Result<()> {
    use synheart_session_agent::server::{run, ServerConfig};

    let config = Config::load().unwrap_or_default();
    let mut server_config = ServerConfig::new(port.unwrap_or(config.server_port))
        .with_reconcile(config.reconcile.clone())
        .with_thresholds(config.risk.clone());
    if !memory {
        config.ensure_directories()?;
        server_config = server_config.with_store_path(config.store_path());
    }

    runtime()?.block_on(async {
        let (addr, shutdown_tx) = run(server_config).await?;

        println!("Synheart Session Agent v{VERSION}");
        println!("Listening on http://{addr}");
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(());
        Ok::<(), anyhow::Error>(())
    })
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Synheart Session Agent Status");
    println!("=============================");
    println!();

    println!("Configuration:");
    #[cfg(feature = "gateway")]
    println!("  Endpoint: {}", config.gateway.url());
    println!("  Batch size: {}", config.delivery.batch_size);
    println!("  Retry attempts: {}", config.delivery.retry_attempts);
    println!("  Retry delay: {}ms", config.delivery.retry_delay.as_millis());
    println!("  Dedup bucket: {}s", config.reconcile.bucket_secs);
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let stats = DeliveryStats::with_persistence(stats_path);
        let s = stats.snapshot();
        println!("Cumulative Delivery Statistics:");
        println!("  Snapshots enqueued: {}", s.snapshots_enqueued);
        println!("  Snapshots delivered: {}", s.snapshots_delivered);
        println!("  Batches delivered: {}", s.batches_delivered);
        println!("  Failed attempts: {}", s.failed_attempts);
        println!("  Batches requeued: {}", s.batches_requeued);
        println!("  Snapshots dropped: {}", s.snapshots_dropped);
    } else {
        println!("No delivery statistics yet.");
    }
    println!();

    let store_path = config.store_path();
    if store_path.exists() {
        let store = JsonFileStore::open(store_path.clone())?;
        let records = store.records()?;
        let report = RiskReport::build(
            &records,
            &Reconciler::from_config(&config.reconcile),
            &RiskClassifier::from_thresholds(&config.risk),
        );
        println!("Session Store ({}):", store_path.display());
        println!("  Rows: {}", records.len());
        println!("  Sessions: {}", report.summary.total_sessions);
        println!(
            "  High / Medium / Low: {} / {} / {}",
            report.summary.high_risk, report.summary.medium_risk, report.summary.low_risk
        );
    } else {
        println!("No local session store.");
    }

    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
#[cfg(feature = "gateway")]
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
