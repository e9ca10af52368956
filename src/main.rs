//! f1-telemetry-relay - OpenF1 to AMQP live timing bridge
//!
//! Polls car telemetry and lap data for a roster of drivers and publishes
//! every record, tagged with its driver number, to durable broker queues.
//!
//! # Usage
//!
//! ```bash
//! # Relay the default roster (44, 1, 16) to a local RabbitMQ
//! cargo run --release
//!
//! # Custom roster and cadence, status endpoint on :8080
//! ./f1-telemetry-relay --drivers 44,1,16,63 --interval-secs 3 --status-addr 0.0.0.0:8080
//!
//! # One cycle without a broker, messages go to the log
//! ./f1-telemetry-relay --once --dry-run
//!
//! # Print the effective configuration
//! ./f1-telemetry-relay --config relay.toml check-config
//! ```
//!
//! # Environment Variables
//!
//! - `F1_RELAY_CONFIG`: Path to the TOML config file
//! - `F1_RELAY_DRIVERS`, `F1_RELAY_INTERVAL_SECS`, `F1_RELAY_API_BASE`,
//!   `F1_RELAY_AMQP_URL`, `F1_RELAY_SESSION`, `F1_RELAY_STATUS_ADDR`:
//!   override the matching config values
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use f1_telemetry_relay::api::{create_app, StatusState};
use f1_telemetry_relay::broker::amqp::redact_url;
use f1_telemetry_relay::broker::{AmqpPublisher, LogPublisher, Publisher};
use f1_telemetry_relay::config::{ConfigOverrides, RelayConfig, SessionSelector};
use f1_telemetry_relay::relay::{Relay, RelayStats};
use f1_telemetry_relay::types::DriverNumber;
use f1_telemetry_relay::upstream::{select_session, OpenF1Client};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "f1-telemetry-relay")]
#[command(about = "Relay OpenF1 live telemetry to AMQP queues")]
#[command(version)]
struct CliArgs {
    /// Path to relay config TOML (default: ./relay_config.toml if present)
    #[arg(long, env = "F1_RELAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Comma-separated driver numbers, in publish order
    #[arg(long, env = "F1_RELAY_DRIVERS", value_delimiter = ',', global = true)]
    drivers: Option<Vec<DriverNumber>>,

    /// Seconds to sleep between cycles
    #[arg(long, env = "F1_RELAY_INTERVAL_SECS", global = true)]
    interval_secs: Option<u64>,

    /// Upstream API base URL
    #[arg(long, env = "F1_RELAY_API_BASE", global = true)]
    api_base: Option<String>,

    /// AMQP broker URL
    #[arg(long, env = "F1_RELAY_AMQP_URL", global = true)]
    amqp_url: Option<String>,

    /// Session to follow: "latest", "pinned", or a session key
    #[arg(long, env = "F1_RELAY_SESSION", global = true)]
    session: Option<SessionSelector>,

    /// Serve the status API on this address (e.g. 0.0.0.0:8080)
    #[arg(long, env = "F1_RELAY_STATUS_ADDR", global = true)]
    status_addr: Option<String>,

    /// Run a single cycle, then exit
    #[arg(long)]
    once: bool,

    /// Log messages instead of publishing them; no broker connection
    #[arg(long)]
    dry_run: bool,

    /// Log output format
    #[arg(long, env = "F1_RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Load and validate the configuration, then print it as TOML
    CheckConfig,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl CliArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            drivers: self.drivers.clone(),
            interval_secs: self.interval_secs,
            api_base: self.api_base.clone(),
            session: self.session,
            amqp_url: self.amqp_url.clone(),
            status_addr: self.status_addr.clone(),
        }
    }
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // Logs go to stderr so `check-config` output stays clean on stdout.
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

// ============================================================================
// Task Supervisor
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Relay,
    StatusServer,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Relay => write!(f, "Relay"),
            TaskName::StatusServer => write!(f, "StatusServer"),
        }
    }
}

/// Spawn the status HTTP server task into the JoinSet.
fn spawn_status_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    state: StatusState,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[StatusServer] Task starting");

        let result = axum::serve(listener, create_app(state))
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
            })
            .await;

        match result {
            Ok(()) => {
                info!("[StatusServer] Graceful shutdown complete");
                Ok(TaskName::StatusServer)
            }
            Err(e) => {
                error!("[StatusServer] Server error: {}", e);
                Err(anyhow::anyhow!("Status server error: {}", e))
            }
        }
    });
}

/// Bind the status listener up front so a busy port fails before the broker
/// connection is opened.
async fn bind_status_listener(addr: Option<&str>) -> Result<Option<tokio::net::TcpListener>> {
    let Some(addr) = addr else {
        return Ok(None);
    };
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status server to {addr}"))?;
    Ok(Some(listener))
}

/// Monitor tasks until shutdown or failure.
///
/// Any task failing cancels the rest. After cancellation the remaining tasks
/// are drained so the relay can finish its cycle and close the broker.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut first_error: Option<anyhow::Error> = None;

    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => {
                info!("Supervisor: Task {} completed", task_name);
                if !cancel_token.is_cancelled() {
                    // Relay and server only stop on shutdown; take others down too.
                    cancel_token.cancel();
                }
            }
            Ok(Err(e)) => {
                error!("Supervisor: Task failed with error: {:#}", e);
                cancel_token.cancel();
                first_error.get_or_insert(e);
            }
            Err(e) => {
                error!("Supervisor: Task panicked: {}", e);
                cancel_token.cancel();
                first_error.get_or_insert_with(|| anyhow::anyhow!("Task panicked: {}", e));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Complete on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_format);

    let mut relay_config = RelayConfig::load(args.config.as_deref())
        .context("Failed to load relay configuration")?;
    relay_config.apply_overrides(&args.overrides());
    relay_config
        .validate()
        .context("Invalid relay configuration")?;

    if let Some(SubCommand::CheckConfig) = args.command {
        print!("{}", relay_config.to_toml()?);
        info!("Configuration OK");
        return Ok(());
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  F1 Telemetry Relay v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("   Upstream: {}", relay_config.upstream.base_url);
    info!("   Drivers:  {:?}", relay_config.relay.drivers);
    info!("   Interval: {}s", relay_config.relay.interval_secs);
    info!(
        "   Queues:   {} / {}",
        relay_config.broker.telemetry_queue, relay_config.broker.lap_queue
    );

    // Graceful shutdown via Ctrl+C / SIGTERM
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, finishing current cycle...");
        shutdown_token.cancel();
    });

    let status_listener = if args.once {
        None
    } else {
        bind_status_listener(relay_config.status.addr.as_deref()).await?
    };

    let mut client = OpenF1Client::from_config(&relay_config.upstream)
        .context("Failed to build upstream HTTP client")?;
    let session = select_session(&mut client, relay_config.upstream.session).await;
    info!("   Session:  {}", session);

    let publisher: Box<dyn Publisher> = if args.dry_run {
        info!("   Broker:   dry-run (messages are logged, not published)");
        Box::new(LogPublisher::new())
    } else {
        info!("   Broker:   {}", redact_url(&relay_config.broker.url));
        let amqp = AmqpPublisher::connect(&relay_config.broker.url, relay_config.broker.publisher_confirms)
            .await
            .context("Failed to connect to broker")?;
        Box::new(amqp)
    };

    let mut stats = RelayStats::new(&relay_config);
    stats.set_session(session.to_string());
    let stats = stats.shared();

    let relay = Relay::new(&relay_config, client, publisher, stats.clone(), cancel_token.clone());

    if args.once {
        let report = relay.run_once().await?;
        info!(
            published = report.published(),
            fetch_failures = report.fetch_failures(),
            "Single cycle complete"
        );
        return Ok(());
    }

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    if let Some(listener) = status_listener {
        if let Ok(addr) = listener.local_addr() {
            info!("   Status:   http://{}/health", addr);
        }
        spawn_status_server(&mut task_set, listener, StatusState::new(stats), cancel_token.clone());
    }

    task_set.spawn(async move {
        info!("[Relay] Task starting");
        let summary = relay.run().await?;
        info!(
            "[Relay] Stopped after {} cycles, {} messages published",
            summary.cycles, summary.published
        );
        Ok(TaskName::Relay)
    });

    run_supervisor(&mut task_set, cancel_token).await?;

    info!("✓ Relay shutdown complete");
    Ok(())
}
