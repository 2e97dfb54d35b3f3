// arbiter/src/main.rs
//
// Arbiter daemon.
//
// Usage:
//   arbiter /etc/arbiter/arbiter.yaml
//   arbiter /etc/arbiter/arbiter.yaml --check-config
//   RUST_LOG=arbiter=debug arbiter arbiter.yaml

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use arbiter::analyzers::Catalog;
use arbiter::config::Config;
use arbiter::engine::coordinator::Coordinator;
use arbiter::trace::TxTrace;
use arbiter::wire_api::WireServer;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "arbiter",
    about   = "Decision engine coordinating pluggable attack-detection analyzers behind a WAF",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(help = "Path to the YAML configuration file")]
    config: PathBuf,

    #[arg(long, help = "Validate the configuration and load plugins, then exit")]
    check_config: bool,

    #[arg(long, default_value = "30", help = "Seconds between stats log lines (0 = off)")]
    stats_every: u64,
}

// ── Logging ───────────────────────────────────────────────────────────────────

// Events tagged with `tx` are also copied into `trace` for the check reply.
fn init_logging(level: &str, log_path: Option<&Path>, trace: &Arc<TxTrace>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("arbiter={}", level)))?;

    let (to_file, to_stderr) = match log_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)
                .with_context(|| format!("could not open log file {}", path.display()))?;
            let layer = fmt::layer().compact().with_ansi(false).with_writer(std::sync::Mutex::new(file));
            (Some(layer), None)
        }
        None => (None, Some(fmt::layer().compact().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(to_file)
        .with(to_stderr)
        .with(trace.layer())
        .init();
    Ok(())
}

async fn stats_loop(coordinator: Arc<Coordinator>, every: Duration, start: Instant) {
    loop {
        tokio::time::sleep(every).await;
        let s = coordinator.stats.snapshot();
        info!(
            uptime_s   = start.elapsed().as_secs(),
            open       = coordinator.n_open(),
            dispatched = s.dispatched,
            failed     = s.failed,
            recorded   = s.recorded,
            decided    = s.decided,
            abandoned  = s.abandoned,
            rejected   = s.rejected,
            "stats"
        );
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("could not load configuration from {}", cli.config.display()))?;
    // --check-config never touches the log file
    let log_path = if cli.check_config { None } else { config.log_path.as_deref() };
    let trace = TxTrace::new();
    init_logging(&config.log_level, log_path, &trace)?;
    info!("configuration loaded from {}", cli.config.display());

    let coordinator = arbiter::build(&config, &Catalog::builtin());
    info!(
        models    = ?coordinator.registry().model_ids(),
        decisions = ?coordinator.registry().decision_ids(),
        "plugins loaded"
    );

    if cli.check_config {
        println!("configuration OK");
        return Ok(());
    }

    if cli.stats_every > 0 {
        tokio::spawn(stats_loop(Arc::clone(&coordinator), Duration::from_secs(cli.stats_every), Instant::now()));
    }

    // Abandoned-transaction reaper
    let ttl = Duration::from_secs(config.transaction_ttl_secs.max(1));
    tokio::spawn(Arc::clone(&coordinator).housekeeping_loop(ttl));
    tokio::spawn(Arc::clone(&trace).housekeeping_loop(ttl));

    let check_timeout = config.check_timeout_ms.map(Duration::from_millis);
    let server = WireServer::with_trace(coordinator, check_timeout, Some(trace));
    let addr   = config.listen_addr();

    tokio::select! {
        res = server.serve(&addr) => res?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
