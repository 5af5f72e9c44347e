//! promo-send - Background daemon for campaign publishing
//!
//! Polls the job table and publishes every campaign job that is due, then
//! completes finished campaigns and returns abandoned claims to the queue.

use anyhow::Context;
use clap::Parser;
use libpromocast::logging::LoggingConfig;
use libpromocast::platforms::create_platforms;
use libpromocast::{CampaignService, Config, Database, DispatchReport, Dispatcher, PromocastError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "promo-send")]
#[command(version)]
#[command(about = "Background daemon for campaign publishing")]
#[command(long_about = "\
promo-send - Background daemon for campaign publishing

DESCRIPTION:
    promo-send is a long-running daemon that publishes the jobs of active
    Promocast campaigns when they fall due.

    Each poll claims every due job, publishes it to all connected accounts
    of the campaign owner on the job's platform, and records the outcome.
    Failures caused by expired tokens, rate limits or network trouble put
    the job back in the queue for the next poll.

    Several promo-send processes may share one database; a job is only ever
    attempted by the process that claimed it.

USAGE:
    # Run in foreground (logs to stderr)
    promo-send

    # Run with custom poll interval
    promo-send --poll-interval 30

    # Run a single poll and print its report as JSON
    promo-send --once --json

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current poll)

CONFIGURATION:
    Configuration file: ~/.config/promocast/config.toml

    [dispatch]
    poll_interval = 60        # seconds between polls
    attempt_timeout = \"30s\"   # bound on a single provider call
    expiry_skew = 60          # skip tokens expiring this soon (seconds)
    stale_claim_after = 900   # requeue jobs stuck in publishing (seconds)

    Override with environment variables:
        PROMOCAST_CONFIG    - Path to config file
        PROMOCAST_DB_PATH   - Path to database file

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run a single poll and exit
    #[arg(long)]
    once: bool,

    /// Print each poll's report to stdout as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<PromocastError>()
            .map(PromocastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let registry = create_platforms(&config)?;
    let dispatcher = Dispatcher::from_config(db.clone(), registry, &config.dispatch)?;
    let service = CampaignService::new(db);

    info!("promo-send daemon starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval = cli.poll_interval.unwrap_or(config.dispatch.poll_interval).max(1);
    let stale_after = config.dispatch.stale_claim_after;

    if cli.once {
        let report = tick(&dispatcher, &service, stale_after).await?;
        emit(&report, cli.json)?;
        info!("promo-send: processed due jobs once, exiting");
    } else {
        info!("Poll interval: {}s", poll_interval);
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping daemon loop");
                break;
            }

            match tick(&dispatcher, &service, stale_after).await {
                Ok(report) => emit(&report, cli.json)?,
                Err(e) => error!("Error dispatching jobs: {}", e),
            }

            // Sleep until next poll (check shutdown every second)
            for _ in 0..poll_interval {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    info!("promo-send daemon stopped");
    Ok(())
}

/// One poll: recover abandoned claims, dispatch, then close finished campaigns
async fn tick(
    dispatcher: &Dispatcher,
    service: &CampaignService,
    stale_after: i64,
) -> libpromocast::Result<DispatchReport> {
    let now = chrono::Utc::now().timestamp();

    dispatcher.recover_stale_claims(now, stale_after).await?;
    let report = dispatcher.run_due_jobs(now).await?;
    service.complete_finished().await?;

    Ok(report)
}

fn emit(report: &DispatchReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    }
    Ok(())
}

#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    Ok(())
}
