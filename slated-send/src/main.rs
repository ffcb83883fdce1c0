//! slated-send - Background daemon for scheduled-post dispatch
//!
//! Polls the queue for due items, publishes them through the configured
//! platform adapters, and periodically refreshes access tokens that are
//! approaching expiry.

use clap::Parser;
use libslated::platforms::{PlatformAdapter, ThreadsAdapter, XAdapter};
use libslated::{Config, Database, Dispatcher, Result, SlatedError, TokenRefresher};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "slated-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled-post dispatch")]
#[command(long_about = "\
slated-send - Background daemon for scheduled-post dispatch

DESCRIPTION:
    slated-send is a long-running daemon that monitors the Slated queue and
    publishes scheduled content when its time arrives.

    It polls the database at regular intervals, dispatches due items
    sequentially, records terminal outcomes per item, and proactively
    refreshes platform access tokens that are approaching expiry.

USAGE:
    # Run in foreground (logs to stderr)
    slated-send

    # Run with custom poll interval
    slated-send --poll-interval 30

    # Enable verbose logging
    slated-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current batch)

CONFIGURATION:
    Configuration file: ~/.config/slated/config.toml

    [dispatch]
    poll_interval = 60  # seconds between polls
    batch_limit = 50    # max items per cycle

    [refresh]
    interval = 86400    # seconds between refresh cycles
    lookahead_days = 7  # refresh tokens expiring within this window

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Authentication error
    3 - Configuration or validation error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to check for due items (default: 60)")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run one dispatch and refresh cycle, then exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("slated-send failed: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let adapters = build_adapters(&config)?;

    if adapters.is_empty() {
        warn!("No platforms configured; due items will fail at dispatch");
    }

    info!("slated-send daemon starting");

    let dispatcher = Dispatcher::new(db.clone(), adapters.clone(), config.dispatch.batch_limit);
    let refresher = TokenRefresher::new(db, adapters, config.refresh.lookahead_days);

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval = cli.poll_interval.unwrap_or(config.dispatch.poll_interval);
    info!("Poll interval: {}s", poll_interval);

    if cli.once {
        dispatch_cycle(&dispatcher).await;
        refresh_cycle(&refresher).await;
        info!("slated-send: processed once, exiting");
    } else {
        run_daemon_loop(
            &dispatcher,
            &refresher,
            poll_interval,
            config.refresh.interval,
            shutdown,
        )
        .await;
    }

    info!("slated-send daemon stopped");
    Ok(())
}

/// Construct an adapter for every platform with credentials in the config
fn build_adapters(config: &Config) -> Result<HashMap<libslated::Platform, Arc<dyn PlatformAdapter>>> {
    let mut adapters: HashMap<libslated::Platform, Arc<dyn PlatformAdapter>> = HashMap::new();

    if let Some(x) = &config.x {
        let adapter = XAdapter::new(x).map_err(SlatedError::Platform)?;
        adapters.insert(libslated::Platform::X, Arc::new(adapter));
    }
    if let Some(threads) = &config.threads {
        let adapter = ThreadsAdapter::new(threads).map_err(SlatedError::Platform)?;
        adapters.insert(libslated::Platform::Threads, Arc::new(adapter));
    }

    Ok(adapters)
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| SlatedError::Validation(format!("Signal setup failed: {}", e)))?;

    let shutdown_clone = shutdown.clone();
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown_clone.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

/// Main daemon loop
async fn run_daemon_loop(
    dispatcher: &Dispatcher,
    refresher: &TokenRefresher,
    poll_interval: u64,
    refresh_interval: u64,
    shutdown: Arc<AtomicBool>,
) {
    let mut last_refresh: Option<std::time::Instant> = None;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        dispatch_cycle(dispatcher).await;

        let refresh_due = match last_refresh {
            Some(at) => at.elapsed() >= Duration::from_secs(refresh_interval),
            None => true,
        };
        if refresh_due {
            refresh_cycle(refresher).await;
            last_refresh = Some(std::time::Instant::now());
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

async fn dispatch_cycle(dispatcher: &Dispatcher) {
    let now = chrono::Utc::now().timestamp();
    match dispatcher.run_once(now).await {
        Ok(summary) if summary.processed > 0 => {
            info!(
                processed = summary.processed,
                posted = summary.posted,
                failed = summary.failed,
                "Dispatch cycle complete"
            );
        }
        Ok(_) => {}
        Err(e) => error!("Dispatch cycle failed: {}", e),
    }
}

async fn refresh_cycle(refresher: &TokenRefresher) {
    let now = chrono::Utc::now().timestamp();
    match refresher.run_once(now).await {
        Ok(summary) if summary.refreshed > 0 || summary.failed > 0 || summary.expired > 0 => {
            info!(
                refreshed = summary.refreshed,
                failed = summary.failed,
                expired = summary.expired,
                "Token refresh cycle complete"
            );
        }
        Ok(_) => {}
        Err(e) => error!("Token refresh cycle failed: {}", e),
    }
}
