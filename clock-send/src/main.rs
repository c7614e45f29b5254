//! clock-send - Scheduler daemon for Content Clock
//!
//! Polls the record store and publishes every post whose publish time has
//! passed through its platform adapter.

use clap::Parser;
use libcontentclock::config::resolve_config_path;
use libcontentclock::http::ReqwestClient;
use libcontentclock::logging::{LogFormat, LoggingConfig};
use libcontentclock::media::MediaResolver;
use libcontentclock::{
    ClockError, Config, Database, Dispatcher, PlatformRegistry, PublishContext, Result,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "clock-send")]
#[command(version)]
#[command(about = "Scheduler daemon that publishes due posts")]
#[command(long_about = "\
clock-send - Scheduler daemon that publishes due posts

DESCRIPTION:
    clock-send polls the Content Clock database at a fixed interval and
    publishes every scheduled post whose publish time has passed. Each post
    is moved to 'sending' before its platform is called and ends up
    'published' (with the platform's post id) or 'failed' (with the
    platform's error message).

    Supported platforms: facebook, instagram, linkedin, twitter, pinterest,
    mastodon, threads, reddit, discord.

USAGE:
    # Run in foreground (logs to stderr)
    clock-send

    # Poll every 30 seconds with JSON logs
    clock-send --poll-interval 30s --log-format json

    # Process due posts once and exit
    clock-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current tick)

CONFIGURATION:
    Configuration file: ~/.config/contentclock/config.toml
    (override with --config or CONTENTCLOCK_CONFIG)

    [database]
    path = \"~/.local/share/contentclock/posts.db\"

    [dispatch]
    poll_interval_secs = 60
    max_attempts = 3

    [media]
    public_host = \"https://api.example.com\"

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Configuration file (overrides CONTENTCLOCK_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// How often to check for due posts, e.g. 30s or 2m (overrides config)
    #[arg(
        long,
        value_name = "DURATION",
        value_parser = humantime::parse_duration
    )]
    poll_interval: Option<Duration>,

    /// Process due posts once and exit
    #[arg(long)]
    once: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json or pretty
    #[arg(
        long,
        value_name = "FORMAT",
        env = "CONTENTCLOCK_LOG_FORMAT",
        default_value = "text"
    )]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        format: cli.log_format,
        ..LoggingConfig::from_env(cli.verbose)
    };
    logging.init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    config.validate()?;

    let db = Database::new(&config.database_path()).await?;
    let http = Arc::new(ReqwestClient::new(config.dispatch.request_timeout())?);
    let ctx = PublishContext::new(
        http,
        MediaResolver::from_config(&config.media),
        config.platforms.clone(),
    );
    let dispatcher = Dispatcher::new(
        Arc::new(db),
        PlatformRegistry::with_defaults(),
        ctx,
        &config.dispatch,
    );

    info!("clock-send starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    if cli.once {
        let summary = dispatcher.run_once(chrono::Utc::now().timestamp()).await?;
        info!(
            due = summary.due,
            published = summary.published,
            failed = summary.failed,
            "Processed due posts once, exiting"
        );
    } else {
        let poll_interval = cli
            .poll_interval
            .unwrap_or_else(|| config.dispatch.poll_interval());
        if poll_interval.is_zero() {
            return Err(ClockError::InvalidInput(
                "--poll-interval must be greater than zero".to_string(),
            ));
        }
        info!("Poll interval: {}", humantime::format_duration(poll_interval));

        if !pause(config.dispatch.startup_delay(), &shutdown).await {
            run_daemon_loop(&dispatcher, poll_interval, &shutdown).await;
        }
    }

    info!("clock-send stopped");
    Ok(())
}

/// Load the configuration named on the command line, `CONTENTCLOCK_CONFIG`,
/// or the default location.
///
/// Only a missing file at the default location falls back to built-in
/// defaults; a path the operator named must exist.
fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let explicit = path.is_some() || std::env::var_os("CONTENTCLOCK_CONFIG").is_some();
    let path = match path {
        Some(path) => PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string()),
        None => resolve_config_path()?,
    };

    let mut config = if !explicit && !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        Config::default_config()
    } else {
        Config::load_from_path(&path)?
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| ClockError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!(signal, "Received shutdown signal, stopping after the current tick");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

async fn run_daemon_loop(dispatcher: &Dispatcher, poll_interval: Duration, shutdown: &AtomicBool) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        if let Err(e) = dispatcher.run_once(chrono::Utc::now().timestamp()).await {
            error!(error = %e, "Dispatch tick failed");
        }

        if pause(poll_interval, shutdown).await {
            break;
        }
    }
}

/// Sleep for `duration`, waking at least once a second to check for
/// shutdown. Returns whether shutdown was requested.
async fn pause(duration: Duration, shutdown: &AtomicBool) -> bool {
    let step = Duration::from_secs(1);
    let mut remaining = duration;

    while !remaining.is_zero() {
        if shutdown.load(Ordering::Relaxed) {
            return true;
        }
        let slice = remaining.min(step);
        sleep(slice).await;
        remaining -= slice;
    }

    shutdown.load(Ordering::Relaxed)
}
