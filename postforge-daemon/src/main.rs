//! Postforge Daemon
//!
//! Posts affiliate product reviews to a blog on a fixed schedule and serves
//! health endpoints for external monitors.
//!
//! # Running
//!
//! ```bash
//! cargo run -p postforge-daemon
//! # or after install:
//! postforged --config ~/.config/postforge/postforge.toml
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use postforge_daemon::{Bot, BotConfig, LogFormat, load_config, start_server};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// Scheduled affiliate blog posting daemon.
#[derive(Debug, Parser)]
#[command(name = "postforged", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single posting cycle and exit.
    #[arg(long, conflicts_with = "check")]
    once: bool,

    /// Diagnose authentication and verify blog access, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config);

    info!("Starting postforge daemon v{}", env!("CARGO_PKG_VERSION"));
    match &config.config_path {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("No configuration file found, using defaults and environment"),
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let bot = Bot::from_config(config, &cancel)?;

    if cli.check {
        return check(&bot, &cancel).await;
    }

    let authenticated = bot.diagnose_authentication().await;

    if cli.once {
        if !authenticated {
            bail!("Cannot post without a usable OAuth credential");
        }
        let report = bot.run_once(&cancel).await;
        if !report.is_success() {
            bail!(
                "Posting run failed: {}",
                report.failure.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        info!(
            "Posted {}",
            report.post_url.as_deref().unwrap_or("(no URL returned)")
        );
        return Ok(());
    }

    run_daemon(bot, cancel).await
}

fn init_logging(config: &BotConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Pretty => fmt().with_env_filter(filter).with_target(false).init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

async fn check(bot: &Bot, cancel: &CancellationToken) -> Result<()> {
    if !bot.diagnose_authentication().await {
        bail!("Authentication check failed");
    }
    if bot.verify_blog_access(cancel).await?.is_none() {
        bail!("Blog access could not be verified");
    }
    info!("All checks passed");
    Ok(())
}

async fn run_daemon(bot: Bot, cancel: CancellationToken) -> Result<()> {
    let config = bot.config();
    let server_shutdown = CancellationToken::new();
    let server = start_server(config.health_addr()?, bot.api_state(), server_shutdown).await?;
    let linger = Duration::from_secs(config.health.linger_secs);

    if bot.has_credential() {
        if let Err(e) = bot.verify_blog_access(&cancel).await {
            error!("{:#}", e);
            warn!("Continuing; posting runs will report failures until access is fixed");
        }

        info!("Daemon running. Press Ctrl+C to stop.");
        let summary = bot.run(&cancel).await;
        info!(
            "Bot stopped after {} runs ({} succeeded, {} failed)",
            summary.post_count, summary.successes, summary.failures
        );
    } else {
        error!("No OAuth credential configured; only the health endpoints will run");
        cancel.cancelled().await;
    }

    if !linger.is_zero() {
        info!("Health server stays up for {}s (Ctrl+C again to exit now)", linger.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(linger) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    server.stop().await?;
    info!("Daemon stopped");
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping...");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
