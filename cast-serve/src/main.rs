//! cast-serve - webhook and OAuth server for scheduled publishing
//!
//! Receives queue deliveries, hosts the OAuth connect flow and keeps
//! connected accounts' tokens fresh with a periodic sweep.

use anyhow::Context;
use clap::Parser;
use libcrosscast::logging::LoggingConfig;
use libcrosscast::{Config, CrosscastError, Runtime, Secrets, TokenManager};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cast-serve")]
#[command(version)]
#[command(about = "Webhook and OAuth server for scheduled publishing")]
#[command(long_about = "\
cast-serve - Webhook and OAuth server for scheduled publishing

DESCRIPTION:
    cast-serve receives signed deliveries from the delayed queue at
    POST /webhooks/post-execute and publishes the due content, hosts the
    OAuth connect flow at /oauth/{platform}/connect and /callback, and
    refreshes expiring access tokens in the background.

USAGE:
    # Run with the default configuration
    cast-serve

    # Bind elsewhere
    cast-serve --bind 0.0.0.0:9000

    # Refresh expiring tokens once and exit (for cron)
    cast-serve --sweep-once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (in-flight requests finish)

ENVIRONMENT:
    CROSSCAST_CONFIG                  Config file path
    CROSSCAST_ENCRYPTION_KEY          32-byte token encryption key (hex or base64)
    CROSSCAST_QUEUE_TOKEN             Delayed queue API token
    CROSSCAST_QUEUE_SIGNING_KEY       Delivery signing key
    CROSSCAST_QUEUE_NEXT_SIGNING_KEY  Next signing key during rotation
    CROSSCAST_TWITTER_CLIENT_SECRET   Twitter OAuth client secret
    CROSSCAST_LINKEDIN_CLIENT_SECRET  LinkedIn OAuth client secret
    CROSSCAST_LOG_FORMAT              text, json or pretty

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or credential error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Address to bind (overrides server.bind)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Run one token sweep, print its report as JSON and exit
    #[arg(long)]
    sweep_once: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::from_env("info", cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<CrosscastError>()
            .map(CrosscastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }

    let secrets = Secrets::from_env();
    let runtime = Runtime::from_config(&config, &secrets).await?;

    if cli.sweep_once {
        let report = runtime.tokens.refresh_expiring_tokens().await?;
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = tokio::spawn(sweep_loop(
        runtime.tokens.clone(),
        Duration::from_secs(config.tokens.sweep_interval_secs),
        shutdown_rx.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(
        addr = %config.server.bind,
        callback = %config.callback_url(),
        "cast-serve listening"
    );

    let app = cast_serve::router(cast_serve::AppState::new(&runtime, config));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("Server error")?;

    if let Err(e) = sweep.await {
        warn!(error = %e, "Sweep task ended abnormally");
    }
    info!("cast-serve stopped");
    Ok(())
}

/// Refresh expiring tokens every `interval` until shutdown. A zero
/// interval disables the sweep.
async fn sweep_loop(tokens: TokenManager, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    if interval.is_zero() {
        info!("Token sweep disabled");
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = tokens.refresh_expiring_tokens().await {
                    error!(error = %e, "Token sweep failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    use futures::stream::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            if let Some(signal) = signals.next().await {
                info!(signal, "Received shutdown signal, stopping gracefully...");
            }
        }
        Err(e) => {
            error!(error = %e, "Signal setup failed, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    let _ = shutdown.send(true);
}

#[cfg(not(unix))]
async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl-C, stopping gracefully...");
    let _ = shutdown.send(true);
}
