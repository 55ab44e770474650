use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forum_chat_bridge::chat::LogTransport;
use forum_chat_bridge::config::Config;
use forum_chat_bridge::db::Database;
use forum_chat_bridge::forum::fetch::Fetcher;
use forum_chat_bridge::forum::session::ForumSession;
use forum_chat_bridge::forum::tracker::Tracker;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Initialize logging
    init_tracing()?;

    info!("Starting forum-chat-bridge");

    // Load and validate configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(forum = %config.forum_base_url, "Configuration loaded");

    // Ensure the database directory exists
    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    // Initialize database
    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    // Build the authenticated session once; it is immutable from here on.
    // Expired cookies surface through the logs and the cookie diagnostics,
    // never through silent re-authentication.
    let session = ForumSession::from_config(&config).context("Invalid forum session")?;
    if session.present_cookies().is_empty() {
        warn!("No session cookies configured - authenticated pages will not load");
    }
    let fetcher = Arc::new(
        Fetcher::new(session, config.fetch_timeout).context("Failed to build HTTP client")?,
    );

    let tracker = Tracker::new(&config, db, Arc::clone(&fetcher), Arc::new(LogTransport));
    let handle = tracker.handle();

    // Keepalive ping, independent of the poll cycle
    let keepalive_fetcher = Arc::clone(&fetcher);
    let keepalive_interval = config.keepalive_interval;
    let keepalive_cancel = handle.cancellation_token();
    let keepalive_handle = tokio::spawn(async move {
        keepalive_fetcher
            .keepalive_loop(keepalive_interval, keepalive_cancel)
            .await;
    });

    // Poll loop
    let tracker_handle = tokio::spawn(async move {
        tracker.run().await;
    });
    info!("Tracker started");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down...");

    handle.shutdown();
    let _ = tracker_handle.await;
    let _ = keepalive_handle.await;

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,forum_chat_bridge=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        // Structured JSON logging for production
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        // Pretty-printed logging for development
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
