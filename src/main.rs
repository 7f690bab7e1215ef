//! # Tweetgate
//!
//! An HTTP service that publishes tweets from a single X account.
//!
//! ## API Endpoints
//!
//! - `GET /`: Service info
//! - `GET /health`: Database and account health
//! - `POST /api/tweet`: Publish a tweet
//! - `GET /api/tweet/:id`: Look up a tweet
//! - `GET /api/logs`: Recent publish attempts
//!
//! See [`tweetgate::config::Settings`] for the environment variables.

use log::{error, info, warn};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use tweetgate::config::{log_file_from_env, log_level_from_env, open_log_file, Settings};
use tweetgate::crypto::SessionCipher;
use tweetgate::twitter::SessionCache;
use tweetgate::{create_app, db, AccountClient, AppState, XApiClient};

/// Main entry point for the tweetgate web service.
///
/// Loads settings, opens the log store, warms up the X session and serves
/// HTTP until SIGINT/SIGTERM.
///
/// # Example Usage
///
/// ```bash
/// TWITTER_USERNAME=myaccount TWITTER_ACCESS_TOKEN=... cargo run
///
/// # Run with debug logging
/// LOG_LEVEL=debug cargo run
/// ```
#[tokio::main]
async fn main() -> ExitCode {
    // RUST_LOG still takes precedence when set
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level_from_env()));
    if let Some(path) = log_file_from_env() {
        match open_log_file(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}, logging to stderr: {}", path.display(), e),
        }
    }
    builder.init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = Settings::from_env()?;
    info!("Starting tweetgate with {:?}", settings);

    let pool = db::init_pool(&settings.database_url).await?;
    db::init_database(&pool).await?;

    let cipher = match &settings.session_encryption_key {
        Some(key) => Some(SessionCipher::from_hex(key)?),
        None => None,
    };
    let sessions = SessionCache::new(pool.clone(), cipher);
    let client = XApiClient::new(settings.twitter.clone(), sessions)?;

    // Failing here is not fatal; the first request retries authentication.
    match client.authenticate().await {
        Ok(identity) => info!("X account ready: @{}", identity.username),
        Err(e) => warn!("Initial X authentication failed: {}", e),
    }

    let state = AppState::new(pool.clone(), Arc::new(client), settings.retry_policy());

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(settings.rate_limit_replenish_seconds)
            .burst_size(settings.rate_limit_burst)
            .finish()
            .ok_or("invalid rate limit configuration")?,
    );
    let limiter = governor_config.limiter().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            limiter.retain_recent();
        }
    });

    let app = create_app(state).layer(GovernorLayer {
        config: governor_config,
    });

    let addr = settings.bind_addr();
    info!("Starting tweetgate server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped, closing database pool");
    pool.close().await;
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
