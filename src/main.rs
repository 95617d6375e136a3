//! Application entry point for the `safezone-monitor` service.
//!
//! This binary orchestrates the full startup sequence for the geofence
//! monitoring service, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Optionally connecting to PostgreSQL, creating the schema and
//!   reloading stored zones
//! - Starting the grace-period sweeper and, if configured, the position
//!   feed poller
//! - Binding the Axum HTTP server and serving requests until Ctrl-C,
//!   then flushing every open violation
//!
//! # Environment Variables
//! - `DATABASE_URL` (optional) – PostgreSQL connection string
//! - `POSITION_FEED_URL` (optional) – position feed to poll
//! - `SAFEZONE_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `SAFEZONE_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the full list.
use std::{env, sync::Arc};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use safezone_monitor::{config, routes, schema, store, transport, Config, Monitor, SystemClock};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let monitor = Monitor::new(cfg.monitor_settings()?, Arc::new(SystemClock));
    let pool = connect_database(&cfg).await?;

    if let Some(pool) = &pool {
        let zones = store::load_zones(pool).await?;
        let restored = monitor.restore_zones(zones).await;
        tracing::info!("Restored {} zone(s) into the registry", restored);

        tokio::spawn(store::run_archiver(pool.clone(), monitor.subscribe()));
    }

    tokio::spawn(monitor.clone().run_sweeper(cfg.sweep_interval()));

    if let Some(feed_url) = cfg.feed_url.clone() {
        tokio::spawn(transport::run_poller(
            monitor.clone(),
            feed_url,
            cfg.feed_max_pages,
            cfg.feed_poll_interval(),
        ));
    }

    // Build app from routes gateway
    let app: Router = routes::router(monitor.clone(), pool.clone());

    tracing::info!("Listening on {}", cfg.listen_addr);

    let listener = tokio::net::TcpListener::bind(cfg.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let flushed = monitor.shutdown().await;
    tracing::info!("Stopped; {} open violation(s) closed", flushed.len());

    // The archiver task dies with the runtime, so persist the flush here
    if let Some(pool) = &pool {
        let written = store::archive_events(pool, &flushed).await;
        tracing::info!("Archived {} flushed violation(s)", written);
    }

    Ok(())
}

// ---

/// Connect to PostgreSQL and ensure the schema when `DATABASE_URL` is set.
async fn connect_database(cfg: &Config) -> Result<Option<PgPool>> {
    // ---
    let Some(db_url) = &cfg.db_url else {
        tracing::info!("DATABASE_URL not set, zones and violations are kept in memory only");
        return Ok(None);
    };

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;
    Ok(Some(pool))
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SAFEZONE_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `SAFEZONE_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("SAFEZONE_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to SAFEZONE_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SAFEZONE_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
