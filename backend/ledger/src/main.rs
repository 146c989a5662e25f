//! RWA ledger service entry point.
//!
//! Hosts the protocol core behind an Axum REST API: custody posts deposit
//! notifications, operators post commands, and every committed step is
//! persisted to SQLite together with its outbound instructions. A background
//! relay task drains those instructions to the custody service in order.

mod api;
mod config;
mod custody;
mod db;
mod errors;
mod events;
mod relay;
mod service;

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use custody::CustodyClient;
use relay::RelayState;
use service::LedgerService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    let protocol_config = config
        .protocol_config()
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client shared by the relay and buyback quotes.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let custody = CustodyClient::new(client, &config.custody_url);

    let service = Arc::new(LedgerService::load(pool.clone(), protocol_config).await?);
    let shutdown = CancellationToken::new();

    // ─── Outbox relay ─────────────────────────────────────
    let relay_state = Arc::new(RelayState {
        pool,
        custody: custody.clone(),
        interval_secs: config.relay_interval_secs,
        batch_size: config.relay_batch_size,
    });
    let relay = tokio::spawn(relay::run(relay_state, shutdown.clone()));

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState { service, custody });
    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    relay.await?;
    Ok(())
}
