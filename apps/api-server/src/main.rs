//! # Throttle API Server
//!
//! The main entry point for the Actix-web HTTP server.

use std::time::Duration;

use actix_web::{App, HttpServer, web};
use tracing_actix_web::TracingLogger;

mod config;
mod handlers;
mod middleware;
mod state;
mod telemetry;

use config::AppConfig;
use state::AppState;
use telemetry::{TelemetryConfig, init_telemetry};

/// How often expired in-memory windows are dropped.
const PURGE_INTERVAL: Duration = Duration::from_secs(30);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_telemetry(&TelemetryConfig::from_env());

    let config = AppConfig::from_env();

    tracing::info!(
        "Starting Throttle API Server on {}:{}",
        config.host,
        config.port
    );

    let state = AppState::new(&config).await.map_err(|e| {
        tracing::error!("Counter store unavailable: {}", e);
        std::io::Error::other(e)
    })?;

    if let Some(store) = state.memory_store.clone() {
        actix_rt::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let purged = store.purge_expired().await;
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired rate limit windows");
                }
            }
        });
    }

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(|cfg| handlers::configure_routes(cfg, &state))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
