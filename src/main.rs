//! ONS energy balance dashboard.
//! - Serves one HTML page with date/subsystem filters, four summary metrics,
//!   a load curve per subsystem, and a detail panel.
//! - Reads `balanco_energia_subsistemas` from ClickHouse over HTTPS; results are
//!   cached by query text for a few minutes.
//! - Settings: secrets.yaml (or `DASHBOARD_SECRETS`) plus CLICKHOUSE_* env vars,
//!   DASHBOARD_ADDR, CACHE_TTL_SECS, CLICKHOUSE_TIMEOUT_SECS, RUST_LOG.

use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cache;
mod chart;
mod clickhouse;
mod config;
mod error;
mod http;
mod metrics;
mod models;
mod queries;
mod ui;
mod view;

use crate::cache::ResultCache;
use crate::config::Settings;
use crate::http::{AppState, router};
use crate::view::Dashboard;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::load().context("loading settings")?;
    let dashboard = Arc::new(Dashboard::new(
        settings.clickhouse.clone(),
        ResultCache::new(settings.cache_ttl),
    ));

    // Warm the connection so misconfiguration shows up in the logs at startup.
    // A failure here is not fatal; the page reports it and retries per request.
    if let Err(err) = dashboard.connection().await {
        tracing::warn!(error = %err, "clickhouse not reachable yet");
    }

    let app = router(AppState { dashboard }).layer(TraceLayer::new_for_http());

    let addr = settings.listen_addr;
    tracing::info!("dashboard listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
