//! Tiny HTTP endpoint so hosting platforms can tell the process is up.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use dealfinder_config::LivenessConfig;

pub const ALIVE_TEXT: &str = "I am alive! The bot is running.";

#[derive(Debug, Clone)]
pub struct LivenessState {
    inner: Arc<LivenessInner>,
}

#[derive(Debug)]
struct LivenessInner {
    bot_name: String,
    started_at: DateTime<Utc>,
}

impl LivenessState {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LivenessInner {
                bot_name: bot_name.into(),
                started_at: Utc::now(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    bot: String,
    started_at: DateTime<Utc>,
    uptime_secs: i64,
}

pub fn build_router(state: LivenessState) -> Router {
    Router::new()
        .route("/", get(alive))
        .route("/health", get(health))
        .with_state(state)
}

async fn alive() -> &'static str {
    ALIVE_TEXT
}

async fn health(State(state): State<LivenessState>) -> Json<HealthResponse> {
    let uptime = Utc::now() - state.inner.started_at;
    Json(HealthResponse {
        status: "ok",
        bot: state.inner.bot_name.clone(),
        started_at: state.inner.started_at,
        uptime_secs: uptime.num_seconds().max(0),
    })
}

/// Bind the configured address and serve until the process exits.
pub async fn serve(config: &LivenessConfig, state: LivenessState) -> Result<()> {
    if config.port == 0 {
        bail!("liveness port must be > 0");
    }
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address '{}:{}'", config.host, config.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: LivenessState) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "liveness endpoint listening");
    }
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| anyhow!("liveness server error: {e}"))
}
