//! Health check and configuration introspection endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub reply_ready: bool,
}

/// Configuration introspection response
///
/// Names backends only; secrets never leave the process.
#[derive(Serialize)]
pub struct ConfigResponse {
    pub stt_backend: String,
    pub tts_backend: String,
    pub reply_configured: bool,
    pub auth_enabled: bool,
}

/// Build the health/introspection router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(config))
        .with_state(state)
}

/// Liveness probe plus adapter readiness
async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
        reply_ready: state.reply_configured,
    })
}

/// Report which backends this gateway was started with
async fn config(State(state): State<Arc<ApiState>>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        stt_backend: state.stt_provider.clone(),
        tts_backend: state.tts_provider.clone(),
        reply_configured: state.reply_configured,
        auth_enabled: state.auth_token.is_some(),
    })
}
