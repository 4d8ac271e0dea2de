//! HTTP/WebSocket API server for the parley gateway

pub mod chat;
pub mod converse;
pub mod health;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::adapters::Adapters;
use crate::config::{Config, TimeoutConfig};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    /// STT/reply/TTS capabilities injected into every session
    pub adapters: Adapters,

    /// Per-stage pipeline deadlines
    pub timeouts: TimeoutConfig,

    /// Expected connection token; `None` disables authentication
    pub auth_token: Option<String>,

    /// Provider names for the introspection endpoint
    pub stt_provider: String,
    pub tts_provider: String,
    pub reply_configured: bool,

    /// Server start time, reported by the health endpoint
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl ApiState {
    #[must_use]
    pub fn new(config: &Config, adapters: Adapters) -> Self {
        Self {
            adapters,
            timeouts: config.timeouts.clone(),
            auth_token: config.server.auth_token.clone(),
            stt_provider: config.stt.provider.clone(),
            tts_provider: config.tts.provider.clone(),
            reply_configured: config.reply.chat_url.is_some(),
            started_at: chrono::Utc::now(),
        }
    }
}

/// Build the full router with all routes and middleware
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    let router = Router::new()
        .merge(health::router(state.clone()))
        .merge(chat::router(state.clone()))
        .nest("/api", converse::router(state.clone()))
        .merge(websocket::router(state));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

/// The gateway API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(config: &Config, adapters: Adapters) -> Self {
        Self {
            state: Arc::new(ApiState::new(config, adapters)),
            port: config.server.port,
        }
    }

    /// Run the API server until interrupted
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(
            port = self.port,
            auth = self.state.auth_token.is_some(),
            "API server listening"
        );

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
