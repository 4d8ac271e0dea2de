//! Single-shot text chat endpoint
//!
//! Thin non-streaming wrapper over the reply generator for clients that
//! have text already and do not need the voice loop.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::Error;
use crate::adapters::ReplyGenerator as _;

/// Chat request body
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Chat response body
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

/// Build the chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .with_state(state)
}

/// Generate a reply for one text message
async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("text is required"));
    }

    tracing::info!(chars = text.len(), "chat request");

    let reply = tokio::time::timeout(
        state.timeouts.reply(),
        state.adapters.reply.generate(text),
    )
    .await
    .map_err(|_| ApiError::Upstream(Error::Timeout("reply text")))?
    .map_err(ApiError::Upstream)?;

    Ok(Json(ChatResponse { reply }))
}

/// API error envelope shared by the single-shot endpoints
#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    Upstream(Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.to_string()),
            Self::Upstream(err) => match &err {
                Error::NotConfigured(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "not_configured", err.to_string())
                }
                Error::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", err.to_string())
                }
                Error::Stt(_) => {
                    (StatusCode::BAD_GATEWAY, "stt_error", err.to_string())
                }
                Error::Tts(_) => {
                    (StatusCode::BAD_GATEWAY, "tts_error", err.to_string())
                }
                _ => (StatusCode::BAD_GATEWAY, "reply_error", err.to_string()),
            },
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}
