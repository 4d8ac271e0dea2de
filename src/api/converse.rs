//! Single-shot voice exchange endpoint
//!
//! Accepts one utterance of audio in the request body and performs a
//! full Capturing→Idle pass through the session pipeline: transcript,
//! reply and reply audio come back in one JSON response.

use std::sync::Arc;

use axum::{Json, Router, body::Bytes, extract::State, routing::post};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;

use super::ApiState;
use super::chat::ApiError;
use crate::protocol::NoReplyReason;
use crate::session;

/// Single-shot exchange response
#[derive(Debug, Serialize)]
pub struct ConverseResponse {
    pub transcript: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_reply: Option<NoReplyReason>,
    /// Reply audio chunks, base64-encoded, in playback order
    pub audio: Vec<String>,
}

/// Build the converse router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/converse", post(converse))
        .with_state(state)
}

/// Run one full voice exchange over the session state machine
async fn converse(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<ConverseResponse>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("audio body is required"));
    }

    tracing::info!(audio_bytes = body.len(), "single-shot converse");

    let outcome = session::converse_once(
        state.adapters.clone(),
        state.timeouts.clone(),
        body.to_vec(),
    )
    .await
    .map_err(ApiError::Upstream)?;

    Ok(Json(ConverseResponse {
        transcript: outcome.transcript,
        reply: outcome.reply,
        no_reply: outcome.no_reply,
        audio: outcome
            .audio
            .iter()
            .map(|chunk| BASE64.encode(chunk))
            .collect(),
    }))
}
