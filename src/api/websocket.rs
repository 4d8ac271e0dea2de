//! Streaming voice channel
//!
//! One WebSocket connection carries one session: binary frames are
//! input audio, text frames are tagged JSON control/event messages.
//! Authentication happens once, before any frame is processed.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::ApiState;
use crate::protocol::{CLOSE_UNAUTHORIZED, ClientEvent};
use crate::session::{Outbound, Session, SessionInput};

/// Optional query parameters for the WebSocket connection
#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Build the WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws/audio-stream", get(ws_upgrade))
        .with_state(state)
}

/// Handle the WebSocket upgrade request
async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    query: Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = query.0.token;
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

/// Drive one WebSocket connection
async fn handle_socket(mut socket: WebSocket, state: Arc<ApiState>, token: Option<String>) {
    // Token check comes before any audio or text processing. A missing
    // expected token means auth is disabled.
    if let Some(expected) = &state.auth_token
        && token.as_deref() != Some(expected.as_str())
    {
        tracing::warn!("websocket rejected: invalid or missing token");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_UNAUTHORIZED,
                reason: "Unauthorized".into(),
            })))
            .await;
        return;
    }

    let (mut sender, mut receiver) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(32);
    let (input_tx, input_rx) = mpsc::channel::<SessionInput>(64);

    let session = Session::new(state.adapters.clone(), state.timeouts.clone(), outbound_tx);
    let session_id = session.id();
    let session_task = tokio::spawn(session.run(input_rx));

    tracing::info!(session_id = %session_id, "websocket connected");

    // Forward session output to the socket in order
    let mut send_task = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            let msg = match out {
                Outbound::Event(event) => match serde_json::to_string(&event) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::error!(error = %e, "event serialization failed");
                        continue;
                    }
                },
                Outbound::Audio(chunk) => Message::Binary(chunk.into()),
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Feed incoming frames to the session in arrival order
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    if input_tx
                        .send(SessionInput::Frame(data.to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                    Ok(ClientEvent::Stop) => {
                        if input_tx.send(SessionInput::Stop).await.is_err() {
                            break;
                        }
                    }
                    Ok(ClientEvent::Debug { message }) => {
                        tracing::debug!(session_id = %session_id, message = %message, "client debug");
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "unrecognized text frame");
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // The session exclusively owns its in-flight adapter calls; aborting
    // the task cancels them and no further events can be delivered.
    session_task.abort();

    tracing::info!(session_id = %session_id, "websocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_query_token_is_optional() {
        let query: WsQuery = serde_json::from_str("{}").unwrap();
        assert!(query.token.is_none());

        let query: WsQuery = serde_json::from_str(r#"{"token":"t"}"#).unwrap();
        assert_eq!(query.token.as_deref(), Some("t"));
    }
}
