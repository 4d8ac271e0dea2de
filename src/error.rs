//! Error types for the parley gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the parley gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication failure (invalid or missing token)
    ///
    /// Surfaced to clients as the unauthorized close code, never as a
    /// generic transport failure.
    #[error("auth error: {0}")]
    Auth(String),

    /// Transport-level failure (refused, reset, closed mid-stream)
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Reply generation error
    #[error("reply error: {0}")]
    Reply(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio capture/playback/encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// No backing provider configured for a required capability
    ///
    /// Distinct from an empty-but-valid adapter result.
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    /// An adapter call exceeded its configured deadline
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Per-session channel closed while an event was in flight
    #[error("session channel closed")]
    SessionClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket protocol error
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
