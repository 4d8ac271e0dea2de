//! Wire protocol for the streaming voice channel
//!
//! Text frames on the WebSocket carry one tagged JSON object per message.
//! The `type` discriminator is closed: an unrecognized type fails
//! deserialization instead of being silently skipped.

use serde::{Deserialize, Serialize};

/// Close code sent on a deliberate, client-initiated shutdown
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code sent when the connection token is missing or wrong
///
/// Clients must treat this as an authentication failure, not as
/// connectivity loss: it gets one token refresh, not a backoff loop.
pub const CLOSE_UNAUTHORIZED: u16 = 1008;

/// Close code sent when the server hit an unrecoverable internal error
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Incoming control message from the client
///
/// Input audio itself travels as binary frames, not as `ClientEvent`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// End of utterance: no more audio follows until the next one starts
    Stop,
    /// Diagnostic payload; logged and otherwise ignored
    Debug {
        #[serde(default)]
        message: String,
    },
}

/// Outgoing event to the client
///
/// Reply audio itself travels as binary frames, in generation order,
/// after the `Reply` event for the same utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Interim transcript; superseded by the next partial or the final
    Partial { text: String },
    /// Final transcript for the utterance (exactly one per utterance)
    #[serde(alias = "final")]
    Transcript { text: String },
    /// Incremental reply text from a streaming generator
    ReplyDelta { text: String },
    /// Complete reply text
    Reply { text: String },
    /// The utterance produced no genuine reply
    NoReply { reason: NoReplyReason },
    /// Session-level error; the session has returned to idle
    Error { code: String, message: String },
    /// Diagnostic payload; clients may ignore it
    Debug { message: String },
}

/// Why a finalized utterance yielded no reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoReplyReason {
    /// Empty or silent audio: a normal no-op outcome, not an error
    NoSpeech,
    /// The generated reply only echoed the transcript back
    Echo,
    /// The generator answered with an empty-but-valid reply
    Empty,
}
