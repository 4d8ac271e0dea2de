//! Parley Gateway - real-time voice conversation gateway
//!
//! One persistent WebSocket carries a full voice loop per client:
//! microphone audio streams up, transcripts and reply audio stream back.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                    Client                         │
//! │   Capture  │  Transport Session  │  Playback     │
//! └──────────────────────┬───────────────────────────┘
//!                        │  audio frames / tagged events
//! ┌──────────────────────▼───────────────────────────┐
//! │                 Parley Gateway                    │
//! │   Session State Machine  │  HTTP/WS surface      │
//! └──────────────────────┬───────────────────────────┘
//!                        │
//! ┌──────────────────────▼───────────────────────────┐
//! │            Adapters (pluggable)                   │
//! │   STT  │  Reply Generator  │  TTS                │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
