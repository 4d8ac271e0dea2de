//! Configuration management for the parley gateway
//!
//! Settings come from an optional TOML file (`PARLEY_CONFIG` or
//! `./parley.toml`) with environment variables taking precedence, so a
//! bare `parley serve` works in dev and containers stay file-free.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Gateway configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP/WebSocket server settings
    pub server: ServerConfig,

    /// Speech-to-text adapter settings
    pub stt: SttConfig,

    /// Reply generator settings
    pub reply: ReplyConfig,

    /// Text-to-speech adapter settings
    pub tts: TtsConfig,

    /// Per-stage pipeline deadlines
    pub timeouts: TimeoutConfig,

    /// Native client settings (`parley talk`)
    pub client: ClientConfig,
}

/// HTTP/WebSocket server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Expected connection token; `None` disables authentication entirely
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8001,
            auth_token: None,
        }
    }
}

/// Speech-to-text adapter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SttConfig {
    /// Provider backend: "whisper" or "deepgram"
    pub provider: String,

    /// Provider API key
    pub api_key: Option<String>,

    /// Provider model identifier
    pub model: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: "whisper".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
        }
    }
}

/// Reply generator settings
///
/// With no chat URL configured the gateway reports "not configured"
/// instead of fabricating replies.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ReplyConfig {
    /// HTTP chat endpoint accepting `{"text": …}` and returning `{"reply": …}`
    pub chat_url: Option<String>,
}

/// Text-to-speech adapter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TtsConfig {
    /// Provider backend: "openai" or "elevenlabs"
    pub provider: String,

    /// Provider API key
    pub api_key: Option<String>,

    /// Voice identifier
    pub voice: String,

    /// Speed multiplier (OpenAI only)
    pub speed: f32,

    /// Provider model identifier
    pub model: String,

    /// Split long replies into sentence-sized synthesis chunks
    pub chunk_sentences: bool,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: None,
            voice: "alloy".to_string(),
            speed: 1.0,
            model: "tts-1".to_string(),
            chunk_sentences: false,
        }
    }
}

/// Per-stage pipeline deadlines, in seconds
///
/// Every suspension point in the session pipeline is bounded by one of
/// these; expiry resolves to an error event, never an indefinite hang.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Waiting for the final transcript after `stop`
    pub finalize_secs: u64,

    /// Waiting for the reply generator
    pub reply_secs: u64,

    /// Waiting for speech synthesis
    pub synthesize_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            finalize_secs: 30,
            reply_secs: 30,
            synthesize_secs: 30,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub const fn finalize(&self) -> Duration {
        Duration::from_secs(self.finalize_secs)
    }

    #[must_use]
    pub const fn reply(&self) -> Duration {
        Duration::from_secs(self.reply_secs)
    }

    #[must_use]
    pub const fn synthesize(&self) -> Duration {
        Duration::from_secs(self.synthesize_secs)
    }
}

/// Native client settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// WebSocket endpoint of the gateway
    pub server_url: String,

    /// Static connection token
    pub token: Option<String>,

    /// Token discovery endpoint; queried when no static token is set and
    /// re-queried once after an unauthorized close
    pub token_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8001/ws/audio-stream".to_string(),
            token: None,
            token_url: None,
        }
    }
}

impl Config {
    /// Load configuration from the default locations plus the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os("PARLEY_CONFIG")
            .map(PathBuf::from)
            .or_else(|| {
                let default = PathBuf::from("parley.toml");
                default.exists().then_some(default)
            });

        let mut config = match path {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Overlay environment variables onto the loaded file values
    fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("PARLEY_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(token) = std::env::var("PARLEY_WS_TOKEN") {
            self.server.auth_token = (!token.is_empty()).then_some(token);
        }
        if let Ok(provider) = std::env::var("PARLEY_STT_PROVIDER") {
            self.stt.provider = provider;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if self.stt.provider == "whisper" && self.stt.api_key.is_none() {
                self.stt.api_key = Some(key.clone());
            }
            if self.tts.provider == "openai" && self.tts.api_key.is_none() {
                self.tts.api_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var("DEEPGRAM_API_KEY")
            && self.stt.provider == "deepgram"
        {
            self.stt.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("ELEVENLABS_API_KEY")
            && self.tts.provider == "elevenlabs"
        {
            self.tts.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("PARLEY_CHAT_URL") {
            self.reply.chat_url = (!url.is_empty()).then_some(url);
        }
        if let Ok(provider) = std::env::var("PARLEY_TTS_PROVIDER") {
            self.tts.provider = provider;
        }
        if let Ok(url) = std::env::var("PARLEY_SERVER_URL") {
            self.client.server_url = url;
        }
        if let Ok(token) = std::env::var("PARLEY_TOKEN") {
            self.client.token = (!token.is_empty()).then_some(token);
        }
    }
}
