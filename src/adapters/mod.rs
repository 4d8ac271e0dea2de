//! Pluggable STT / reply / TTS capabilities
//!
//! The session state machine only sees these traits. Concrete providers
//! live behind them and are constructed once from [`Config`], then
//! injected; nothing in the pipeline reaches for process-wide handles.

mod reply;
mod stt;
mod tts;

use std::sync::Arc;

use async_trait::async_trait;

pub use reply::{HttpReplyGenerator, NullReplyGenerator};
pub use stt::{HttpSpeechToText, pcm16_to_wav};
pub use tts::HttpTextToSpeech;

use crate::config::Config;
use crate::{Error, Result};

/// Sample rate expected for input audio (PCM16 mono)
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Converts captured speech into text
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Begin a new utterance
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot accept a new utterance.
    async fn start_utterance(&self) -> Result<Box<dyn UtteranceStream>>;
}

/// Accumulates one utterance worth of audio
///
/// Implementations must tolerate a single contiguous byte stream and
/// chunked frames transparently.
#[async_trait]
pub trait UtteranceStream: Send + Sync {
    /// Feed one audio frame; returns zero or more partial transcripts in
    /// recognition order
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the audio.
    async fn feed(&mut self, audio: &[u8]) -> Result<Vec<String>>;

    /// Signal that no more audio follows; returns exactly one final
    /// transcript, possibly empty
    ///
    /// # Errors
    ///
    /// Returns an error if transcription fails.
    async fn finish(self: Box<Self>) -> Result<String>;
}

/// Turns a final transcript into reply text
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Generate a reply for the given transcript
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] when no backing provider exists,
    /// which callers must surface distinctly from an empty reply.
    async fn generate(&self, text: &str) -> Result<String>;
}

/// Turns reply text into audio
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize speech; returns ordered audio chunks
    ///
    /// Each chunk is a self-describing container (WAV, MP3), playable
    /// without external metadata. Whole-blob providers return one chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if synthesis fails.
    async fn synthesize(&self, text: &str) -> Result<Vec<Vec<u8>>>;
}

/// The adapter set one session depends on
#[derive(Clone)]
pub struct Adapters {
    pub stt: Arc<dyn SpeechToText>,
    pub reply: Arc<dyn ReplyGenerator>,
    pub tts: Arc<dyn TextToSpeech>,
}

impl Adapters {
    /// Construct all adapters from configuration
    ///
    /// # Errors
    ///
    /// Returns an error when a selected provider is missing its API key
    /// or the provider name is unknown.
    pub fn from_config(config: &Config) -> Result<Self> {
        let stt: Arc<dyn SpeechToText> = match config.stt.provider.as_str() {
            "whisper" => Arc::new(HttpSpeechToText::new_whisper(
                config.stt.api_key.clone().unwrap_or_default(),
                config.stt.model.clone(),
            )?),
            "deepgram" => Arc::new(HttpSpeechToText::new_deepgram(
                config.stt.api_key.clone().unwrap_or_default(),
                config.stt.model.clone(),
            )?),
            other => {
                return Err(Error::Config(format!("unknown STT provider: {other}")));
            }
        };

        let reply: Arc<dyn ReplyGenerator> = match &config.reply.chat_url {
            Some(url) => Arc::new(HttpReplyGenerator::new(url.clone())),
            None => Arc::new(NullReplyGenerator),
        };

        let mut tts = match config.tts.provider.as_str() {
            "openai" => HttpTextToSpeech::new_openai(
                config.tts.api_key.clone().unwrap_or_default(),
                config.tts.voice.clone(),
                config.tts.speed,
                config.tts.model.clone(),
            )?,
            "elevenlabs" => HttpTextToSpeech::new_elevenlabs(
                config.tts.api_key.clone().unwrap_or_default(),
                config.tts.voice.clone(),
                config.tts.model.clone(),
            )?,
            other => {
                return Err(Error::Config(format!("unknown TTS provider: {other}")));
            }
        };
        if config.tts.chunk_sentences {
            tts = tts.with_sentence_chunking();
        }
        let tts: Arc<dyn TextToSpeech> = Arc::new(tts);

        Ok(Self { stt, reply, tts })
    }
}
