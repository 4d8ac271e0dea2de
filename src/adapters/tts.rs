//! Text-to-speech adapters

use async_trait::async_trait;

use super::TextToSpeech;
use crate::{Error, Result};

/// Sentence delimiters for chunked synthesis
const SENTENCE_DELIMITERS: &[char] = &['.', '!', '?', '\n'];

/// Minimum characters before a sentence boundary triggers a chunk
const MIN_CHUNK_CHARS: usize = 60;

/// TTS provider backend
#[derive(Clone, Copy, Debug)]
enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

/// HTTP speech synthesis adapter
///
/// By default each call yields one audio blob. With sentence chunking
/// enabled, long replies are split at sentence boundaries and
/// synthesized piecewise, so playback can begin before the tail of the
/// reply is rendered.
pub struct HttpTextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsProvider,
    chunk_sentences: bool,
}

impl HttpTextToSpeech {
    /// Create a TTS adapter backed by the OpenAI speech API
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing
    pub fn new_openai(api_key: String, voice: String, speed: f32, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
            provider: TtsProvider::OpenAI,
            chunk_sentences: false,
        })
    }

    /// Create a TTS adapter backed by ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing
    pub fn new_elevenlabs(api_key: String, voice_id: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            speed: 1.0, // ElevenLabs does not take a speed parameter
            model,
            provider: TtsProvider::ElevenLabs,
            chunk_sentences: false,
        })
    }

    /// Split long replies at sentence boundaries into separate chunks
    #[must_use]
    pub const fn with_sentence_chunking(mut self) -> Self {
        self.chunk_sentences = true;
        self
    }

    /// One provider round trip for one piece of text
    async fn fetch_audio(&self, text: &str) -> Result<Vec<u8>> {
        let request = match self.provider {
            TtsProvider::OpenAI => self
                .client
                .post("https://api.openai.com/v1/audio/speech")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&serde_json::json!({
                    "model": self.model,
                    "input": text,
                    "voice": self.voice,
                    "speed": self.speed,
                })),
            TtsProvider::ElevenLabs => self
                .client
                .post(format!(
                    "https://api.elevenlabs.io/v1/text-to-speech/{}",
                    self.voice
                ))
                .header("xi-api-key", &self.api_key)
                .json(&serde_json::json!({
                    "text": text,
                    "model_id": self.model,
                })),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, provider = ?self.provider, "TTS API error");
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl TextToSpeech for HttpTextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<Vec<u8>>> {
        let pieces = if self.chunk_sentences {
            split_sentences(text, MIN_CHUNK_CHARS)
        } else {
            vec![text.to_string()]
        };

        tracing::debug!(
            chars = text.len(),
            pieces = pieces.len(),
            provider = ?self.provider,
            "synthesizing speech"
        );

        let mut chunks = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            chunks.push(self.fetch_audio(piece).await?);
        }

        let total: usize = chunks.iter().map(Vec::len).sum();
        tracing::info!(audio_bytes = total, chunks = chunks.len(), "synthesis complete");
        Ok(chunks)
    }
}

/// Split text at sentence boundaries, merging short sentences until each
/// piece reaches `min_chars`
fn split_sentences(text: &str, min_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if SENTENCE_DELIMITERS.contains(&ch) && current.trim().len() >= min_chars {
            pieces.push(current.trim().to_string());
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        pieces.push(tail.to_string());
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }
    pieces
}
