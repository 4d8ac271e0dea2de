//! Speech-to-text adapters

use async_trait::async_trait;

use super::{INPUT_SAMPLE_RATE, SpeechToText, UtteranceStream};
use crate::{Error, Result};

/// STT provider backend
#[derive(Clone, Copy, Debug)]
enum SttProvider {
    Whisper,
    Deepgram,
}

/// Batch HTTP transcription adapter
///
/// Buffers the utterance and transcribes once on `finish`; emits no
/// partial transcripts. Streaming providers plug in behind the same
/// [`SpeechToText`] trait.
#[derive(Clone)]
pub struct HttpSpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl HttpSpeechToText {
    /// Create an STT adapter backed by OpenAI Whisper
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        Self::new(api_key, model, SttProvider::Whisper, "OpenAI")
    }

    /// Create an STT adapter backed by Deepgram
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        Self::new(api_key, model, SttProvider::Deepgram, "Deepgram")
    }

    fn new(api_key: String, model: String, provider: SttProvider, name: &str) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(format!("{name} API key required for STT")));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider,
        })
    }

    /// Transcribe one finished utterance of WAV audio
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(
            audio_bytes = wav.len(),
            provider = ?self.provider,
            "starting transcription"
        );

        let request = match self.provider {
            SttProvider::Whisper => {
                let form = reqwest::multipart::Form::new()
                    .part(
                        "file",
                        reqwest::multipart::Part::bytes(wav)
                            .file_name("audio.wav")
                            .mime_str("audio/wav")
                            .map_err(|e| Error::Stt(e.to_string()))?,
                    )
                    .text("model", self.model.clone());
                self.client
                    .post("https://api.openai.com/v1/audio/transcriptions")
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .multipart(form)
            }
            SttProvider::Deepgram => self
                .client
                .post(format!(
                    "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
                    self.model
                ))
                .header("Authorization", format!("Token {}", self.api_key))
                .header("Content-Type", "audio/wav")
                .body(wav),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, provider = ?self.provider, "STT API error");
            return Err(Error::Stt(format!("STT error {status}: {body}")));
        }

        let body: serde_json::Value = response.json().await?;
        let transcript = extract_transcript(self.provider, &body)
            .ok_or_else(|| Error::Stt("malformed transcription response".to_string()))?;

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Pull the transcript text out of a provider response body
fn extract_transcript(provider: SttProvider, body: &serde_json::Value) -> Option<String> {
    let text = match provider {
        SttProvider::Whisper => body.get("text")?.as_str()?,
        SttProvider::Deepgram => body
            .pointer("/results/channels/0/alternatives/0/transcript")?
            .as_str()?,
    };
    Some(text.trim().to_string())
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn start_utterance(&self) -> Result<Box<dyn UtteranceStream>> {
        Ok(Box::new(BatchUtterance {
            stt: self.clone(),
            buffer: Vec::new(),
        }))
    }
}

/// One buffered utterance against a batch HTTP provider
struct BatchUtterance {
    stt: HttpSpeechToText,
    buffer: Vec<u8>,
}

#[async_trait]
impl UtteranceStream for BatchUtterance {
    async fn feed(&mut self, audio: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(audio);
        Ok(Vec::new())
    }

    async fn finish(self: Box<Self>) -> Result<String> {
        if self.buffer.is_empty() {
            return Ok(String::new());
        }

        // Raw PCM frames need a WAV header before they hit the API; a
        // client that already sent a container is passed through as-is.
        let wav = if self.buffer.starts_with(b"RIFF") {
            self.buffer
        } else {
            pcm16_to_wav(&self.buffer, INPUT_SAMPLE_RATE)?
        };

        self.stt.transcribe(wav).await
    }
}

/// Wrap little-endian PCM16 mono bytes in a WAV container
///
/// # Errors
///
/// Returns an error if WAV encoding fails
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Audio(e.to_string()))?;

        for sample in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
