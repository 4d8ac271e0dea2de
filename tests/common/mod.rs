//! Shared test doubles: scripted adapters and a server harness
//!
//! No audio hardware and no external providers; everything the pipeline
//! talks to is scripted here.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use parley_gateway::adapters::{
    Adapters, ReplyGenerator, SpeechToText, TextToSpeech, UtteranceStream,
};
use parley_gateway::api::ApiState;
use parley_gateway::config::TimeoutConfig;
use parley_gateway::{Error, Result};

/// Scripted STT: each `feed` call pops the next batch of partials; the
/// final transcript is fixed up front.
pub struct StubStt {
    pub partials: Vec<Vec<String>>,
    pub final_text: String,
    pub finish_delay: Duration,
    pub finishes: Arc<AtomicUsize>,
}

impl StubStt {
    pub fn new(partials: Vec<Vec<&str>>, final_text: &str) -> Self {
        Self {
            partials: partials
                .into_iter()
                .map(|batch| batch.into_iter().map(String::from).collect())
                .collect(),
            final_text: final_text.to_string(),
            finish_delay: Duration::ZERO,
            finishes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_finish_delay(mut self, delay: Duration) -> Self {
        self.finish_delay = delay;
        self
    }
}

#[async_trait]
impl SpeechToText for StubStt {
    async fn start_utterance(&self) -> Result<Box<dyn UtteranceStream>> {
        Ok(Box::new(StubUtterance {
            partials: self.partials.clone(),
            next: 0,
            final_text: self.final_text.clone(),
            finish_delay: self.finish_delay,
            finishes: Arc::clone(&self.finishes),
        }))
    }
}

struct StubUtterance {
    partials: Vec<Vec<String>>,
    next: usize,
    final_text: String,
    finish_delay: Duration,
    finishes: Arc<AtomicUsize>,
}

#[async_trait]
impl UtteranceStream for StubUtterance {
    async fn feed(&mut self, _audio: &[u8]) -> Result<Vec<String>> {
        let batch = self.partials.get(self.next).cloned().unwrap_or_default();
        self.next += 1;
        Ok(batch)
    }

    async fn finish(self: Box<Self>) -> Result<String> {
        if !self.finish_delay.is_zero() {
            tokio::time::sleep(self.finish_delay).await;
        }
        self.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(self.final_text)
    }
}

/// Scripted reply generator with a call counter
pub struct StubReply {
    pub reply: String,
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

impl StubReply {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ReplyGenerator for StubReply {
    async fn generate(&self, _text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

/// Reply generator that always fails
pub struct FailingReply;

#[async_trait]
impl ReplyGenerator for FailingReply {
    async fn generate(&self, _text: &str) -> Result<String> {
        Err(Error::Reply("upstream exploded".to_string()))
    }
}

/// Scripted TTS returning fixed chunks
pub struct StubTts {
    pub chunks: Vec<Vec<u8>>,
}

impl StubTts {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self { chunks }
    }

    /// One blob of `n` bytes
    pub fn blob(n: usize) -> Self {
        Self::new(vec![vec![0xAB; n]])
    }
}

#[async_trait]
impl TextToSpeech for StubTts {
    async fn synthesize(&self, _text: &str) -> Result<Vec<Vec<u8>>> {
        Ok(self.chunks.clone())
    }
}

/// Bundle stubs into an adapter set
pub fn stub_adapters(
    stt: impl SpeechToText + 'static,
    reply: impl ReplyGenerator + 'static,
    tts: impl TextToSpeech + 'static,
) -> Adapters {
    Adapters {
        stt: Arc::new(stt),
        reply: Arc::new(reply),
        tts: Arc::new(tts),
    }
}

/// API state around stub adapters
pub fn test_state(adapters: Adapters, auth_token: Option<&str>) -> ApiState {
    ApiState {
        adapters,
        timeouts: TimeoutConfig::default(),
        auth_token: auth_token.map(String::from),
        stt_provider: "stub".to_string(),
        tts_provider: "stub".to_string(),
        reply_configured: true,
        started_at: chrono::Utc::now(),
    }
}

/// Serve the full router on an ephemeral port
pub async fn spawn_server(state: ApiState) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let app = parley_gateway::api::router(Arc::new(state));
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, handle)
}

/// Drain a session outbound channel into a vec
pub async fn collect_outbound(
    rx: &mut mpsc::Receiver<parley_gateway::session::Outbound>,
) -> Vec<parley_gateway::session::Outbound> {
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item);
    }
    out
}
