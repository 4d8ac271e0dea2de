//! Per-connection session state machine
//!
//! One [`Session`] owns the whole conversational loop for one connected
//! client: audio frames in, transcript/reply events and reply audio out.
//! The session task is the single owner of its utterance stream and any
//! in-flight adapter call; dropping the task (connection closed) cancels
//! everything, so a dead session can never deliver late events.

use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::adapters::{
    Adapters, ReplyGenerator as _, SpeechToText as _, TextToSpeech as _, UtteranceStream,
};
use crate::config::TimeoutConfig;
use crate::protocol::{NoReplyReason, ServerEvent};
use crate::{Error, Result};

/// Reply prefixes that mean the generator only mirrored the input back
///
/// Matches the rule-based fallback shapes some chat backends answer with
/// when they have nothing to say. Heuristic and tunable, not a guarantee.
const ECHO_PREFIXES: &[&str] = &["you said:", "i hear you"];

/// Pipeline position of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Ready for a new utterance
    Idle,
    /// Accepting audio frames
    Capturing,
    /// Stop received, awaiting the final transcript
    Finalizing,
    /// Awaiting the reply generator
    Thinking,
    /// Awaiting speech synthesis
    Synthesizing,
    /// Emitting reply audio chunks
    StreamingReply,
    /// Connection gone; terminal
    Closed,
}

/// Input delivered to a session by its transport
#[derive(Debug)]
pub enum SessionInput {
    /// One binary audio frame
    ///
    /// The first frame while idle doubles as the start signal.
    Frame(Vec<u8>),
    /// End of utterance
    Stop,
}

/// Output emitted by a session toward its transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Structured text frame
    Event(ServerEvent),
    /// One reply audio chunk, to be forwarded as a binary frame
    Audio(Vec<u8>),
}

/// Server-side state for one connected client's conversational loop
pub struct Session {
    id: Uuid,
    state: SessionState,
    adapters: Adapters,
    timeouts: TimeoutConfig,
    utterance: Option<Box<dyn UtteranceStream>>,
    outbound: mpsc::Sender<Outbound>,
}

impl Session {
    #[must_use]
    pub fn new(
        adapters: Adapters,
        timeouts: TimeoutConfig,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            adapters,
            timeouts,
            utterance: None,
            outbound,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Drive the session until its input channel closes
    ///
    /// Inputs are processed strictly in arrival order. The utterance
    /// pipeline (finalize → think → synthesize → stream) runs inline, so
    /// frames of the next utterance queue up behind it and never
    /// interleave with the previous reply.
    pub async fn run(mut self, mut input: mpsc::Receiver<SessionInput>) {
        tracing::debug!(session_id = %self.id, "session started");

        while let Some(msg) = input.recv().await {
            let progressed = match msg {
                SessionInput::Frame(frame) => self.on_frame(frame).await,
                SessionInput::Stop => self.on_stop().await,
            };
            if progressed.is_err() {
                // outbound side is gone; the connection is closing
                break;
            }
        }

        self.state = SessionState::Closed;
        tracing::debug!(session_id = %self.id, "session closed");
    }

    /// Handle one audio frame
    async fn on_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        match self.state {
            SessionState::Idle => {
                let stream = match self.adapters.stt.start_utterance().await {
                    Ok(stream) => stream,
                    Err(e) => return self.fail_to_idle(&e).await,
                };
                self.utterance = Some(stream);
                self.state = SessionState::Capturing;
                tracing::debug!(session_id = %self.id, "capture started");
                self.feed(frame).await
            }
            SessionState::Capturing => self.feed(frame).await,
            _ => {
                tracing::trace!(session_id = %self.id, state = ?self.state, "frame dropped");
                Ok(())
            }
        }
    }

    /// Forward one frame to the utterance stream, relaying any partials
    async fn feed(&mut self, frame: Vec<u8>) -> Result<()> {
        let Some(stream) = self.utterance.as_mut() else {
            return Ok(());
        };

        match stream.feed(&frame).await {
            Ok(partials) => {
                for text in partials {
                    self.send(Outbound::Event(ServerEvent::Partial { text }))
                        .await?;
                }
                Ok(())
            }
            Err(e) => {
                self.utterance = None;
                self.fail_to_idle(&e).await
            }
        }
    }

    /// Handle a stop signal: finalize and run the reply pipeline
    ///
    /// A stop with no utterance in flight is ignored, which makes
    /// repeated stops harmless.
    async fn on_stop(&mut self) -> Result<()> {
        if self.state != SessionState::Capturing {
            tracing::debug!(session_id = %self.id, state = ?self.state, "stop ignored");
            return Ok(());
        }
        let Some(stream) = self.utterance.take() else {
            return Ok(());
        };

        // Even with zero partials, the adapter is always consulted for
        // exactly one final transcript.
        self.state = SessionState::Finalizing;
        let transcript = match self
            .bounded("final transcript", self.timeouts.finalize(), stream.finish())
            .await
        {
            Ok(text) => text,
            Err(e) => return self.fail_to_idle(&e).await,
        };

        if transcript.trim().is_empty() {
            tracing::info!(session_id = %self.id, "empty utterance");
            self.send(Outbound::Event(ServerEvent::NoReply {
                reason: NoReplyReason::NoSpeech,
            }))
            .await?;
            self.state = SessionState::Idle;
            return Ok(());
        }

        self.send(Outbound::Event(ServerEvent::Transcript {
            text: transcript.clone(),
        }))
        .await?;

        self.state = SessionState::Thinking;
        tracing::info!(session_id = %self.id, transcript = %transcript, "thinking");
        let reply = match self
            .bounded(
                "reply text",
                self.timeouts.reply(),
                self.adapters.reply.generate(&transcript),
            )
            .await
        {
            Ok(text) => text,
            Err(e) => return self.fail_to_idle(&e).await,
        };

        if reply.trim().is_empty() {
            self.send(Outbound::Event(ServerEvent::NoReply {
                reason: NoReplyReason::Empty,
            }))
            .await?;
            self.state = SessionState::Idle;
            return Ok(());
        }

        if is_echo(&transcript, &reply) {
            tracing::info!(session_id = %self.id, "reply suppressed as echo");
            self.send(Outbound::Event(ServerEvent::NoReply {
                reason: NoReplyReason::Echo,
            }))
            .await?;
            self.state = SessionState::Idle;
            return Ok(());
        }

        self.send(Outbound::Event(ServerEvent::Reply {
            text: reply.clone(),
        }))
        .await?;

        self.state = SessionState::Synthesizing;
        let chunks = match self
            .bounded(
                "reply audio",
                self.timeouts.synthesize(),
                self.adapters.tts.synthesize(&reply),
            )
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => return self.fail_to_idle(&e).await,
        };

        self.state = SessionState::StreamingReply;
        for chunk in chunks {
            self.send(Outbound::Audio(chunk)).await?;
        }

        self.state = SessionState::Idle;
        tracing::debug!(session_id = %self.id, "utterance complete");
        Ok(())
    }

    /// Bound one adapter await by its configured deadline
    async fn bounded<T>(
        &self,
        stage: &'static str,
        deadline: Duration,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(stage)),
        }
    }

    /// Report an adapter failure and reset to idle
    ///
    /// Adapter failures never take down the process or other sessions;
    /// the client sees an error event and the session is reusable.
    async fn fail_to_idle(&mut self, err: &Error) -> Result<()> {
        tracing::warn!(session_id = %self.id, error = %err, "pipeline error, resetting");
        self.send(Outbound::Event(ServerEvent::Error {
            code: error_code(err).to_string(),
            message: err.to_string(),
        }))
        .await?;
        self.utterance = None;
        self.state = SessionState::Idle;
        Ok(())
    }

    async fn send(&self, out: Outbound) -> Result<()> {
        self.outbound
            .send(out)
            .await
            .map_err(|_| Error::SessionClosed)
    }
}

/// Stable error code for the wire protocol
fn error_code(err: &Error) -> &'static str {
    match err {
        Error::NotConfigured(_) => "not_configured",
        Error::Timeout(_) => "timeout",
        Error::Stt(_) => "stt_error",
        Error::Reply(_) => "reply_error",
        Error::Tts(_) => "tts_error",
        Error::Auth(_) => "unauthorized",
        _ => "internal_error",
    }
}

/// Collapse runs of whitespace and lowercase for comparison
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether a reply merely echoes the transcript
fn is_echo(transcript: &str, reply: &str) -> bool {
    let reply = normalize(reply);
    if reply == normalize(transcript) {
        return true;
    }
    ECHO_PREFIXES.iter().any(|prefix| reply.starts_with(prefix))
}

/// Result of a single-shot conversational exchange
#[derive(Debug)]
pub struct ConverseOutcome {
    /// Final transcript (empty when no speech was recognized)
    pub transcript: String,
    /// Reply text, absent when the utterance yielded no genuine reply
    pub reply: Option<String>,
    /// Why no reply was produced, when one was not
    pub no_reply: Option<NoReplyReason>,
    /// Reply audio chunks in playback order
    pub audio: Vec<Vec<u8>>,
}

/// Run one Capturing→Idle pass through the state machine
///
/// Drives a real [`Session`] over channels, so the single-shot HTTP
/// surface exercises exactly the same pipeline as the streaming channel.
///
/// # Errors
///
/// Returns the underlying pipeline error when any stage fails.
pub async fn converse_once(
    adapters: Adapters,
    timeouts: TimeoutConfig,
    audio: Vec<u8>,
) -> Result<ConverseOutcome> {
    let (input_tx, input_rx) = mpsc::channel(4);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(32);

    let session = Session::new(adapters, timeouts, outbound_tx);
    let task = tokio::spawn(session.run(input_rx));

    input_tx
        .send(SessionInput::Frame(audio))
        .await
        .map_err(|_| Error::SessionClosed)?;
    input_tx
        .send(SessionInput::Stop)
        .await
        .map_err(|_| Error::SessionClosed)?;
    drop(input_tx);

    let mut outcome = ConverseOutcome {
        transcript: String::new(),
        reply: None,
        no_reply: None,
        audio: Vec::new(),
    };

    while let Some(out) = outbound_rx.recv().await {
        match out {
            Outbound::Event(ServerEvent::Transcript { text }) => outcome.transcript = text,
            Outbound::Event(ServerEvent::Reply { text }) => outcome.reply = Some(text),
            Outbound::Event(ServerEvent::NoReply { reason }) => outcome.no_reply = Some(reason),
            Outbound::Event(ServerEvent::Error { code, message }) => {
                task.abort();
                return Err(error_from_code(&code, message));
            }
            Outbound::Event(_) => {}
            Outbound::Audio(chunk) => outcome.audio.push(chunk),
        }
    }

    let _ = task.await;
    Ok(outcome)
}

/// Rehydrate a wire error code into the matching error variant
fn error_from_code(code: &str, message: String) -> Error {
    match code {
        "not_configured" => Error::NotConfigured("reply generator"),
        "timeout" => Error::Timeout("pipeline stage"),
        "stt_error" => Error::Stt(message),
        "tts_error" => Error::Tts(message),
        _ => Error::Reply(message),
    }
}
