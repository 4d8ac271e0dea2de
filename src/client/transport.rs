//! Persistent WebSocket transport to the gateway
//!
//! Owns authentication and the reconnect/backoff policy so callers only
//! see a send surface plus an ordered stream of transport events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use url::Url;

use crate::protocol::{CLOSE_NORMAL, CLOSE_UNAUTHORIZED, ClientEvent, ServerEvent};
use crate::{Error, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, tungstenite::Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Transport connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// What the transport delivers to the application, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Parsed structured text frame
    Event(ServerEvent),
    /// One binary reply audio chunk
    Audio(Vec<u8>),
}

/// Where connection tokens come from
pub enum TokenSource {
    /// No authentication
    None,
    /// A fixed token
    Static(String),
    /// Fetched from a discovery endpoint returning `{"token": …}`;
    /// cached after the first fetch, re-fetched once on auth failure
    Discovery {
        url: String,
        cached: Option<String>,
    },
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    token: String,
}

impl TokenSource {
    /// Resolve a token, using the cache when present
    async fn resolve(&mut self) -> Result<Option<String>> {
        match self {
            Self::None => Ok(None),
            Self::Static(token) => Ok(Some(token.clone())),
            Self::Discovery { url, cached } => {
                if let Some(token) = cached {
                    return Ok(Some(token.clone()));
                }
                let token = fetch_token(url).await?;
                *cached = Some(token.clone());
                Ok(Some(token))
            }
        }
    }

    /// Drop any cached token and resolve again
    async fn refresh(&mut self) -> Result<Option<String>> {
        if let Self::Discovery { cached, .. } = self {
            *cached = None;
        }
        self.resolve().await
    }
}

async fn fetch_token(url: &str) -> Result<String> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        return Err(Error::Auth(format!(
            "token discovery failed: {}",
            response.status()
        )));
    }
    let parsed: TokenResponse = response.json().await?;
    Ok(parsed.token)
}

/// Reconnect backoff tuning
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// First delay; doubles on each consecutive failed attempt
    pub base: Duration,
    /// Upper bound on any single delay
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnection attempt number `attempt` (zero-based)
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

struct Inner {
    server_url: String,
    token_source: Mutex<TokenSource>,
    backoff: BackoffPolicy,
    sink: Mutex<Option<WsSink>>,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: mpsc::Sender<TransportEvent>,
    capturing: AtomicBool,
    closed_by_user: AtomicBool,
    attempts: AtomicU32,
}

/// Client side of the streaming voice channel
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Create a transport for the given gateway URL
    ///
    /// Returns the transport plus a status watch and the ordered event
    /// stream.
    #[must_use]
    pub fn new(
        server_url: String,
        token_source: TokenSource,
        backoff: BackoffPolicy,
    ) -> (
        Self,
        watch::Receiver<ConnectionStatus>,
        mpsc::Receiver<TransportEvent>,
    ) {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(64);

        let transport = Self {
            inner: Arc::new(Inner {
                server_url,
                token_source: Mutex::new(token_source),
                backoff,
                sink: Mutex::new(None),
                status_tx,
                events_tx,
                capturing: AtomicBool::new(false),
                closed_by_user: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
            }),
        };
        (transport, status_rx, events_rx)
    }

    /// Open the connection
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when the server refuses the handshake for
    /// credential reasons, [`Error::Connectivity`] otherwise.
    pub async fn connect(&self) -> Result<()> {
        self.inner.closed_by_user.store(false, Ordering::SeqCst);
        try_connect(&self.inner, false).await
    }

    /// Whether the connection is currently open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.inner.status_tx.borrow() == ConnectionStatus::Connected
    }

    /// Mark audio capture active/inactive
    ///
    /// While capture is active an unexpected close does not trigger
    /// automatic reconnection; the next user action reconnects instead.
    pub fn set_capturing(&self, active: bool) {
        self.inner.capturing.store(active, Ordering::SeqCst);
    }

    /// Send one binary audio frame
    ///
    /// Dropped with a trace log when the connection is not open; frames
    /// are never queued across a closed connection.
    ///
    /// # Errors
    ///
    /// Returns an error only for a mid-write transport failure.
    pub async fn send_audio(&self, chunk: Vec<u8>) -> Result<()> {
        self.send(tungstenite::Message::Binary(chunk)).await
    }

    /// Send the end-of-utterance control message
    ///
    /// # Errors
    ///
    /// Returns an error only for a mid-write transport failure.
    pub async fn send_stop(&self) -> Result<()> {
        let text = serde_json::to_string(&ClientEvent::Stop)?;
        self.send(tungstenite::Message::Text(text)).await
    }

    async fn send(&self, msg: tungstenite::Message) -> Result<()> {
        let mut sink = self.inner.sink.lock().await;
        match sink.as_mut() {
            Some(ws) => {
                if let Err(e) = ws.send(msg).await {
                    *sink = None;
                    return Err(Error::Connectivity(e.to_string()));
                }
                Ok(())
            }
            None => {
                tracing::trace!("send skipped: connection not open");
                Ok(())
            }
        }
    }

    /// Graceful shutdown with the normal-intent close code
    ///
    /// The far end (and our own read loop) sees code 1000 and does not
    /// schedule reconnection.
    pub async fn close(&self) {
        self.inner.closed_by_user.store(true, Ordering::SeqCst);
        let mut sink = self.inner.sink.lock().await;
        if let Some(ws) = sink.as_mut() {
            let frame = tungstenite::protocol::CloseFrame {
                code: CLOSE_NORMAL.into(),
                reason: "bye".into(),
            };
            let _ = ws.send(tungstenite::Message::Close(Some(frame))).await;
            let _ = ws.flush().await;
        }
        *sink = None;
        let _ = self.inner.status_tx.send(ConnectionStatus::Disconnected);
    }
}

/// One connection attempt: resolve token, open, install IO tasks
async fn try_connect(inner: &Arc<Inner>, refresh_token: bool) -> Result<()> {
    let _ = inner.status_tx.send(ConnectionStatus::Connecting);

    let token = {
        let mut source = inner.token_source.lock().await;
        if refresh_token {
            source.refresh().await?
        } else {
            source.resolve().await?
        }
    };

    let url = build_url(&inner.server_url, token.as_deref())?;

    match connect_async(url.as_str()).await {
        Ok((stream, _)) => {
            inner.attempts.store(0, Ordering::SeqCst);
            let (ws_sink, ws_source) = stream.split();
            *inner.sink.lock().await = Some(ws_sink);
            let _ = inner.status_tx.send(ConnectionStatus::Connected);
            tracing::info!(url = %redact(&url), "transport connected");

            tokio::spawn(read_loop(Arc::clone(inner), ws_source));
            Ok(())
        }
        Err(e) => {
            let _ = inner.status_tx.send(ConnectionStatus::Disconnected);
            Err(classify_connect_error(&e))
        }
    }
}

/// Deliver incoming frames in order; on close, apply the reconnect policy
///
/// Returns a boxed future so the `tokio::spawn` in `try_connect` discharges
/// its `Send` bound against this explicit type, breaking the mutually
/// recursive `Send` auto-trait cycle between the two functions.
fn read_loop(inner: Arc<Inner>, mut source: WsSource) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
    let mut close_code: Option<u16> = None;

    while let Some(msg) = source.next().await {
        match msg {
            Ok(tungstenite::Message::Text(text)) => {
                match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        if inner
                            .events_tx
                            .send(TransportEvent::Event(event))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "unrecognized text frame"),
                }
            }
            Ok(tungstenite::Message::Binary(data)) => {
                if inner
                    .events_tx
                    .send(TransportEvent::Audio(data))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Ok(tungstenite::Message::Close(frame)) => {
                close_code = frame.map(|f| u16::from(f.code));
                tracing::info!(code = ?close_code, "server closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "transport read error");
                break;
            }
        }
    }

    *inner.sink.lock().await = None;
    let _ = inner.status_tx.send(ConnectionStatus::Disconnected);

    schedule_reconnect(inner, close_code).await;
    })
}

/// Reconnect policy for an ended connection
///
/// Normal-intent closes never reconnect. While capture is active,
/// reconnection is deferred to the next user-initiated connect. An
/// unauthorized close gets exactly one token-refresh round trip before
/// the standard backoff sequence takes over.
async fn schedule_reconnect(inner: Arc<Inner>, close_code: Option<u16>) {
    if close_code == Some(CLOSE_NORMAL) || inner.closed_by_user.load(Ordering::SeqCst) {
        return;
    }
    if inner.capturing.load(Ordering::SeqCst) {
        tracing::info!("reconnect deferred: capture in progress");
        return;
    }

    if close_code == Some(CLOSE_UNAUTHORIZED) {
        tracing::info!("unauthorized close: refreshing token");
        match try_connect(&inner, true).await {
            Ok(()) => return,
            Err(e) => tracing::warn!(error = %e, "reconnect with fresh token failed"),
        }
    }

    loop {
        if inner.events_tx.is_closed() {
            return;
        }
        let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = inner.backoff.delay(attempt);
        tracing::info!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::time::sleep(delay).await;

        match try_connect(&inner, false).await {
            Ok(()) => return,
            Err(e) => tracing::debug!(error = %e, "reconnect attempt failed"),
        }
    }
}

/// Append the token as a query parameter
fn build_url(server_url: &str, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(server_url)
        .map_err(|e| Error::Config(format!("invalid server URL: {e}")))?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    if url.query().is_some() {
        clean.set_query(Some("token=***"));
    }
    clean.to_string()
}

/// Distinguish credential rejections from plain connectivity failures
fn classify_connect_error(err: &tungstenite::Error) -> Error {
    if let tungstenite::Error::Http(response) = err {
        let code = response.status().as_u16();
        if code == 401 || code == 403 {
            return Error::Auth(format!("handshake rejected: {code}"));
        }
    }
    Error::Connectivity(err.to_string())
}
