//! Transport reconnect policy tests
//!
//! A scripted WebSocket server misbehaves on cue; accept timestamps on
//! the listener make the backoff schedule observable from outside.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite};

use common::{StubReply, StubStt, StubTts, spawn_server, stub_adapters, test_state};
use parley_gateway::client::{BackoffPolicy, ConnectionStatus, TokenSource, Transport};

/// What the scripted server does with the next accepted connection
#[derive(Clone, Copy)]
enum Behavior {
    /// Complete the handshake, then close with an error code
    CloseError,
    /// Drop the TCP socket before the handshake completes
    Refuse,
    /// Complete the handshake, stay open for a while, then error-close
    HoldThenClose(Duration),
    /// Complete the handshake and stay open
    Hold,
}

fn error_close_frame() -> tungstenite::protocol::CloseFrame<'static> {
    tungstenite::protocol::CloseFrame {
        code: 1011.into(),
        reason: "boom".into(),
    }
}

/// Serve scripted behaviors, recording the instant of every accept
async fn scripted_server(
    listener: TcpListener,
    script: Vec<Behavior>,
    accepts: Arc<Mutex<Vec<Instant>>>,
) {
    let mut script = script.into_iter();
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        accepts.lock().unwrap().push(Instant::now());

        match script.next().unwrap_or(Behavior::Hold) {
            Behavior::Refuse => drop(stream),
            Behavior::CloseError => {
                if let Ok(mut ws) = accept_async(stream).await {
                    let _ = ws
                        .send(tungstenite::Message::Close(Some(error_close_frame())))
                        .await;
                    let _ = ws.flush().await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
            Behavior::HoldThenClose(hold) => {
                if let Ok(mut ws) = accept_async(stream).await {
                    tokio::time::sleep(hold).await;
                    let _ = ws
                        .send(tungstenite::Message::Close(Some(error_close_frame())))
                        .await;
                    let _ = ws.flush().await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
            Behavior::Hold => {
                if let Ok(mut ws) = accept_async(stream).await {
                    tokio::spawn(async move { while ws.next().await.is_some() {} });
                }
            }
        }
    }
}

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_millis(100),
        cap: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn backoff_doubles_then_resets_after_success() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(Mutex::new(Vec::new()));

    // first connection error-closes; two attempts are refused; the
    // third succeeds, holds briefly, then error-closes again
    tokio::spawn(scripted_server(
        listener,
        vec![
            Behavior::CloseError,
            Behavior::Refuse,
            Behavior::Refuse,
            Behavior::HoldThenClose(Duration::from_millis(200)),
            Behavior::Hold,
        ],
        Arc::clone(&accepts),
    ));

    let (transport, _status, _events) = Transport::new(
        format!("ws://{addr}/ws/audio-stream"),
        TokenSource::None,
        fast_backoff(),
    );
    transport.connect().await.unwrap();

    // wait out the whole dance: close, 3 backed-off attempts, re-close,
    // one reset attempt
    tokio::time::sleep(Duration::from_millis(1600)).await;

    let accepts = accepts.lock().unwrap();
    assert!(accepts.len() >= 5, "only {} connection attempts", accepts.len());

    let gap1 = accepts[1] - accepts[0];
    let gap2 = accepts[2] - accepts[1];
    let gap3 = accepts[3] - accepts[2];
    // 1, 2, 4 time units (base = 100ms here), with scheduling slack
    assert!(gap1 >= Duration::from_millis(60) && gap1 < Duration::from_millis(190), "{gap1:?}");
    assert!(gap2 >= Duration::from_millis(150) && gap2 < Duration::from_millis(350), "{gap2:?}");
    assert!(gap3 >= Duration::from_millis(320) && gap3 < Duration::from_millis(700), "{gap3:?}");

    // after the successful open the counter reset: 200ms hold + ~100ms
    // first-step delay, nowhere near the 800ms an unreset schedule gives
    let gap4 = accepts[4] - accepts[3];
    assert!(gap4 < Duration::from_millis(600), "backoff did not reset: {gap4:?}");
}

#[tokio::test]
async fn no_reconnect_while_capturing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(Mutex::new(Vec::new()));

    tokio::spawn(scripted_server(
        listener,
        vec![Behavior::CloseError, Behavior::Hold],
        Arc::clone(&accepts),
    ));

    let (transport, _status, _events) = Transport::new(
        format!("ws://{addr}/ws/audio-stream"),
        TokenSource::None,
        fast_backoff(),
    );
    transport.set_capturing(true);
    transport.connect().await.unwrap();

    // far longer than the first backoff step: no attempt may fire while
    // capture is active
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(accepts.lock().unwrap().len(), 1);

    // the next user-initiated connect is the reconnect
    transport.set_capturing(false);
    transport.connect().await.unwrap();
    assert_eq!(accepts.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn normal_close_does_not_reconnect() {
    let (adapters, _) = {
        let stt = StubStt::new(vec![], "x");
        let finishes = Arc::clone(&stt.finishes);
        (
            stub_adapters(stt, StubReply::new("y"), StubTts::blob(4)),
            finishes,
        )
    };
    let (addr, _server) = spawn_server(test_state(adapters, None)).await;

    let (transport, mut status, _events) = Transport::new(
        format!("ws://{addr}/ws/audio-stream"),
        TokenSource::None,
        fast_backoff(),
    );
    transport.connect().await.unwrap();
    assert!(transport.is_connected());

    transport.close().await;

    // disconnected and staying that way
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(*status.borrow_and_update(), ConnectionStatus::Disconnected);
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn unauthorized_close_refreshes_token_once_and_reconnects() {
    // gateway that only accepts "fresh"
    let stt = StubStt::new(vec![], "x");
    let adapters = stub_adapters(stt, StubReply::new("y"), StubTts::blob(4));
    let (ws_addr, _server) = spawn_server(test_state(adapters, Some("fresh"))).await;

    // token discovery endpoint: stale on the first call, fresh after
    let fetches = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let fetches_handler = Arc::clone(&fetches);
    let token_app = axum::Router::new().route(
        "/token",
        axum::routing::get(move || {
            let fetches = Arc::clone(&fetches_handler);
            async move {
                let n = fetches.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let token = if n == 0 { "stale" } else { "fresh" };
                axum::Json(serde_json::json!({ "token": token }))
            }
        }),
    );
    let token_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let token_addr = token_listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(token_listener, token_app).await;
    });

    let (transport, _status, _events) = Transport::new(
        format!("ws://{ws_addr}/ws/audio-stream"),
        TokenSource::Discovery {
            url: format!("http://{token_addr}/token"),
            cached: None,
        },
        fast_backoff(),
    );

    // first connect uses the stale token; the gateway closes with 1008,
    // the transport refreshes once and gets back in
    transport.connect().await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if fetches.load(std::sync::atomic::Ordering::SeqCst) >= 2 && transport.is_connected() {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "never reconnected after token refresh"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(
        fetches.load(std::sync::atomic::Ordering::SeqCst),
        2,
        "expected exactly one refresh fetch after the cached resolve"
    );
}
