//! Session state machine integration tests
//!
//! Drives sessions over channels with scripted adapters; no sockets, no
//! audio hardware.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;

use common::{FailingReply, StubReply, StubStt, StubTts, stub_adapters};
use parley_gateway::adapters::Adapters;
use parley_gateway::adapters::ReplyGenerator;
use parley_gateway::config::TimeoutConfig;
use parley_gateway::protocol::{NoReplyReason, ServerEvent};
use parley_gateway::session::{Outbound, Session, SessionInput, converse_once};

fn short_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        finalize_secs: 1,
        reply_secs: 1,
        synthesize_secs: 1,
    }
}

/// Run a session over the given inputs and collect everything it emits
async fn drive(adapters: Adapters, inputs: Vec<SessionInput>) -> Vec<Outbound> {
    let (input_tx, input_rx) = mpsc::channel(64);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(64);

    let task = tokio::spawn(Session::new(adapters, short_timeouts(), outbound_tx).run(input_rx));
    for input in inputs {
        input_tx.send(input).await.unwrap();
    }
    drop(input_tx);

    let mut out = Vec::new();
    while let Some(item) = outbound_rx.recv().await {
        out.push(item);
    }
    task.await.unwrap();
    out
}

fn frame(data: &[u8]) -> SessionInput {
    SessionInput::Frame(data.to_vec())
}

#[tokio::test]
async fn full_scenario_event_order() {
    let stt = StubStt::new(vec![vec!["hel"], vec!["hello there"], vec![]], "hello there");
    let adapters = stub_adapters(stt, StubReply::new("Hi! How can I help?"), StubTts::blob(500));

    let out = drive(
        adapters,
        vec![frame(b"he"), frame(b"llo th"), frame(b"ere"), SessionInput::Stop],
    )
    .await;

    assert_eq!(
        out,
        vec![
            Outbound::Event(ServerEvent::Partial {
                text: "hel".to_string()
            }),
            Outbound::Event(ServerEvent::Partial {
                text: "hello there".to_string()
            }),
            Outbound::Event(ServerEvent::Transcript {
                text: "hello there".to_string()
            }),
            Outbound::Event(ServerEvent::Reply {
                text: "Hi! How can I help?".to_string()
            }),
            Outbound::Audio(vec![0xAB; 500]),
        ]
    );
}

#[tokio::test]
async fn session_is_ready_for_next_utterance() {
    let stt = StubStt::new(vec![vec!["one"]], "one");
    let adapters = stub_adapters(stt, StubReply::new("reply!"), StubTts::blob(8));

    let out = drive(
        adapters,
        vec![
            frame(b"a"),
            SessionInput::Stop,
            frame(b"b"),
            SessionInput::Stop,
        ],
    )
    .await;

    let transcripts = out
        .iter()
        .filter(|o| matches!(o, Outbound::Event(ServerEvent::Transcript { .. })))
        .count();
    let audio = out.iter().filter(|o| matches!(o, Outbound::Audio(_))).count();
    assert_eq!(transcripts, 2, "both utterances complete: {out:?}");
    assert_eq!(audio, 2);
}

#[tokio::test]
async fn zero_partials_still_yield_exactly_one_final() {
    let stt = StubStt::new(vec![], "quiet words");
    let finishes = Arc::clone(&stt.finishes);
    let adapters = stub_adapters(stt, StubReply::new("heard you"), StubTts::blob(4));

    let out = drive(adapters, vec![frame(b"x"), SessionInput::Stop]).await;

    assert_eq!(finishes.load(Ordering::SeqCst), 1);
    let partials = out
        .iter()
        .filter(|o| matches!(o, Outbound::Event(ServerEvent::Partial { .. })))
        .count();
    assert_eq!(partials, 0);
    assert!(out.contains(&Outbound::Event(ServerEvent::Transcript {
        text: "quiet words".to_string()
    })));
}

#[tokio::test]
async fn double_stop_is_idempotent() {
    let stt = StubStt::new(vec![vec!["hi"]], "hi there");
    let finishes = Arc::clone(&stt.finishes);
    let reply = StubReply::new("hello!");
    let reply_calls = Arc::clone(&reply.calls);
    let adapters = stub_adapters(stt, reply, StubTts::blob(4));

    let out = drive(
        adapters,
        vec![frame(b"x"), SessionInput::Stop, SessionInput::Stop],
    )
    .await;

    assert_eq!(finishes.load(Ordering::SeqCst), 1, "one final transcript");
    assert_eq!(reply_calls.load(Ordering::SeqCst), 1, "one reply generation");
    let finals = out
        .iter()
        .filter(|o| matches!(o, Outbound::Event(ServerEvent::Transcript { .. })))
        .count();
    assert_eq!(finals, 1);
}

#[tokio::test]
async fn stop_without_audio_is_ignored() {
    let stt = StubStt::new(vec![], "never");
    let finishes = Arc::clone(&stt.finishes);
    let adapters = stub_adapters(stt, StubReply::new("never"), StubTts::blob(4));

    let out = drive(adapters, vec![SessionInput::Stop]).await;

    // no utterance was started, so the adapter is never consulted
    assert_eq!(finishes.load(Ordering::SeqCst), 0);
    assert!(out.is_empty(), "unexpected events: {out:?}");
}

#[tokio::test]
async fn empty_transcript_reports_no_speech() {
    let stt = StubStt::new(vec![], "   ");
    let reply = StubReply::new("should not run");
    let reply_calls = Arc::clone(&reply.calls);
    let adapters = stub_adapters(stt, reply, StubTts::blob(4));

    let out = drive(adapters, vec![frame(b"x"), SessionInput::Stop]).await;

    assert_eq!(
        out,
        vec![Outbound::Event(ServerEvent::NoReply {
            reason: NoReplyReason::NoSpeech
        })]
    );
    assert_eq!(reply_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn echoed_reply_is_suppressed() {
    let stt = StubStt::new(vec![], "tell me a story");
    let adapters = stub_adapters(
        stt,
        StubReply::new("  Tell me   a story "),
        StubTts::blob(4),
    );

    let out = drive(adapters, vec![frame(b"x"), SessionInput::Stop]).await;

    assert!(out.contains(&Outbound::Event(ServerEvent::NoReply {
        reason: NoReplyReason::Echo
    })));
    assert!(
        !out.iter()
            .any(|o| matches!(o, Outbound::Event(ServerEvent::Reply { .. }))),
        "duplicate reply leaked: {out:?}"
    );
    assert!(!out.iter().any(|o| matches!(o, Outbound::Audio(_))));
}

#[tokio::test]
async fn echo_prefix_reply_is_suppressed() {
    let stt = StubStt::new(vec![], "I have a headache");
    let adapters = stub_adapters(
        stt,
        StubReply::new("You said: 'I have a headache'. Tell me more about that."),
        StubTts::blob(4),
    );

    let out = drive(adapters, vec![frame(b"x"), SessionInput::Stop]).await;

    assert!(out.contains(&Outbound::Event(ServerEvent::NoReply {
        reason: NoReplyReason::Echo
    })));
}

#[tokio::test]
async fn missing_reply_provider_is_reported_distinctly() {
    let stt = StubStt::new(vec![], "hello");
    let adapters = stub_adapters(
        stt,
        parley_gateway::adapters::NullReplyGenerator,
        StubTts::blob(4),
    );

    let out = drive(
        adapters,
        vec![frame(b"x"), SessionInput::Stop, frame(b"y"), SessionInput::Stop],
    )
    .await;

    let not_configured = out
        .iter()
        .filter(|o| {
            matches!(
                o,
                Outbound::Event(ServerEvent::Error { code, .. }) if code == "not_configured"
            )
        })
        .count();
    // both utterances fail the same way: the session recovered to idle
    assert_eq!(not_configured, 2, "events: {out:?}");
}

#[tokio::test]
async fn adapter_failure_resets_session_not_process() {
    let stt = StubStt::new(vec![], "hello");
    let adapters = stub_adapters(stt, FailingReply, StubTts::blob(4));

    let out = drive(
        adapters,
        vec![frame(b"x"), SessionInput::Stop, frame(b"y"), SessionInput::Stop],
    )
    .await;

    let errors = out
        .iter()
        .filter(|o| {
            matches!(
                o,
                Outbound::Event(ServerEvent::Error { code, .. }) if code == "reply_error"
            )
        })
        .count();
    assert_eq!(errors, 2);
}

#[tokio::test(start_paused = true)]
async fn slow_reply_times_out_to_error() {
    let stt = StubStt::new(vec![], "hello");
    let adapters = stub_adapters(
        stt,
        StubReply::new("too late").with_delay(Duration::from_secs(300)),
        StubTts::blob(4),
    );

    let out = drive(adapters, vec![frame(b"x"), SessionInput::Stop]).await;

    assert!(
        out.iter().any(|o| matches!(
            o,
            Outbound::Event(ServerEvent::Error { code, .. }) if code == "timeout"
        )),
        "no timeout error: {out:?}"
    );
    assert!(
        !out.iter()
            .any(|o| matches!(o, Outbound::Event(ServerEvent::Reply { .. }))),
        "late reply leaked"
    );
}

#[tokio::test(start_paused = true)]
async fn closed_session_delivers_no_further_events() {
    let stt = StubStt::new(vec![], "hello");
    let adapters = stub_adapters(
        stt,
        StubReply::new("eventually").with_delay(Duration::from_secs(60)),
        StubTts::blob(4),
    );

    let (input_tx, input_rx) = mpsc::channel(8);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
    // deadlines far beyond the stub delay: the abort is what must stop
    // the pipeline here, not a timeout
    let generous = TimeoutConfig {
        finalize_secs: 3600,
        reply_secs: 3600,
        synthesize_secs: 3600,
    };
    let task = tokio::spawn(Session::new(adapters, generous, outbound_tx).run(input_rx));

    input_tx.send(frame(b"x")).await.unwrap();
    input_tx.send(SessionInput::Stop).await.unwrap();

    let first = outbound_rx.recv().await.unwrap();
    assert!(matches!(
        first,
        Outbound::Event(ServerEvent::Transcript { .. })
    ));

    // connection closed mid-Thinking: the in-flight reply call dies with
    // the task and nothing else arrives
    task.abort();
    assert!(outbound_rx.recv().await.is_none());
}

#[tokio::test]
async fn multi_chunk_reply_streams_in_generation_order() {
    let stt = StubStt::new(vec![], "hello");
    let adapters = stub_adapters(
        stt,
        StubReply::new("chunky"),
        StubTts::new(vec![vec![1; 10], vec![2; 20], vec![3; 30]]),
    );

    let out = drive(adapters, vec![frame(b"x"), SessionInput::Stop]).await;

    let audio: Vec<&Vec<u8>> = out
        .iter()
        .filter_map(|o| match o {
            Outbound::Audio(chunk) => Some(chunk),
            Outbound::Event(_) => None,
        })
        .collect();
    assert_eq!(audio.len(), 3);
    assert_eq!(audio[0][0], 1);
    assert_eq!(audio[1][0], 2);
    assert_eq!(audio[2][0], 3);
}

#[tokio::test]
async fn converse_once_runs_full_pipeline() {
    let stt = StubStt::new(vec![vec!["hi"]], "hello there");
    let adapters = stub_adapters(stt, StubReply::new("Hi! How can I help?"), StubTts::blob(500));

    let outcome = converse_once(adapters, short_timeouts(), b"audio".to_vec())
        .await
        .unwrap();

    assert_eq!(outcome.transcript, "hello there");
    assert_eq!(outcome.reply.as_deref(), Some("Hi! How can I help?"));
    assert!(outcome.no_reply.is_none());
    assert_eq!(outcome.audio.len(), 1);
    assert_eq!(outcome.audio[0].len(), 500);
}

#[tokio::test]
async fn converse_once_surfaces_not_configured() {
    let stt = StubStt::new(vec![], "hello");
    let adapters = stub_adapters(
        stt,
        parley_gateway::adapters::NullReplyGenerator,
        StubTts::blob(4),
    );

    let result = converse_once(adapters, short_timeouts(), b"audio".to_vec()).await;
    assert!(matches!(
        result,
        Err(parley_gateway::Error::NotConfigured(_))
    ));
}

#[tokio::test]
async fn null_generator_distinct_from_empty_reply() {
    // an empty-but-valid reply is a NoReply outcome, not an error
    let stt = StubStt::new(vec![], "hello");
    let adapters = stub_adapters(stt, StubReply::new(""), StubTts::blob(4));

    let out = drive(adapters, vec![frame(b"x"), SessionInput::Stop]).await;

    assert!(out.contains(&Outbound::Event(ServerEvent::NoReply {
        reason: NoReplyReason::Empty
    })));
    assert!(
        !out.iter()
            .any(|o| matches!(o, Outbound::Event(ServerEvent::Error { .. })))
    );

    // whereas a missing provider is an explicit error
    let err = parley_gateway::adapters::NullReplyGenerator
        .generate("hello")
        .await;
    assert!(matches!(err, Err(parley_gateway::Error::NotConfigured(_))));
}
