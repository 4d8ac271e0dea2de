//! Native client: microphone in, ordered reply audio out
//!
//! Mirrors what the browser client does — capture, transport session
//! with reconnect/backoff, strictly ordered playback.

mod capture;
mod playback;
mod transport;

pub use capture::{AudioCapture, resample_to_input_rate, samples_to_pcm16};
pub use playback::{AudioSink, CpalSink, PlaybackQueue, decode_chunk};
pub use transport::{
    BackoffPolicy, ConnectionStatus, TokenSource, Transport, TransportEvent,
};
