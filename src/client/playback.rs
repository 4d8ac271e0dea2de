//! Ordered reply audio playback
//!
//! Chunks play strictly in arrival order, one at a time; chunk N+1 only
//! starts after chunk N finished or failed. A failed chunk is logged and
//! skipped, never replayed. Reset stops the current chunk and drops
//! everything still queued.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Something that can play decoded samples to completion
///
/// `play` blocks until the chunk finished naturally, failed, or `cancel`
/// was raised.
pub trait AudioSink: Send {
    /// Play one decoded chunk
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk cannot be played
    fn play(&mut self, samples: &[f32], sample_rate: u32, cancel: &AtomicBool) -> Result<()>;
}

/// Sequential playback queue over any [`AudioSink`]
pub struct PlaybackQueue {
    tx: Option<mpsc::Sender<(u64, Vec<u8>)>>,
    generation: Arc<AtomicU64>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackQueue {
    /// Spawn the playback worker over the given sink
    #[must_use]
    pub fn new(mut sink: Box<dyn AudioSink>) -> Self {
        let (tx, rx) = mpsc::channel::<(u64, Vec<u8>)>();
        let generation = Arc::new(AtomicU64::new(0));
        let cancel = Arc::new(AtomicBool::new(false));

        let generation_worker = Arc::clone(&generation);
        let cancel_worker = Arc::clone(&cancel);
        let worker = std::thread::spawn(move || {
            while let Ok((queued_gen, chunk)) = rx.recv() {
                // chunks enqueued before the last reset are dropped unplayed
                if queued_gen < generation_worker.load(Ordering::SeqCst) {
                    tracing::debug!(bytes = chunk.len(), "dropping chunk from reset queue");
                    continue;
                }
                cancel_worker.store(false, Ordering::SeqCst);

                let (samples, sample_rate) = match decode_chunk(&chunk) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        tracing::warn!(error = %e, bytes = chunk.len(), "chunk decode failed, skipping");
                        continue;
                    }
                };

                if let Err(e) = sink.play(&samples, sample_rate, &cancel_worker) {
                    tracing::warn!(error = %e, "chunk playback failed, skipping");
                }
            }
        });

        Self {
            tx: Some(tx),
            generation,
            cancel,
            worker: Some(worker),
        }
    }

    /// Queue one audio chunk behind everything already queued
    pub fn enqueue(&self, chunk: Vec<u8>) {
        let generation = self.generation.load(Ordering::SeqCst);
        if let Some(tx) = &self.tx
            && tx.send((generation, chunk)).is_err()
        {
            tracing::warn!("playback worker gone, chunk dropped");
        }
    }

    /// Stop the current chunk and drop all queued chunks
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel.store(true, Ordering::SeqCst);
        tracing::debug!("playback queue reset");
    }

    /// Wait for all queued chunks to finish and stop the worker
    pub fn shutdown(mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.tx.take();
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Decode one self-describing audio chunk to mono f32 samples
///
/// WAV and MP3 are recognized from the container header.
///
/// # Errors
///
/// Returns an error for unrecognized or corrupt containers
pub fn decode_chunk(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    if bytes.starts_with(b"RIFF") {
        return decode_wav(bytes);
    }
    decode_mp3(bytes)
}

fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / 32768.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
    };

    let samples = downmix(&samples, spec.channels as usize);
    Ok((samples, spec.sample_rate))
}

fn decode_mp3(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                {
                    sample_rate = frame.sample_rate as u32;
                }
                let mono: Vec<f32> = frame
                    .data
                    .chunks(frame.channels.max(1))
                    .map(|chunk| {
                        chunk.iter().map(|&s| f32::from(s) / 32768.0).sum::<f32>()
                            / chunk.len() as f32
                    })
                    .collect();
                samples.extend(mono);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Audio("unrecognized audio container".to_string()));
    }
    Ok((samples, sample_rate))
}

fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Plays to the default output device
pub struct CpalSink;

impl AudioSink for CpalSink {
    fn play(&mut self, samples: &[f32], sample_rate: u32, cancel: &AtomicBool) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
        let channels = config.channels as usize;

        let source = Arc::new(Mutex::new((samples.to_vec(), 0usize)));
        let finished = Arc::new(AtomicBool::new(false));
        let source_cb = Arc::clone(&source);
        let finished_cb = Arc::clone(&finished);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut guard = source_cb.lock().unwrap();
                    let (samples, pos) = &mut *guard;
                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < samples.len() {
                            let s = samples[*pos];
                            *pos += 1;
                            s
                        } else {
                            finished_cb.store(true, Ordering::SeqCst);
                            0.0
                        };
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (samples.len() as u64 * 1000) / u64::from(sample_rate.max(1));
        let deadline = std::time::Instant::now()
            + std::time::Duration::from_millis(duration_ms + 500);

        while !finished.load(Ordering::SeqCst) && !cancel.load(Ordering::SeqCst) {
            if std::time::Instant::now() > deadline {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        drop(stream);
        tracing::debug!(samples = samples.len(), "chunk playback done");
        Ok(())
    }
}
