//! Audio Output (spec.md §4.E): the real-time sink. Wraps the Stream
//! Sequence in a `rodio::Source` and opens it on a speaker device.
//!
//! Grounded on `original_source/player/outputs.rs` for device selection
//! (`SpeakersBuilder`, preferring 44100/88200 sample rates) and on
//! `player.rs` for the sink-wiring pattern; the in-process
//! `rodio::Decoder` reading a file directly is replaced here by a custom
//! `Source` that pulls from the Stream Sequence, since the Stream
//! Sequence (not rodio) owns decode/gapless handoff.

use std::sync::Arc;
use std::time::Duration;

use rodio::nz;
use rodio::speakers::SpeakersBuilder;
use rodio::{OutputStream, Source};
use tokio::sync::mpsc;

use crate::decoder::{CHANNELS, SAMPLE_RATE};
use crate::error::{AppError, AppResult};
use crate::stream_sequence::{AudioStartCallback, StreamSequence};

/// One-tenth of a second of frames, per spec.md §4.E.
const CHUNK_FRAMES: usize = SAMPLE_RATE as usize / 10;

/// Feeds `rodio`'s pull-based `Iterator` from the async Stream Sequence.
/// A background task keeps a bounded channel topped up with chunks;
/// the `Iterator` impl (called from the real-time output thread) only
/// ever does a blocking channel recv, never an async operation directly.
struct SequenceSource {
    rx: mpsc::Receiver<f32>,
    _feeder: tokio::task::JoinHandle<()>,
}

impl SequenceSource {
    fn new<C: AudioStartCallback + 'static>(sequence: Arc<StreamSequence<C>>) -> Self {
        let (tx, rx) = mpsc::channel(CHUNK_FRAMES * CHANNELS as usize * 4);

        let feeder = tokio::spawn(async move {
            loop {
                let (samples, _has_audio) = match sequence.stream(CHUNK_FRAMES).await {
                    Ok(result) => result,
                    Err(_) => (vec![(0.0, 0.0); CHUNK_FRAMES], true),
                };

                let frames = if samples.is_empty() {
                    vec![(0.0, 0.0); CHUNK_FRAMES]
                } else {
                    samples
                };

                for (l, r) in frames {
                    if tx.send(l as f32).await.is_err() {
                        return;
                    }
                    if tx.send(r as f32).await.is_err() {
                        return;
                    }
                }
            }
        });

        Self {
            rx,
            _feeder: feeder,
        }
    }
}

impl Iterator for SequenceSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        Some(self.rx.blocking_recv().unwrap_or(0.0))
    }
}

impl Source for SequenceSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> rodio::ChannelCount {
        nz!(2)
    }

    fn sample_rate(&self) -> rodio::SampleRate {
        nz!(44100)
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Owns the open output device; dropping it tears the sink down.
pub struct AudioOutput {
    _stream: OutputStream,
}

impl AudioOutput {
    /// Opens the default device at 44.1kHz/stereo (falling back to
    /// whatever rate rodio can trivially resample, per
    /// `player/outputs.rs`'s `outputs()` preference list) and starts
    /// pulling from `sequence` immediately.
    pub fn start<C: AudioStartCallback + 'static>(
        sequence: Arc<StreamSequence<C>>,
    ) -> AppResult<Self> {
        let stream = SpeakersBuilder::new()
            .default_device()
            .map_err(|e| AppError::Internal(format!("no default audio device: {e}")))?
            .default_config()
            .map_err(|e| AppError::Internal(format!("no default audio config: {e}")))?
            .open_stream()
            .map_err(|e| AppError::Internal(format!("opening audio stream: {e}")))?;

        stream.mixer().add(SequenceSource::new(sequence));

        Ok(Self { _stream: stream })
    }
}
