//! Stream Sequence (spec.md §4.D): a pull-driven two-slot gapless
//! handoff wrapping the Decoder Stream.
//!
//! Grounded on `original_source/stream.go`, with one correction: the Go
//! source's `streamLock` is declared but never actually taken anywhere
//! (a known race between slot mutation and the pull path). Here the lock
//! is real and is held across both.

use tokio::sync::Mutex;

use crate::decoder::{DecoderStream, StereoSample};
use crate::error::AppResult;

/// Fires once a swapped-in stream starts producing audio.
pub trait AudioStartCallback: Send + Sync {
    fn on_audio_start(&self);
}

struct Slots {
    current: Option<DecoderStream>,
    next: Option<DecoderStream>,
    mute: bool,
}

pub struct StreamSequence<C: AudioStartCallback> {
    slots: Mutex<Slots>,
    callback: C,
}

impl<C: AudioStartCallback> StreamSequence<C> {
    pub fn new(callback: C) -> Self {
        Self {
            slots: Mutex::new(Slots {
                current: None,
                next: None,
                mute: false,
            }),
            callback,
        }
    }

    /// Installs `current`, clearing any previous one. Used by the Play
    /// procedure (spec.md §4.G step 3).
    pub async fn set_current(&self, stream: DecoderStream) {
        let mut slots = self.slots.lock().await;
        slots.current = Some(stream);
        slots.mute = false;
    }

    /// Installs the gapless follow-on; must be called before `current`
    /// is exhausted.
    pub async fn set_next(&self, stream: DecoderStream) {
        self.slots.lock().await.next = Some(stream);
    }

    pub async fn set_mute(&self, mute: bool) {
        self.slots.lock().await.mute = mute;
    }

    /// Closes both slots.
    pub async fn close(&self) {
        let mut slots = self.slots.lock().await;
        if let Some(mut s) = slots.current.take() {
            s.close().await;
        }
        if let Some(mut s) = slots.next.take() {
            s.close().await;
        }
    }

    /// If muted, zero-fill and return as if `n` samples were produced.
    /// Else pull from `current`; on exhaustion, atomically swap
    /// `next -> current` and retry exactly once.
    pub async fn stream(&self, n: usize) -> AppResult<(Vec<StereoSample>, bool)> {
        let mut slots = self.slots.lock().await;

        if slots.mute {
            return Ok((vec![(0.0, 0.0); n], true));
        }

        let Some(current) = slots.current.as_mut() else {
            return Ok((Vec::new(), false));
        };

        let result = current.stream(n).await?;
        if !result.samples.is_empty() || !result.done {
            return Ok((result.samples, true));
        }

        // current is exhausted: swap next -> current exactly once.
        if slots.next.is_some() {
            let mut old_current = slots.current.take();
            slots.current = slots.next.take();
            if let Some(mut old) = old_current.take() {
                old.close().await;
            }
            self.callback.on_audio_start();

            let Some(current) = slots.current.as_mut() else {
                return Ok((Vec::new(), false));
            };
            let retried = current.stream(n).await?;
            return Ok((retried.samples, true));
        }

        Ok((Vec::new(), false))
    }

    pub async fn position(&self) -> u64 {
        self.slots
            .lock()
            .await
            .current
            .as_ref()
            .map(DecoderStream::position)
            .unwrap_or(0)
    }

    pub async fn len(&self) -> u64 {
        self.slots
            .lock()
            .await
            .current
            .as_ref()
            .map(DecoderStream::len)
            .unwrap_or(0)
    }

    /// Delegates to `current`; `false` when empty (spec.md §4.D).
    pub async fn err(&self) -> bool {
        self.slots
            .lock()
            .await
            .current
            .as_ref()
            .map(DecoderStream::err)
            .unwrap_or(false)
    }
}
