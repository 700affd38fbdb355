//! Playback Coordinator (spec.md §4.G): binds the Queue to the Stream
//! Sequence, runs the play/pause/stop state machine, the 500ms monitor
//! tick, and Save State persistence.
//!
//! Grounded on `original_source/moped.go` (state machine, Play/Stop
//! procedures) and `commands_playback.go` (the toggle commands, left as
//! stubs in the original). Two corrections from SPEC_FULL.md §9 apply:
//! `Stop` captures the active handle, clears it, transitions state, and
//! only then closes the handle (the Go source closes first, which races
//! a concurrent sink pull); and `cmdToggles` requires exactly one
//! argument (the Go source's check is inverted and accepts zero).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::audio_output::AudioOutput;
use crate::change_bus::{ChangeBus, Subsystem};
use crate::decoder::{samples_for_duration, DecoderStream, SAMPLE_RATE};
use crate::error::{AppError, AppResult};
use crate::library::{EntryId, Registry};
use crate::queue::Queue;
use crate::stream_sequence::{AudioStartCallback, StreamSequence};

/// Floored at twice the monitor tick (spec.md §4.G).
const ABOUT_TO_END_DEFAULT: Duration = Duration::from_secs(3);
const MONITOR_TICK: Duration = Duration::from_millis(500);
const MONITOR_FLOOR: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stop,
    Pause,
    Play,
}

#[derive(Debug, Clone)]
pub struct PlayMode {
    pub consume: bool,
    pub random: bool,
    pub repeat: bool,
    pub single: bool,
    pub crossfade: Duration,
}

impl Default for PlayMode {
    fn default() -> Self {
        Self {
            consume: false,
            random: false,
            repeat: false,
            single: false,
            crossfade: Duration::ZERO,
        }
    }
}

/// `{uris, current}`, persisted as YAML. Grounded on `moped.go`'s
/// `SaveState`/`LoadState`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SaveState {
    pub uris: Vec<String>,
    pub current: i64,
}

pub struct CoordinatorSnapshot {
    pub state: PlayerState,
    pub queue_len: usize,
    pub queue_index: usize,
    pub current_id: Option<EntryId>,
    pub current_uri: Option<String>,
    pub position: Duration,
    pub length: Option<Duration>,
    pub play_mode: PlayMode,
}

/// Bridges `StreamSequence`'s `AudioStartCallback` (invoked from inside
/// an async mutex guard) back to the coordinator without requiring a
/// self-referential `Arc`: the callback just posts to a channel the
/// coordinator's own background task drains.
struct StartSignal {
    tx: mpsc::UnboundedSender<()>,
}

impl AudioStartCallback for StartSignal {
    fn on_audio_start(&self) {
        let _ = self.tx.send(());
    }
}

struct Inner {
    queue: Queue,
    state: PlayerState,
    play_mode: PlayMode,
    output: Option<AudioOutput>,
    about_to_end_fired: bool,
}

pub struct Coordinator {
    registry: Arc<Registry>,
    changes: Arc<ChangeBus>,
    state_path: Utf8PathBuf,
    sequence: Arc<StreamSequence<StartSignal>>,
    inner: Mutex<Inner>,
    shutting_down: AtomicBool,
}

impl Coordinator {
    pub fn new(registry: Arc<Registry>, changes: Arc<ChangeBus>, state_path: Utf8PathBuf) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sequence = Arc::new(StreamSequence::new(StartSignal { tx }));

        let coordinator = Arc::new(Self {
            registry,
            changes,
            state_path,
            sequence,
            inner: Mutex::new(Inner {
                queue: Queue::new(),
                state: PlayerState::Stop,
                play_mode: PlayMode::default(),
                output: None,
                about_to_end_fired: false,
            }),
            shutting_down: AtomicBool::new(false),
        });

        let start_signal_target = coordinator.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                start_signal_target.on_audio_start().await;
            }
        });

        let monitor_target = coordinator.clone();
        tokio::spawn(async move { monitor_target.monitor_loop().await });

        coordinator
    }

    /// Loads Save State (if present): clears the queue, re-inserts the
    /// saved URIs, jumps to the recorded index, and remains stopped.
    pub async fn load_state(&self) -> AppResult<()> {
        if !self.state_path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(&self.state_path)?;
        let state: SaveState = serde_yaml::from_str(&data)
            .map_err(|e| AppError::Internal(format!("parsing save state: {e}")))?;

        let mut inner = self.inner.lock().await;
        inner.queue.clear();
        for uri in &state.uris {
            if let Err(e) = inner.queue.append(&self.registry, uri) {
                warn!(uri = %uri, error = %e, "dropping missing entry from save state");
            }
        }
        let index = (state.current.max(0) as usize).min(inner.queue.len());
        let _ = inner.queue.jump(index);
        Ok(())
    }

    async fn persist(&self, inner: &Inner) {
        let state = SaveState {
            uris: inner
                .queue
                .items()
                .iter()
                .map(|i| i.entry.full_path())
                .collect(),
            current: inner.queue.index() as i64,
        };
        if let Some(parent) = self.state_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_yaml::to_string(&state) {
            Ok(text) => {
                if let Err(e) = std::fs::write(&self.state_path, text) {
                    warn!(error = %e, "failed to write save state");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize save state"),
        }
    }

    async fn transition(&self, inner: &mut Inner, new_state: PlayerState) {
        if inner.state != new_state {
            inner.state = new_state;
            self.changes.notify(Subsystem::Player).await;
        }
    }

    // ---- Queue mutation surface (spec.md §4.F, serialized through here) ----

    pub async fn append(&self, uri: &str) -> AppResult<Vec<EntryId>> {
        let mut inner = self.inner.lock().await;
        let ids = inner.queue.append(&self.registry, uri)?;
        self.changes.notify(Subsystem::Playlist).await;
        self.persist(&inner).await;
        Ok(ids)
    }

    pub async fn insert(&self, uri: &str, pos: Option<i64>) -> AppResult<Vec<EntryId>> {
        let mut inner = self.inner.lock().await;
        let ids = inner.queue.insert(&self.registry, uri, pos)?;
        self.changes.notify(Subsystem::Playlist).await;
        self.persist(&inner).await;
        Ok(ids)
    }

    /// Empties the queue; does **not** stop active playback (spec.md
    /// §4.F) — callers that want silence must call `stop` too.
    pub async fn clear(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.clear();
        self.changes.notify(Subsystem::Playlist).await;
        self.persist(&inner).await;
        Ok(())
    }

    pub async fn delete(&self, start: i64, end: i64) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.remove(start, end)?;
        self.changes.notify(Subsystem::Playlist).await;
        self.persist(&inner).await;
        Ok(())
    }

    pub async fn delete_id(&self, id: EntryId) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.remove_id(id)?;
        self.changes.notify(Subsystem::Playlist).await;
        self.persist(&inner).await;
        Ok(())
    }

    pub async fn move_range(&self, start: i64, end: i64, to: i64) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.move_range(start, end, to)?;
        self.changes.notify(Subsystem::Playlist).await;
        self.persist(&inner).await;
        Ok(())
    }

    pub async fn move_id(&self, id: EntryId, to: i64) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.move_id(id, to)?;
        self.changes.notify(Subsystem::Playlist).await;
        self.persist(&inner).await;
        Ok(())
    }

    pub async fn swap(&self, i: usize, j: usize) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.swap(i, j)?;
        self.changes.notify(Subsystem::Playlist).await;
        self.persist(&inner).await;
        Ok(())
    }

    pub async fn swap_id(&self, a: EntryId, b: EntryId) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.swap_id(a, b)?;
        self.changes.notify(Subsystem::Playlist).await;
        self.persist(&inner).await;
        Ok(())
    }

    pub async fn shuffle(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.shuffle();
        self.changes.notify(Subsystem::Playlist).await;
        self.persist(&inner).await;
        Ok(())
    }

    // ---- Playback surface (spec.md §4.G) ----

    /// `pos = None` resumes/starts at the current cursor.
    pub async fn play(&self, pos: Option<usize>) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(p) = pos {
            inner.queue.jump(p)?;
        }
        self.start_at_cursor(&mut inner).await
    }

    pub async fn play_id(&self, id: EntryId) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.jump_id(id)?;
        self.start_at_cursor(&mut inner).await
    }

    /// Play procedure (spec.md §4.G): ensure the sink exists, stop the
    /// current decoder, spawn a fresh one for the cursor entry, install
    /// it, clear mute, transition to `play`.
    async fn start_at_cursor(&self, inner: &mut Inner) -> AppResult<()> {
        if inner.output.is_none() {
            inner.output = Some(AudioOutput::start(self.sequence.clone())?);
        }

        let Some(item) = inner.queue.current() else {
            self.transition(inner, PlayerState::Stop).await;
            return Ok(());
        };

        let Some(source) = item.entry.source.as_ref().map(|s| s.reopen()) else {
            return Err(AppError::DecoderFailure("entry has no content source".into()));
        };

        let total = samples_for_duration(item.entry.metadata.duration);
        let stream = DecoderStream::spawn(source, total, None).await?;

        self.sequence.set_current(stream).await;
        self.sequence.set_mute(false).await;
        inner.about_to_end_fired = false;
        self.transition(inner, PlayerState::Play).await;
        self.persist(inner).await;
        Ok(())
    }

    pub async fn pause(&self, paused: bool) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        match (inner.state, paused) {
            (PlayerState::Play, true) => {
                self.sequence.set_mute(true).await;
                self.transition(&mut inner, PlayerState::Pause).await;
            }
            (PlayerState::Pause, false) => {
                self.sequence.set_mute(false).await;
                self.transition(&mut inner, PlayerState::Play).await;
            }
            _ => {}
        }
        Ok(())
    }

    /// Correction (spec.md §9): capture the active handle, clear it,
    /// transition to `stop`, then close — not close-then-clear, which
    /// would let a concurrent sink pull observe a half-torn-down slot.
    pub async fn stop(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        self.sequence.set_mute(true).await;
        self.transition(&mut inner, PlayerState::Stop).await;
        self.sequence.close().await;
        Ok(())
    }

    /// Advances the cursor; skips entries that fail to decode by trying
    /// the following one, tail-recursively, until a success or the queue
    /// is exhausted (which stops playback) — spec.md §4.F.
    pub async fn next(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        loop {
            if !inner.queue.advance() {
                self.sequence.set_mute(true).await;
                self.transition(&mut inner, PlayerState::Stop).await;
                return Ok(());
            }
            match self.start_at_cursor(&mut inner).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(error = %e, "skipping entry that failed to decode"),
            }
        }
    }

    pub async fn previous(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.retreat();
        self.start_at_cursor(&mut inner).await
    }

    /// Respawns the decoder at an offset, since the default decoder is
    /// not seekable (spec.md §4.G Seek). Seeking while stopped errors
    /// *no stream* (spec.md §8) rather than starting playback.
    pub async fn seek(&self, offset: Duration) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == PlayerState::Stop {
            return Err(AppError::not_found("no stream"));
        }
        let Some(item) = inner.queue.current() else {
            return Err(AppError::not_found("no stream"));
        };
        let Some(source) = item.entry.source.as_ref().map(|s| s.reopen()) else {
            return Err(AppError::DecoderFailure("entry has no content source".into()));
        };

        let total = samples_for_duration(item.entry.metadata.duration);
        let clamped = item
            .entry
            .metadata
            .duration
            .map(|d| offset.min(d))
            .unwrap_or(offset);

        let stream = DecoderStream::spawn(source, total, Some(clamped.as_secs_f64())).await?;
        self.sequence.set_current(stream).await;
        self.sequence.set_mute(false).await;
        self.transition(&mut inner, PlayerState::Play).await;
        Ok(())
    }

    // ---- Play mode toggles (spec.md §4.H `toggles`) ----

    pub async fn set_consume(&self, v: bool) {
        self.inner.lock().await.play_mode.consume = v;
        self.changes.notify(Subsystem::Options).await;
    }

    pub async fn set_random(&self, v: bool) {
        self.inner.lock().await.play_mode.random = v;
        self.changes.notify(Subsystem::Options).await;
    }

    pub async fn set_repeat(&self, v: bool) {
        self.inner.lock().await.play_mode.repeat = v;
        self.changes.notify(Subsystem::Options).await;
    }

    pub async fn set_single(&self, v: bool) {
        self.inner.lock().await.play_mode.single = v;
        self.changes.notify(Subsystem::Options).await;
    }

    pub async fn set_crossfade(&self, seconds: u64) {
        self.inner.lock().await.play_mode.crossfade = Duration::from_secs(seconds);
        self.changes.notify(Subsystem::Options).await;
    }

    pub async fn snapshot(&self) -> CoordinatorSnapshot {
        let inner = self.inner.lock().await;
        let current = inner.queue.current();
        CoordinatorSnapshot {
            state: inner.state,
            queue_len: inner.queue.len(),
            queue_index: inner.queue.index(),
            current_id: current.map(|i| i.id),
            current_uri: current.map(|i| i.entry.full_path()),
            position: Duration::from_secs_f64(
                self.sequence.position().await as f64 / SAMPLE_RATE as f64,
            ),
            length: current.and_then(|i| i.entry.metadata.duration),
            play_mode: inner.play_mode.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Read-only queue accessors for `playlist`/`playlistinfo`/`playlistid`
    /// (spec.md §4.H queue-query verbs) — these never mutate, so they take
    /// the lock only long enough to copy out what's needed.
    pub async fn queue_uri_at(&self, pos: usize) -> Option<String> {
        self.inner.lock().await.queue.get(pos).map(|i| i.entry.full_path())
    }

    pub async fn queue_id_at(&self, pos: usize) -> Option<EntryId> {
        self.inner.lock().await.queue.get(pos).map(|i| i.id)
    }

    pub async fn queue_find_id(&self, id: EntryId) -> Option<(usize, String)> {
        let inner = self.inner.lock().await;
        inner
            .queue
            .items()
            .iter()
            .position(|i| i.id == id)
            .map(|pos| (pos, inner.queue.items()[pos].entry.full_path()))
    }

    /// Fires when the Stream Sequence swaps `next -> current`
    /// (spec.md §4.D/§4.G `onAudioStart`): advances the queue cursor to
    /// match and resets the about-to-end edge for the new track.
    async fn on_audio_start(&self) {
        let mut inner = self.inner.lock().await;
        inner.queue.advance();
        inner.about_to_end_fired = false;
        self.changes.notify(Subsystem::Player).await;
        self.persist(&inner).await;
    }

    /// Ticks every 500ms while playing; fires the about-to-end edge at
    /// most once per track and prepares the gapless follow-on.
    async fn monitor_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(MONITOR_TICK);
        loop {
            ticker.tick().await;
            if self.shutting_down.load(Ordering::Relaxed) {
                return;
            }

            let mut inner = self.inner.lock().await;
            if inner.state != PlayerState::Play {
                continue;
            }
            let Some(length) = inner.queue.current().and_then(|i| i.entry.metadata.duration)
            else {
                continue;
            };
            if inner.about_to_end_fired {
                continue;
            }

            let about_to_end = ABOUT_TO_END_DEFAULT.max(MONITOR_FLOOR);
            let position_samples = self.sequence.position().await;
            let position = Duration::from_secs_f64(position_samples as f64 / SAMPLE_RATE as f64);

            if position + about_to_end >= length {
                inner.about_to_end_fired = true;
                let prefetch = inner.queue.peek().and_then(|next_item| {
                    next_item
                        .entry
                        .source
                        .as_ref()
                        .map(|s| (s.reopen(), samples_for_duration(next_item.entry.metadata.duration)))
                });
                drop(inner);

                if let Some((source, total)) = prefetch {
                    match DecoderStream::spawn(source, total, None).await {
                        Ok(stream) => self.sequence.set_next(stream).await,
                        Err(e) => warn!(error = %e, "gapless prefetch failed"),
                    }
                }
                continue;
            }
        }
    }

    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        let inner = self.inner.lock().await;
        self.persist(&inner).await;
        info!("coordinator shut down, save state persisted");
    }
}
