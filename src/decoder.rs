//! Decoder Stream (spec.md §4.C): spawns `ffmpeg`, feeds compressed bytes
//! on stdin from a background task, reads raw PCM frames from stdout on
//! the sample-pull path.
//!
//! Grounded on `original_source/ffmpeg.go`, with two corrections noted in
//! SPEC_FULL.md §9: a short/EOF read is truncated to the bytes actually
//! read (not the requested length), and `pos` advances by the real
//! sample count returned, not the requested one.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::library::LazyContent;

pub const SAMPLE_RATE: u32 = 44_100;
pub const CHANNELS: u32 = 2;
/// 2 bytes/sample * 2 channels = 4 bytes per stereo frame.
const BYTES_PER_FRAME: usize = 4;

pub type StereoSample = (f64, f64);

/// Result of one `Stream` pull: the samples actually decoded, whether the
/// source is now exhausted, and whether that exhaustion was a malformed
/// residue (EOF mid-frame) rather than a clean frame-boundary EOF
/// (spec.md §4.C — these are distinct, not both just "done").
pub struct StreamResult {
    pub samples: Vec<StereoSample>,
    pub done: bool,
    pub err: bool,
}

/// A running `ffmpeg` subprocess feeding one Entry's bytes through and
/// emitting raw interleaved `u16le` stereo PCM.
pub struct DecoderStream {
    child: Child,
    pos: u64,
    total_len: u64,
    feeder: Option<tokio::task::JoinHandle<()>>,
    err: bool,
}

impl DecoderStream {
    /// `seek_offset` is `None` for a fresh stream, `Some(seconds)` when
    /// respawning at an offset (the subprocess itself is not seekable,
    /// per spec.md §4.C — repositioning means spawning a new one).
    pub async fn spawn(
        mut source: LazyContent,
        total_samples: u64,
        seek_offset: Option<f64>,
    ) -> AppResult<Self> {
        let mut args: Vec<String> = vec!["-v".into(), "24".into(), "-y".into()];
        if let Some(offset) = seek_offset {
            args.push("-ss".into());
            args.push(format!("{offset}"));
        }
        args.extend(
            [
                "-i", "pipe:0", "-codec:a", "pcm_u16le", "-f", "u16le", "-ac", "2", "-ar",
                "44100", "-strict", "-2", "pipe:1",
            ]
            .map(String::from),
        );

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::DecoderFailure(format!("spawning ffmpeg: {e}")))?;

        let stdin = child.stdin.take().expect("stdin was piped");

        // The Entry's byte source is a synchronous `Read`; hop to a
        // blocking task for each chunk read, then write it asynchronously,
        // handing the source back and forth rather than pinning a whole
        // blocking thread for the process lifetime.
        let feeder = tokio::spawn(async move {
            let mut stdin = stdin;
            let mut source = source;
            loop {
                let (returned_source, chunk) = tokio::task::spawn_blocking(move || {
                    use std::io::Read;
                    let mut buf = vec![0u8; 64 * 1024];
                    let result = source.read(&mut buf).map(|n| {
                        buf.truncate(n);
                        buf
                    });
                    (source, result)
                })
                .await
                .expect("feeder blocking task panicked");
                source = returned_source;

                match chunk {
                    Ok(buf) if !buf.is_empty() => {
                        if stdin.write_all(&buf).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
            let _ = stdin.shutdown().await;
        });

        Ok(Self {
            child,
            pos: (seek_offset.unwrap_or(0.0) * SAMPLE_RATE as f64) as u64,
            total_len: total_samples,
            feeder: Some(feeder),
            err: false,
        })
    }

    /// Reads `n_samples` stereo frames. A short read is a hard error
    /// unless it is EOF, in which case the partial, *actually read*
    /// frames are returned with `done = true`. EOF landing mid-frame is
    /// malformed residue, not a clean end-of-stream, and is flagged via
    /// `err` distinctly from `done` (spec.md §4.C) — it is latched on the
    /// stream so a later `err()` query still sees it.
    pub async fn stream(&mut self, n_samples: usize) -> AppResult<StreamResult> {
        let want_bytes = n_samples * BYTES_PER_FRAME;
        let mut buf = vec![0u8; want_bytes];
        let mut filled = 0;

        let stdout = self
            .child
            .stdout
            .as_mut()
            .expect("stdout was piped");

        loop {
            if filled == want_bytes {
                break;
            }
            match stdout.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(AppError::DecoderFailure(format!("reading ffmpeg stdout: {e}"))),
            }
        }

        let done = filled < want_bytes;
        let residue = filled % BYTES_PER_FRAME;
        let malformed = done && residue != 0;
        if malformed {
            warn!(residue, "decoder stream ended mid-frame, discarding malformed residue");
            self.err = true;
        }

        let usable = filled - residue;
        let samples = populate_samples(&buf[..usable]);
        self.pos += samples.len() as u64;

        Ok(StreamResult { samples, done, err: malformed })
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn len(&self) -> u64 {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    /// Whether this stream has ever hit malformed EOF residue.
    pub fn err(&self) -> bool {
        self.err
    }

    /// The subprocess is stream-only; reposition by respawning instead.
    pub fn seek(&self, _offset_samples: u64) -> AppResult<()> {
        Err(AppError::NotSeekable)
    }

    /// Kills the subprocess and tears down both pipes. Idempotent.
    pub async fn close(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Decodes little-endian u16 L/R pairs, normalized as `value/65536`
/// (grounded on `ffmpeg.go`'s `populateSamples`). Unlike the Go source,
/// `data` is always a whole number of frames by the time it reaches here
/// (the short-read truncation happens in `stream`), so this never needs
/// to special-case a partial trailing frame.
fn populate_samples(data: &[u8]) -> Vec<StereoSample> {
    data.chunks_exact(BYTES_PER_FRAME)
        .map(|frame| {
            let l = u16::from_le_bytes([frame[0], frame[1]]);
            let r = u16::from_le_bytes([frame[2], frame[3]]);
            (l as f64 / 65536.0, r as f64 / 65536.0)
        })
        .collect()
}

pub fn samples_for_duration(duration: Option<Duration>) -> u64 {
    duration
        .map(|d| (d.as_secs_f64() * SAMPLE_RATE as f64) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populate_samples_normalizes_le_u16_pairs() {
        // one stereo frame: L=0x8000 (32768), R=0x0001 (1)
        let data = [0x00, 0x80, 0x01, 0x00];
        let samples = populate_samples(&data);
        assert_eq!(samples.len(), 1);
        assert!((samples[0].0 - 0.5).abs() < 1e-9);
        assert!((samples[0].1 - (1.0 / 65536.0)).abs() < 1e-9);
    }

    #[test]
    fn populate_samples_ignores_trailing_partial_bytes() {
        // 4 valid bytes + 2 stray bytes (not a full frame)
        let data = [0x00, 0x80, 0x01, 0x00, 0xAA, 0xBB];
        let samples = populate_samples(&data[..data.len() - (data.len() % BYTES_PER_FRAME)]);
        assert_eq!(samples.len(), 1);
    }
}
