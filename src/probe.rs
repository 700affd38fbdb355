//! `ffprobe`-based metadata extraction, used both to backfill fields the
//! tag reader leaves blank (`library::filesystem`) and by `moped probe`.
//!
//! Grounded on `original_source/audio.go`'s `GetMetadata`: probes the
//! first 65536 bytes of the source over stdin rather than passing a path,
//! so it also works against non-seekable sources in principle. Unlike the
//! Go source, durations are canonicalized to `Duration` immediately —
//! no nanosecond/millisecond mixing (spec.md §9).

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::Duration;

use camino::Utf8Path;

use crate::error::{AppError, AppResult};

const PROBE_SAMPLE_BYTES: usize = 65536;

#[derive(Debug, Default, serde::Serialize)]
pub struct ProbeResult {
    pub codec_name: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track: Option<i64>,
    pub disc: Option<i64>,
    pub duration: Option<Duration>,
}

pub fn probe_path(path: &Utf8Path) -> AppResult<ProbeResult> {
    let mut file = std::fs::File::open(path)?;
    let mut sample = vec![0u8; PROBE_SAMPLE_BYTES];
    let n = file.read(&mut sample)?;
    sample.truncate(n);
    probe_bytes(&sample)
}

pub fn probe_bytes(sample: &[u8]) -> AppResult<ProbeResult> {
    let mut child = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-show_format",
            "-show_entries",
            "stream=codec_name:format",
            "-select_streams",
            "a:0",
            "-print_format",
            "json",
            "-",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| AppError::DecoderFailure(format!("spawning ffprobe: {e}")))?;

    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(sample)
        .map_err(|e| AppError::DecoderFailure(format!("writing ffprobe stdin: {e}")))?;

    let output = child
        .wait_with_output()
        .map_err(|e| AppError::DecoderFailure(format!("waiting on ffprobe: {e}")))?;

    parse_ffprobe_json(&output.stdout)
}

fn parse_ffprobe_json(bytes: &[u8]) -> AppResult<ProbeResult> {
    let doc: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| AppError::DecoderFailure(format!("parsing ffprobe output: {e}")))?;

    let mut result = ProbeResult::default();

    if let Some(streams) = doc.get("streams").and_then(|s| s.as_array()) {
        if let Some(stream) = streams.first() {
            result.codec_name = stream
                .get("codec_name")
                .and_then(|v| v.as_str())
                .map(str::to_owned);
        }
    }

    if let Some(format) = doc.get("format") {
        if let Some(tags) = format.get("tags") {
            result.title = tag_field(tags, "title");
            result.artist = tag_field(tags, "artist");
            result.album = tag_field(tags, "album");
            result.track = tag_field(tags, "track").and_then(|s| s.parse().ok());
            result.disc = tag_field(tags, "disc").and_then(|s| s.parse().ok());
        }

        if let Some(duration) = format.get("duration").and_then(|v| v.as_str()) {
            if let Ok(secs) = duration.parse::<f64>() {
                result.duration = Some(Duration::from_secs_f64(secs));
            }
        }
    }

    Ok(result)
}

/// ffprobe's tag casing is inconsistent between containers; try the exact
/// name, then uppercase — the same case-insensitive pattern as
/// `Entry::get` (spec.md §9), applied here to ffprobe's own tag keys.
fn tag_field(tags: &serde_json::Value, field: &str) -> Option<String> {
    tags.get(field)
        .or_else(|| tags.get(field.to_uppercase()))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tags_and_duration_from_ffprobe_json() {
        let json = br#"{
            "streams": [{"codec_name": "mp3"}],
            "format": {
                "duration": "237.300",
                "tags": {"title": "7 Years", "ARTIST": "Lukas Graham"}
            }
        }"#;
        let result = parse_ffprobe_json(json).unwrap();
        assert_eq!(result.codec_name.as_deref(), Some("mp3"));
        assert_eq!(result.title.as_deref(), Some("7 Years"));
        assert_eq!(result.artist.as_deref(), Some("Lukas Graham"));
        assert_eq!(result.duration, Some(Duration::from_secs_f64(237.3)));
    }
}
