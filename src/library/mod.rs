//! Library Entry Model & Registry (spec.md §3, §4.A/4.B).

pub mod filesystem;

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::time::Duration;

use camino::Utf8PathBuf;
use jiff::Timestamp;

use crate::error::{AppError, AppResult};

/// A stable identifier assigned to an Entry when it enters the Queue.
/// `0` means "none"; `u32::MAX` means "the current entry".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u32);

impl EntryId {
    pub const NONE: EntryId = EntryId(0);
    pub const CURRENT: EntryId = EntryId(u32::MAX);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    File,
    Audio,
    Video,
    Metadata,
    Folder,
    Playlist,
}

impl EntryType {
    /// Containers are never playable; audio/video yield a byte source.
    pub fn is_container(self) -> bool {
        matches!(self, EntryType::Folder | EntryType::Playlist)
    }

    pub fn is_content(self) -> bool {
        matches!(self, EntryType::Audio | EntryType::Video)
    }

    fn sort_rank(self) -> u8 {
        match self {
            EntryType::Folder => 0,
            EntryType::Audio | EntryType::Video | EntryType::Metadata => 1,
            EntryType::File | EntryType::Playlist => 2,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryType::File => "file",
            EntryType::Audio => "audio",
            EntryType::Video => "video",
            EntryType::Metadata => "metadata",
            EntryType::Folder => "folder",
            EntryType::Playlist => "playlist",
        };
        f.write_str(s)
    }
}

/// A heterogeneous, dotted-key metadata value. Grounded on spec.md §9's
/// "tagged value type" design note and `original_source/library/entry.go`'s
/// `Get(field)` two-lookup convention.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Time(Timestamp),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{}", if *b { 1 } else { 0 }),
            Value::Time(t) => write!(f, "{t}"),
            Value::List(items) => {
                write!(f, "{}", items.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))
            }
            Value::Map(_) => write!(f, "{{...}}"),
        }
    }
}

/// Typed fields plus a free-form extras mapping, per spec.md §3.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i64>,
    pub disc: Option<i64>,
    pub track: Option<i64>,
    pub label: Option<String>,
    pub duration: Option<Duration>,
    pub extras: HashMap<String, Value>,
}

impl Metadata {
    /// Case-insensitive lookup: recognized fields map to typed fields;
    /// unknown fields fall through to `extras`, tried exact then
    /// lowercased (spec.md §9, grounded on `library/entry.go`'s `Get`).
    pub fn get(&self, field: &str) -> Option<Value> {
        match field.to_ascii_lowercase().as_str() {
            "title" => self.title.clone().map(Value::Str),
            "artist" => self.artist.clone().map(Value::Str),
            "album" => self.album.clone().map(Value::Str),
            "albumartist" => self.album_artist.clone().map(Value::Str),
            "genre" => self.genre.clone().map(Value::Str),
            "year" | "date" => self.year.map(Value::Int),
            "disc" => self.disc.map(Value::Int),
            "track" => self.track.map(Value::Int),
            "label" => self.label.clone().map(Value::Str),
            "duration" => self.duration.map(|d| Value::Float(d.as_secs_f64())),
            _ => self
                .extras
                .get(field)
                .or_else(|| self.extras.get(&field.to_ascii_lowercase()))
                .cloned(),
        }
    }
}

/// Opens a content handle on demand. Mirrors `library/lazy.go`'s
/// `LazyReader`: the opener closure runs only on first `read`/`seek`.
pub struct LazyContent {
    opener: std::sync::Arc<dyn Fn() -> io::Result<File> + Send + Sync>,
    opened: Option<File>,
}

impl LazyContent {
    pub fn new(opener: impl Fn() -> io::Result<File> + Send + Sync + 'static) -> Self {
        Self {
            opener: std::sync::Arc::new(opener),
            opened: None,
        }
    }

    fn ensure_open(&mut self) -> io::Result<&mut File> {
        if self.opened.is_none() {
            self.opened = Some((self.opener)()?);
        }
        Ok(self.opened.as_mut().unwrap())
    }

    /// A fresh, unopened handle sharing the same opener. Used to respawn
    /// a Decoder Stream for the same Entry (seek, retry-on-failure).
    pub fn reopen(&self) -> Self {
        Self {
            opener: self.opener.clone(),
            opened: None,
        }
    }
}

impl Read for LazyContent {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?.read(buf)
    }
}

impl Seek for LazyContent {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_open()?.seek(pos)
    }
}

/// One addressable item in a library (spec.md §3).
pub struct Entry {
    pub path: Utf8PathBuf,
    pub parent_path: String,
    pub kind: EntryType,
    pub metadata: Metadata,
    pub mime_override: Option<String>,
    pub source: Option<LazyContent>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("path", &self.path)
            .field("parent_path", &self.parent_path)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Entry {
    pub fn new(path: Utf8PathBuf, kind: EntryType) -> Self {
        Self {
            path,
            parent_path: String::new(),
            kind,
            metadata: Metadata::default(),
            mime_override: None,
            source: None,
        }
    }

    pub fn set_parent_path(&mut self, mount: impl Into<String>) {
        self.parent_path = mount.into();
    }

    /// `/<parent>/<relative>`, per spec.md §4.A.
    pub fn full_path(&self) -> String {
        format!("/{}/{}", self.parent_path.trim_matches('/'), self.path)
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(str::to_owned)
            .unwrap_or_default()
    }

    /// Basename beginning with `.` (grounded on `library/entry.go`'s `IsHidden`).
    pub fn is_hidden(&self) -> bool {
        self.name().starts_with('.')
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    pub fn is_content(&self) -> bool {
        self.kind.is_content()
    }

    pub fn mime_type(&self) -> String {
        if let Some(m) = &self.mime_override {
            return m.clone();
        }
        mime_guess::from_path(self.path.as_std_path())
            .first_or_octet_stream()
            .to_string()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        match field.to_ascii_lowercase().as_str() {
            "filename" | "name" => Some(Value::Str(self.name())),
            "path" => Some(Value::Str(self.full_path())),
            _ => self.metadata.get(field),
        }
    }

    /// folder="0:", audio/video/metadata="1:", other="2:"; stable by path
    /// within a rank (grounded on `library/entry.go`'s `sortkey`).
    pub fn sort_key(&self) -> String {
        format!("{}:{}", self.kind.sort_rank(), self.path)
    }
}

pub type EntryList = Vec<Entry>;

pub fn sort_entries(entries: &mut EntryList) {
    entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// A named backend: `ping`, `browse(path)`, `get(path)`.
pub trait LibraryBackend: Send + Sync {
    fn ping(&self) -> AppResult<()>;
    fn browse(&self, path: &str) -> AppResult<EntryList>;
    fn get(&self, path: &str) -> AppResult<Entry>;
}

/// Mounts named backends under `/<name>/...`.
#[derive(Default)]
pub struct Registry {
    mounts: HashMap<String, Box<dyn LibraryBackend>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_library(&mut self, name: impl Into<String>, backend: Box<dyn LibraryBackend>) {
        self.mounts.insert(name.into(), backend);
    }

    /// Splits the path on the first `/`; the first segment selects a
    /// library, the remainder is passed verbatim. Empty first segment
    /// lists all mounts.
    fn split_mount(path: &str) -> (String, String) {
        let trimmed = path.trim_start_matches('/');
        match trimmed.split_once('/') {
            Some((mount, rest)) => (mount.to_string(), rest.to_string()),
            None => (trimmed.to_string(), String::new()),
        }
    }

    fn mount_list(&self) -> EntryList {
        let mut names: Vec<&String> = self.mounts.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let mut entry = Entry::new(Utf8PathBuf::new(), EntryType::Folder);
                entry.set_parent_path(name.clone());
                entry
            })
            .collect()
    }

    pub fn browse(&self, path: &str) -> AppResult<EntryList> {
        let (mount, rest) = Self::split_mount(path);
        if mount.is_empty() {
            return Ok(self.mount_list());
        }

        let backend = self
            .mounts
            .get(&mount)
            .ok_or_else(|| AppError::not_found(format!("No such library {mount:?}")))?;

        let mut entries = backend.browse(&rest)?;
        for entry in &mut entries {
            entry.set_parent_path(mount.clone());
        }
        Ok(entries)
    }

    pub fn get(&self, path: &str) -> AppResult<Entry> {
        let (mount, rest) = Self::split_mount(path);
        let backend = self
            .mounts
            .get(&mount)
            .ok_or_else(|| AppError::not_found(format!("No such library {mount:?}")))?;

        let mut entry = backend.get(&rest)?;
        entry.set_parent_path(mount);
        Ok(entry)
    }

    /// Fans out to all libraries; the first reported error is returned,
    /// prefixed with the offending mount name (grounded on `moped.go`'s
    /// `Ping()`).
    pub fn ping(&self) -> AppResult<()> {
        let mut names: Vec<&String> = self.mounts.keys().collect();
        names.sort();
        for name in names {
            if let Err(e) = self.mounts[name].ping() {
                return Err(AppError::Internal(format!("library {name}: {e}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_mount_handles_empty_and_nested_paths() {
        assert_eq!(Registry::split_mount(""), (String::new(), String::new()));
        assert_eq!(
            Registry::split_mount("/local/a/b.mp3"),
            ("local".into(), "a/b.mp3".into())
        );
        assert_eq!(Registry::split_mount("local"), ("local".into(), String::new()));
    }

    #[test]
    fn sort_key_orders_folders_before_content_before_other() {
        let folder = Entry::new(Utf8PathBuf::from("z"), EntryType::Folder);
        let audio = Entry::new(Utf8PathBuf::from("a"), EntryType::Audio);
        let file = Entry::new(Utf8PathBuf::from("b"), EntryType::File);
        let mut keys = vec![file.sort_key(), audio.sort_key(), folder.sort_key()];
        keys.sort();
        assert_eq!(keys, vec![folder.sort_key(), audio.sort_key(), file.sort_key()]);
    }

    #[test]
    fn hidden_entry_detected_from_basename() {
        let entry = Entry::new(Utf8PathBuf::from("dir/.hidden.mp3"), EntryType::Audio);
        assert!(entry.is_hidden());
        let entry = Entry::new(Utf8PathBuf::from("dir/visible.mp3"), EntryType::Audio);
        assert!(!entry.is_hidden());
    }
}
