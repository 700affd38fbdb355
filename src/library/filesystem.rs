//! The `local` library backend: walks a directory tree with `walkdir`,
//! dispatches MIME type to Entry kind, and loads metadata through a loader
//! chain. Grounded on `original_source/backends/filesystem.go`.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use tracing::warn;

use crate::config::LocalLibraryConfig;
use crate::error::{AppError, AppResult};
use crate::probe;

use super::{Entry, EntryList, EntryType, LazyContent, LibraryBackend, Value};

pub struct FilesystemBackend {
    root: Utf8PathBuf,
    patterns: Vec<Regex>,
}

impl FilesystemBackend {
    pub fn new(config: LocalLibraryConfig, patterns: Vec<Regex>) -> AppResult<Self> {
        if config.path.as_str().is_empty() {
            return Err(AppError::bad_argument("local library requires a path"));
        }
        Ok(Self {
            root: config.path,
            patterns,
        })
    }

    fn abs_path(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    fn entry_type_for(path: &Utf8Path) -> EntryType {
        let mime = mime_guess::from_path(path.as_std_path()).first();
        match mime {
            Some(m) if m.type_() == mime_guess::mime::AUDIO => EntryType::Audio,
            Some(m) if m.type_() == mime_guess::mime::VIDEO => EntryType::Video,
            _ if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("nfo")) => {
                EntryType::Metadata
            }
            _ if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("m3u")) => {
                EntryType::Playlist
            }
            _ => EntryType::File,
        }
    }

    fn entry_from_path(&self, relative: &Utf8Path) -> AppResult<Entry> {
        let abs = self.abs_path(relative.as_str());
        let meta = fs::metadata(&abs)?;

        if meta.is_dir() {
            return Ok(Entry::new(relative.to_path_buf(), EntryType::Folder));
        }

        let kind = Self::entry_type_for(relative);
        let mut entry = Entry::new(relative.to_path_buf(), kind);

        let opener_path = abs.clone();
        entry.source = Some(LazyContent::new(move || fs::File::open(&opener_path)));

        if kind == EntryType::Audio || kind == EntryType::Video {
            self.load_metadata(relative, &abs, &mut entry);
        }

        Ok(entry)
    }

    /// Merge filename-regex captures, tag-reader fields, and an ffprobe
    /// duration backfill. Mirrors `backends/filesystem.go`'s
    /// `loadMetadata`: everything not recognized as a typed field lands
    /// in `extras`.
    fn load_metadata(&self, relative: &Utf8Path, abs: &Utf8Path, entry: &mut Entry) {
        self.apply_filename_patterns(relative, entry);

        match lofty::probe::Probe::open(abs).and_then(|p| p.read()) {
            Ok(tagged) => {
                if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
                    apply_lofty_tag(tag, entry);
                }
                entry.metadata.duration =
                    Some(tagged.properties().duration());
            }
            Err(e) => {
                warn!(path = %abs, error = %e, "lofty failed, trying moosicbox_audiotags");
                if let Ok(tag) = moosicbox_audiotags::Tag::new().read_from_path(abs.as_str()) {
                    apply_audiotags_tag(&tag, entry);
                }
            }
        }

        if entry.metadata.duration.is_none() {
            match probe::probe_path(abs) {
                Ok(probed) => {
                    if entry.metadata.duration.is_none() {
                        entry.metadata.duration = probed.duration;
                    }
                }
                Err(e) => warn!(path = %abs, error = %e, "ffprobe duration backfill failed"),
            }
        }
    }

    fn apply_filename_patterns(&self, relative: &Utf8Path, entry: &mut Entry) {
        let name = relative.as_str();
        for pattern in &self.patterns {
            if let Some(caps) = pattern.captures(name) {
                for group_name in pattern.capture_names().flatten() {
                    if let Some(m) = caps.name(group_name) {
                        let key = group_name.replace("__", ".");
                        entry
                            .metadata
                            .extras
                            .insert(key, Value::Str(m.as_str().to_string()));
                    }
                }
            }
        }
    }
}

fn apply_lofty_tag(tag: &lofty::tag::Tag, entry: &mut Entry) {
    use lofty::tag::Accessor;
    entry.metadata.title = tag.title().map(|s| s.to_string());
    entry.metadata.artist = tag.artist().map(|s| s.to_string());
    entry.metadata.album = tag.album().map(|s| s.to_string());
    entry.metadata.album_artist = tag
        .get_string(&lofty::tag::ItemKey::AlbumArtist)
        .map(str::to_string);
    entry.metadata.genre = tag.genre().map(|s| s.to_string());
    entry.metadata.year = tag.year().map(i64::from);
    entry.metadata.disc = tag.disk().map(i64::from);
    entry.metadata.track = tag.track().map(i64::from);
}

fn apply_audiotags_tag(tag: &Box<dyn moosicbox_audiotags::AudioTag>, entry: &mut Entry) {
    entry.metadata.title = tag.title().map(str::to_string);
    entry.metadata.artist = tag.artist().map(str::to_string);
    entry.metadata.album = tag.album_title().map(str::to_string);
    entry.metadata.genre = tag.genre().map(str::to_string);
    entry.metadata.year = tag.year().map(i64::from);
    entry.metadata.disc = tag.disc_number().map(i64::from);
    entry.metadata.track = tag.track_number().map(i64::from);
}

impl LibraryBackend for FilesystemBackend {
    fn ping(&self) -> AppResult<()> {
        fs::read_dir(&self.root)?;
        Ok(())
    }

    fn browse(&self, path: &str) -> AppResult<EntryList> {
        let abs = self.abs_path(path);
        let meta = fs::metadata(&abs)?;

        if meta.is_file() {
            return Ok(vec![self.entry_from_path(Utf8Path::new(path))?]);
        }

        let mut entries = Vec::new();
        for dirent in fs::read_dir(&abs)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let name = name.to_string_lossy();
            let relative = if path.is_empty() {
                Utf8PathBuf::from(name.as_ref())
            } else {
                Utf8PathBuf::from(path.trim_end_matches('/')).join(name.as_ref())
            };
            entries.push(self.entry_from_path(&relative)?);
        }

        Ok(entries)
    }

    fn get(&self, path: &str) -> AppResult<Entry> {
        self.entry_from_path(Utf8Path::new(path))
    }
}
