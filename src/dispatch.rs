//! Command Dispatcher (spec.md §4.H): routes a typed `Command` to the
//! Library Registry, Queue/Coordinator, or a reflection handler, and
//! builds the reply body.
//!
//! Grounded on `original_source/commands_status.go` (status/currentsong
//! field layout) and the commented-out `commands_playlist.go` (queue
//! verbs, built for real here per SPEC_FULL.md §4.F). `idle`/`noidle`,
//! `close`, and `kill` are session-framing, not dispatch, and are
//! handled directly by `session.rs` (spec.md §4.J).

use crate::coordinator::{Coordinator, PlayerState};
use crate::error::{AppError, AppResult};
use crate::library::{sort_entries, EntryId};
use crate::protocol::response::{write_entry, write_status, ReplyWriter};
use crate::protocol::{Command, Range};

/// The verb table `commands` reflects back — kept as one literal list
/// rather than re-deriving from `Command`'s variants, since several
/// verbs (`idle`/`noidle`/`close`/`kill`) never reach this module at all
/// (spec.md §4.J intercepts them first).
const SUPPORTED_COMMANDS: &[&str] = &[
    "close", "kill", "password", "ping", "tagtypes", "commands", "notcommands", "urlhandlers",
    "decoders", "status", "stats", "currentsong", "idle", "noidle", "lsinfo", "list",
    "listplaylistinfo", "find", "listplaylists", "playlist", "playlistinfo", "playlistid", "add",
    "addid", "clear", "delete", "deleteid", "move", "moveid", "shuffle", "swap", "swapid", "play",
    "playid", "pause", "stop", "next", "previous", "seek", "seekcur", "seekid", "consume",
    "random", "repeat", "single", "crossfade", "outputs",
];

/// The MIME types/extensions the filesystem backend recognizes as
/// playable (spec.md §4.H `decoders`) — audio/video by MIME, `.nfo` as
/// metadata and `.m3u` as playlist are containers, not decoders.
const DECODER_SUFFIXES: &[&str] = &["mp3", "flac", "ogg", "wav", "m4a", "aac", "opus", "mp4", "mkv"];

pub async fn execute(cmd: Command, coordinator: &Coordinator) -> AppResult<String> {
    let mut w = ReplyWriter::new();
    match cmd {
        Command::Close | Command::Kill => unreachable!("handled by the session, not dispatch"),

        Command::Password(_) => {}
        Command::Ping => {}
        Command::TagTypes => {
            for tag in ["Artist", "Album", "AlbumArtist", "Title", "Track", "Disc", "Genre"] {
                w.field("tagtype", tag);
            }
        }

        Command::Commands => {
            for verb in SUPPORTED_COMMANDS {
                w.field("command", verb);
            }
        }
        Command::NotCommands => {}
        Command::UrlHandlers => {}
        Command::Decoders => {
            for suffix in DECODER_SUFFIXES {
                w.field("suffix", suffix);
            }
        }

        Command::Status => write_status(&mut w, &coordinator.snapshot().await),
        Command::Stats => {
            w.field("artists", 0);
            w.field("albums", 0);
            w.field("songs", 0);
            w.field("uptime", 0);
            w.field("db_playtime", 0);
            w.field("db_update", 0);
            w.field("playtime", 0);
        }
        Command::CurrentSong => {
            let snapshot = coordinator.snapshot().await;
            if let Some(uri) = &snapshot.current_uri {
                let entry = coordinator.registry().get(uri)?;
                write_entry(&mut w, &entry, Some(snapshot.queue_index), snapshot.current_id);
            }
        }
        Command::Idle(_) | Command::NoIdle => unreachable!("handled by the session, not dispatch"),

        Command::LsInfo(path) => {
            let mut entries = coordinator.registry().browse(path.as_deref().unwrap_or(""))?;
            sort_entries(&mut entries);
            for entry in entries.iter().filter(|e| !e.is_hidden()) {
                write_entry(&mut w, entry, None, None);
            }
        }
        Command::List(tag, filters) => list_tag(&mut w, coordinator, &tag, &filters)?,
        Command::ListPlaylistInfo(_) => {}
        Command::Find(filters) => find(&mut w, coordinator, &filters)?,
        Command::ListPlaylists => {}

        Command::Playlist => queue_listing(&mut w, coordinator, None, false).await?,
        Command::PlaylistInfo(range) => queue_listing(&mut w, coordinator, range, true).await?,
        Command::PlaylistId(id) => queue_item_by_id(&mut w, coordinator, id).await?,

        Command::Add(uri) => {
            coordinator.append(&uri).await?;
        }
        Command::AddId(uri, pos) => {
            let ids = coordinator.insert(&uri, pos).await?;
            if let Some(id) = ids.first() {
                w.field("Id", id.0);
            }
        }
        Command::Clear => coordinator.clear().await?,
        Command::Delete(range) => coordinator.delete(range.start, range.end).await?,
        Command::DeleteId(id) => coordinator.delete_id(id).await?,
        Command::Move(range, to) => coordinator.move_range(range.start, range.end, to).await?,
        Command::MoveId(id, to) => coordinator.move_id(id, to).await?,
        Command::Shuffle => coordinator.shuffle().await?,
        Command::Swap(i, j) => coordinator.swap(i, j).await?,
        Command::SwapId(a, b) => coordinator.swap_id(a, b).await?,

        Command::Play(pos) => coordinator.play(pos).await?,
        Command::PlayId(id) => match id {
            Some(id) => coordinator.play_id(id).await?,
            None => coordinator.play(None).await?,
        },
        Command::Pause(explicit) => {
            let paused = match explicit {
                Some(p) => p,
                None => !matches!(coordinator.snapshot().await.state, PlayerState::Pause),
            };
            coordinator.pause(paused).await?
        }
        Command::Stop => coordinator.stop().await?,
        Command::Next => coordinator.next().await?,
        Command::Previous => coordinator.previous().await?,
        Command::Seek(pos, offset) => {
            coordinator.play(Some(pos)).await?;
            coordinator.seek(offset).await?
        }
        Command::SeekCur(offset) => coordinator.seek(offset).await?,
        Command::SeekId(id, offset) => {
            coordinator.play_id(id).await?;
            coordinator.seek(offset).await?
        }

        Command::Consume(v) => coordinator.set_consume(v).await,
        Command::Random(v) => coordinator.set_random(v).await,
        Command::Repeat(v) => coordinator.set_repeat(v).await,
        Command::Single(v) => coordinator.set_single(v).await,
        Command::Crossfade(secs) => coordinator.set_crossfade(secs).await,

        Command::Outputs => {
            w.field("outputid", 0);
            w.field("outputname", "default");
            w.field("outputenabled", 1);
        }
    }
    Ok(w.finish())
}

/// `list <tag> [filters...]`: collects distinct values of one tag across
/// every library, honoring `Find`-style `KEY VALUE` filter pairs.
/// Non-goal: no persisted tag database (spec.md §1) — this walks the
/// registry fresh on every call rather than querying an index.
fn list_tag(
    w: &mut ReplyWriter,
    coordinator: &Coordinator,
    tag: &str,
    filters: &[String],
) -> AppResult<()> {
    let mut entries = Vec::new();
    collect_recursive(coordinator, "", &mut entries)?;

    let mut values: Vec<String> = entries
        .iter()
        .filter(|e| matches_filters(e, filters))
        .filter_map(|e| e.get(tag))
        .map(|v| v.to_string())
        .collect();
    values.sort();
    values.dedup();

    for value in values {
        w.field(tag, value);
    }
    Ok(())
}

fn find(w: &mut ReplyWriter, coordinator: &Coordinator, filters: &[String]) -> AppResult<()> {
    let mut entries = Vec::new();
    collect_recursive(coordinator, "", &mut entries)?;
    sort_entries(&mut entries);

    for entry in entries.iter().filter(|e| !e.is_hidden() && matches_filters(e, filters)) {
        write_entry(w, entry, None, None);
    }
    Ok(())
}

fn matches_filters(entry: &crate::library::Entry, filters: &[String]) -> bool {
    filters.chunks_exact(2).all(|pair| {
        entry
            .get(&pair[0])
            .is_some_and(|v| v.to_string().eq_ignore_ascii_case(&pair[1]))
    })
}

fn collect_recursive(
    coordinator: &Coordinator,
    path: &str,
    out: &mut Vec<crate::library::Entry>,
) -> AppResult<()> {
    for entry in coordinator.registry().browse(path)? {
        if entry.is_hidden() {
            continue;
        }
        if entry.is_container() {
            collect_recursive(coordinator, &entry.full_path(), out)?;
        } else {
            out.push(entry);
        }
    }
    Ok(())
}

/// `playlist`/`playlistinfo [range]`: the current queue, not a stored
/// playlist file (spec.md §4.H groups these as "queue-query").
async fn queue_listing(
    w: &mut ReplyWriter,
    coordinator: &Coordinator,
    range: Option<Range>,
    with_entry_fields: bool,
) -> AppResult<()> {
    let snapshot = coordinator.snapshot().await;
    let (start, end) = match range {
        Some(r) => (r.start.max(0) as usize, if r.end < 0 { snapshot.queue_len } else { r.end as usize }),
        None => (0, snapshot.queue_len),
    };

    for pos in start..end.min(snapshot.queue_len) {
        let Some(uri) = coordinator.queue_uri_at(pos).await else {
            continue;
        };
        if with_entry_fields {
            let entry = coordinator.registry().get(&uri)?;
            let id = coordinator.queue_id_at(pos).await;
            write_entry(w, &entry, Some(pos), id);
        } else {
            w.field("file", uri);
        }
    }
    Ok(())
}

async fn queue_item_by_id(
    w: &mut ReplyWriter,
    coordinator: &Coordinator,
    id: Option<EntryId>,
) -> AppResult<()> {
    let Some(id) = id else {
        return queue_listing(w, coordinator, None, true).await;
    };
    let Some((pos, uri)) = coordinator.queue_find_id(id).await else {
        return Err(AppError::not_found("No such song"));
    };
    let entry = coordinator.registry().get(&uri)?;
    write_entry(w, &entry, Some(pos), Some(id));
    Ok(())
}
