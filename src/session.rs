//! Client Session (spec.md §4.J): one TCP connection's run-loop —
//! command-list buffering, `idle`/`noidle`, and the reply queue
//! that keeps replies in arrival order even while a batch or an idle
//! wait is outstanding.
//!
//! Grounded on `original_source/mpd_client.rs`'s `handle_client`/
//! `handle_command_list`/`handle_idle` shape, restructured per
//! SPEC_FULL.md §4.J into two cooperative tasks (input loop + reply
//! loop) joined by an outbound channel, rather than writing directly
//! from the command loop — so a slow client can't stall dispatch, and
//! so `idle`'s race against incoming lines can't interleave a reply
//! out of order.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_concurrency::future::Race;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::change_bus::{ChangeBus, Subsystem};
use crate::coordinator::Coordinator;
use crate::dispatch;
use crate::error::AppError;
use crate::protocol::grammar;
use crate::protocol::response::{ack, ok_trailer, PROTOCOL_VERSION};

const IDLE_POLL: Duration = Duration::from_millis(125);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One buffered outbound write; `close` tears the connection down after
/// being flushed (spec.md §3 Reply's *close-connection* directive).
enum Outbound {
    Line(String),
    Close,
}

#[instrument(skip_all, fields(session = session_id))]
pub async fn run(stream: TcpStream, coordinator: Arc<Coordinator>, changes: Arc<ChangeBus>) {
    let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    let peer = stream.peer_addr().ok();
    info!(?peer, "client connected");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader).lines();

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let reply_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Line(line) => {
                    if writer.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = writer.shutdown().await;
    });

    if tx.send(Outbound::Line(format!("OK MPD {PROTOCOL_VERSION}\n"))).is_err() {
        return;
    }

    let (subscriber_id, changed_set) = changes.subscribe().await;
    input_loop(&mut reader, &tx, &coordinator, &changed_set).await;

    changes.unsubscribe(subscriber_id).await;
    drop(tx);
    let _ = reply_task.await;
    info!(?peer, "client disconnected");
}

/// One logical batch of command lines: either a single line, or
/// everything between `command_list[_ok]_begin` and `command_list_end`
/// (spec.md §4.H). Only one batch executes at a time per session — the
/// loop below is strictly sequential, so that invariant holds for free.
async fn input_loop(
    reader: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    tx: &mpsc::UnboundedSender<Outbound>,
    coordinator: &Arc<Coordinator>,
    changed_set: &crate::change_bus::ChangedSet,
) {
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "read error, closing session");
                return;
            }
        };

        match line.as_str() {
            "command_list_begin" => {
                if !run_command_list(reader, tx, coordinator, false).await {
                    return;
                }
            }
            "command_list_ok_begin" => {
                if !run_command_list(reader, tx, coordinator, true).await {
                    return;
                }
            }
            _ => {
                if !run_single(&line, reader, tx, coordinator, changed_set).await {
                    return;
                }
            }
        }
    }
}

/// Runs one top-level line. Returns `false` if the session should close
/// (EOF mid-idle, or the command carried the close directive).
async fn run_single(
    line: &str,
    reader: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    tx: &mpsc::UnboundedSender<Outbound>,
    coordinator: &Arc<Coordinator>,
    changed_set: &crate::change_bus::ChangedSet,
) -> bool {
    let (verb, args) = match grammar::tokenize(line) {
        Ok(t) => t,
        Err(e) => {
            let _ = tx.send(Outbound::Line(ack(&AppError::bad_argument(e), "")));
            return true;
        }
    };

    if verb == "idle" {
        return handle_idle(reader, tx, changed_set, &args).await;
    }
    if verb == "close" {
        let _ = tx.send(Outbound::Close);
        return false;
    }
    if verb == "kill" {
        let _ = tx.send(Outbound::Close);
        coordinator.shutdown().await;
        std::process::exit(0);
    }
    if verb == "noidle" {
        // not currently idling; a bare `noidle` is simply a no-op success.
        let _ = tx.send(Outbound::Line(ok_trailer().to_string()));
        return true;
    }

    match run_verb(&verb, &args, coordinator).await {
        Ok(body) => {
            let mut line = body;
            line.push_str(ok_trailer());
            let _ = tx.send(Outbound::Line(line));
        }
        Err(e) => {
            let _ = tx.send(Outbound::Line(ack(&e, &verb)));
        }
    }
    true
}

async fn run_verb(verb: &str, args: &[String], coordinator: &Arc<Coordinator>) -> Result<String, AppError> {
    let cmd = crate::protocol::parse(verb, args)?;
    dispatch::execute(cmd, coordinator).await
}

/// Buffers lines until `command_list_end`, then dispatches the whole
/// batch as one unit (spec.md §4.H, §3's Reply model): sub-replies carry
/// no trailer of their own — `list_OK` stands in for it per item in the
/// `_ok_begin` variant, a plain `command_list_begin` emits nothing per
/// item — and a single `OK` ends the batch only if every item succeeded.
/// The first error aborts the remaining batch instead of continuing to
/// dispatch commands past it. Returns `false` on EOF.
async fn run_command_list(
    reader: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    tx: &mpsc::UnboundedSender<Outbound>,
    coordinator: &Arc<Coordinator>,
    emit_list_ok: bool,
) -> bool {
    let mut batch: Vec<(String, Vec<String>)> = Vec::new();
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return false,
            Err(_) => return false,
        };
        if line == "command_list_end" {
            break;
        }
        match grammar::tokenize(&line) {
            Ok((verb, args)) => batch.push((verb, args)),
            Err(e) => {
                let _ = tx.send(Outbound::Line(ack(&AppError::bad_argument(e), "")));
                return true;
            }
        }
    }

    for (verb, args) in &batch {
        if verb == "idle" || verb == "noidle" {
            let _ = tx.send(Outbound::Line(ack(
                &AppError::bad_argument("idle is not allowed inside a command list"),
                verb,
            )));
            return true;
        }
        match run_verb(verb, args, coordinator).await {
            Ok(body) => {
                let mut line = body;
                if emit_list_ok {
                    line.push_str("list_OK\n");
                }
                let _ = tx.send(Outbound::Line(line));
            }
            Err(e) => {
                let _ = tx.send(Outbound::Line(ack(&e, verb)));
                return true;
            }
        }
    }
    let _ = tx.send(Outbound::Line(ok_trailer().to_string()));
    true
}

enum IdleRace {
    NextLine(std::io::Result<Option<String>>),
    Tick,
}

/// Polls the session's changed-subsystem set every `IDLE_POLL`, racing
/// each poll against the next input line so a `noidle` (or disconnect)
/// interrupts promptly (spec.md §4.J).
async fn handle_idle(
    reader: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    tx: &mpsc::UnboundedSender<Outbound>,
    changed_set: &crate::change_bus::ChangedSet,
    filter_args: &[String],
) -> bool {
    let filter: Option<Vec<Subsystem>> = if filter_args.is_empty() {
        None
    } else {
        Some(filter_args.iter().filter_map(|s| Subsystem::from_str(s).ok()).collect())
    };

    debug!("entering idle");
    loop {
        let next_line = async { IdleRace::NextLine(reader.next_line().await) };
        let tick = async {
            tokio::time::sleep(IDLE_POLL).await;
            IdleRace::Tick
        };

        match (next_line, tick).race().await {
            IdleRace::NextLine(Ok(Some(line))) => {
                if line == "noidle" {
                    let _ = tx.send(Outbound::Line(ok_trailer().to_string()));
                    return true;
                }
                warn!(%line, "client sent a command while idling instead of noidle");
                let _ = tx.send(Outbound::Line(ack(
                    &AppError::bad_argument("expected \"noidle\""),
                    "idle",
                )));
                return true;
            }
            IdleRace::NextLine(Ok(None)) => return false,
            IdleRace::NextLine(Err(e)) => {
                warn!(error = %e, "read error during idle");
                return false;
            }
            IdleRace::Tick => {
                let mut set = changed_set.lock().await;
                if set.is_empty() {
                    continue;
                }
                let changed: Vec<Subsystem> = match &filter {
                    Some(wanted) => set.iter().filter(|s| wanted.contains(s)).copied().collect(),
                    None => set.iter().copied().collect(),
                };
                if changed.is_empty() {
                    continue;
                }
                set.clear();
                drop(set);

                let mut body = String::new();
                for sub in changed {
                    body.push_str("changed: ");
                    body.push_str(&sub.to_string());
                    body.push('\n');
                }
                body.push_str(ok_trailer());
                let _ = tx.send(Outbound::Line(body));
                return true;
            }
        }
    }
}
