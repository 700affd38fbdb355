//! Change Bus (spec.md §4.K): broadcasts subsystem-change events to every
//! idling session. Grounded on `original_source/mpd_client.rs`'s
//! `handle_idle`, which raced a single shared changed-set against
//! concurrent sessions; here each session owns its own changed-set,
//! registered with the bus on connect and dropped on disconnect, so one
//! session's `idle` drain can never silently eat another's notification.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use strum_macros::{Display, EnumString};
use tokio::sync::Mutex;

/// The full canonical subsystem list (spec.md §4.J); several names here
/// have no mutating command in this build's dispatcher (`sticker`,
/// `subscription`, `partition`, `message`) but remain valid arguments to
/// `idle` for protocol compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Subsystem {
    Database,
    Update,
    StoredPlaylist,
    Playlist,
    Player,
    Mixer,
    Output,
    Options,
    Partition,
    Sticker,
    Subscription,
    Message,
}

pub type ChangedSet = Arc<Mutex<HashSet<Subsystem>>>;

pub struct ChangeBus {
    subscribers: Mutex<HashMap<u64, ChangedSet>>,
    next_id: AtomicU64,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new session's changed-set; returns its subscriber ID
    /// (for `unsubscribe`) and the set itself (for the session's `idle`
    /// poll/drain).
    pub async fn subscribe(&self) -> (u64, ChangedSet) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let set: ChangedSet = Arc::new(Mutex::new(HashSet::new()));
        self.subscribers.lock().await.insert(id, set.clone());
        (id, set)
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().await.remove(&id);
    }

    /// Marks `subsystem` changed in every subscriber's set. A state
    /// mutation orders before every `idle` that unblocks on the result
    /// (spec.md §5) because this runs to completion, under each set's own
    /// lock, before the command handler that triggered it returns.
    pub async fn notify(&self, subsystem: Subsystem) {
        let subscribers: Vec<ChangedSet> = self.subscribers.lock().await.values().cloned().collect();
        for set in subscribers {
            set.lock().await.insert(subsystem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_reaches_all_subscribers_independently() {
        let bus = ChangeBus::new();
        let (id_a, set_a) = bus.subscribe().await;
        let (_id_b, set_b) = bus.subscribe().await;

        bus.notify(Subsystem::Player).await;

        assert!(set_a.lock().await.contains(&Subsystem::Player));
        assert!(set_b.lock().await.contains(&Subsystem::Player));

        set_a.lock().await.clear();
        bus.unsubscribe(id_a).await;
        bus.notify(Subsystem::Mixer).await;

        assert!(set_a.lock().await.is_empty());
        assert!(set_b.lock().await.contains(&Subsystem::Mixer));
    }

    #[test]
    fn subsystem_names_match_protocol_spelling() {
        assert_eq!(Subsystem::StoredPlaylist.to_string(), "stored_playlist");
        assert_eq!(Subsystem::Player.to_string(), "player");
    }
}
