//! Queue (spec.md §3, §4.F): an ordered list of Entries with stable IDs,
//! a cursor, and insert/move/remove/shuffle operations.
//!
//! Grounded on `original_source/queue.go` for Current/Next/Previous/Peek,
//! and on the commented-out `commands_playlist.go` sketches for
//! Remove/Move/Swap/Shuffle, which the original never actually built.
//! Two corrections from SPEC_FULL.md §9 apply here: `jump` accepts
//! `index == len` (the Go source's `Jump` rejects it), and `insert`'s
//! splice is an explicit `pre ++ new ++ suffix` (the Go source's splice
//! copies into an uninitialized destination and is a no-op).

use rand::seq::SliceRandom;

use crate::error::{AppError, AppResult};
use crate::library::{Entry, EntryId, EntryList, Registry};

pub struct QueueItem {
    pub id: EntryId,
    pub entry: Entry,
}

pub struct Queue {
    items: Vec<QueueItem>,
    index: usize,
    next_id: u32,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: 0,
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.items.get(self.index)
    }

    /// Used by the gapless prefetch (spec.md §4.G monitor task).
    pub fn peek(&self) -> Option<&QueueItem> {
        self.items.get(self.index + 1)
    }

    pub fn get(&self, pos: usize) -> Option<&QueueItem> {
        self.items.get(pos)
    }

    pub fn get_id(&self, id: EntryId) -> Option<&QueueItem> {
        let id = self.resolve_current_id(id);
        self.items.iter().find(|i| i.id == id)
    }

    fn alloc_id(&mut self) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        id
    }

    fn resolve_current_id(&self, id: EntryId) -> EntryId {
        if id == EntryId::CURRENT {
            self.current().map(|i| i.id).unwrap_or(EntryId::NONE)
        } else {
            id
        }
    }

    /// Folders expand to their content-typed descendants (hidden entries
    /// are skipped), matching spec.md §4.F's `Append` contract.
    fn resolve_uri(&self, registry: &Registry, uri: &str) -> AppResult<EntryList> {
        let entry = registry.get(uri)?;
        if entry.is_container() {
            let mut out = Vec::new();
            Self::collect_content(registry, uri, &mut out)?;
            Ok(out)
        } else {
            Ok(vec![entry])
        }
    }

    fn collect_content(registry: &Registry, path: &str, out: &mut EntryList) -> AppResult<()> {
        for entry in registry.browse(path)? {
            if entry.is_hidden() {
                continue;
            }
            if entry.is_container() {
                Self::collect_content(registry, &entry.full_path(), out)?;
            } else if entry.is_content() {
                out.push(entry);
            }
        }
        Ok(())
    }

    /// `pos < 0` or `pos >= len` appends; else splices at `pos`
    /// preserving the suffix explicitly.
    pub fn insert(
        &mut self,
        registry: &Registry,
        uri: &str,
        pos: Option<i64>,
    ) -> AppResult<Vec<EntryId>> {
        let entries = self.resolve_uri(registry, uri)?;

        let insert_at = match pos {
            None => self.items.len(),
            Some(p) if p < 0 || p as usize >= self.items.len() => self.items.len(),
            Some(p) => p as usize,
        };

        let mut ids = Vec::with_capacity(entries.len());
        let mut new_items = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = self.alloc_id();
            ids.push(id);
            new_items.push(QueueItem { id, entry });
        }

        let suffix = self.items.split_off(insert_at);
        self.items.extend(new_items);
        self.items.extend(suffix);

        Ok(ids)
    }

    pub fn append(&mut self, registry: &Registry, uri: &str) -> AppResult<Vec<EntryId>> {
        self.insert(registry, uri, None)
    }

    fn normalize_range(&self, start: i64, end: i64) -> (usize, usize) {
        let len = self.items.len() as i64;
        let end = if end < 0 { len } else { end };
        let start = start.clamp(0, len) as usize;
        let end = (end.clamp(0, len) as usize).max(start);
        (start, end)
    }

    /// Half-open `[start, end)`; `end = -1` means "through end".
    pub fn remove(&mut self, start: i64, end: i64) -> AppResult<()> {
        let (start, end) = self.normalize_range(start, end);
        let removed = end - start;
        self.items.drain(start..end);

        if self.index >= end {
            self.index -= removed;
        } else if self.index >= start {
            self.index = start;
        }
        Ok(())
    }

    pub fn remove_id(&mut self, id: EntryId) -> AppResult<()> {
        let id = self.resolve_current_id(id);
        let pos = self
            .items
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| AppError::not_found("No such song"))?;
        self.remove(pos as i64, pos as i64 + 1)
    }

    /// Relocates `[start, end)` to `to`, interpreted post-removal.
    pub fn move_range(&mut self, start: i64, end: i64, to: i64) -> AppResult<()> {
        let (start, end) = self.normalize_range(start, end);
        if to < 0 || to as usize > self.items.len() {
            return Err(AppError::bad_argument("TO out of range"));
        }

        let current_id = self.current().map(|i| i.id);
        let moved: Vec<QueueItem> = self.items.drain(start..end).collect();
        let to = (to as usize).min(self.items.len());
        let suffix = self.items.split_off(to);
        self.items.extend(moved);
        self.items.extend(suffix);

        self.index = current_id
            .and_then(|id| self.items.iter().position(|i| i.id == id))
            .unwrap_or(self.items.len());
        Ok(())
    }

    pub fn move_id(&mut self, id: EntryId, to: i64) -> AppResult<()> {
        let id = self.resolve_current_id(id);
        let pos = self
            .items
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| AppError::not_found("No such song"))?;
        self.move_range(pos as i64, pos as i64 + 1, to)
    }

    pub fn swap(&mut self, i: usize, j: usize) -> AppResult<()> {
        if i >= self.items.len() || j >= self.items.len() {
            return Err(AppError::bad_argument("song index out of range"));
        }
        self.items.swap(i, j);
        if self.index == i {
            self.index = j;
        } else if self.index == j {
            self.index = i;
        }
        Ok(())
    }

    pub fn swap_id(&mut self, a: EntryId, b: EntryId) -> AppResult<()> {
        let pos_a = self
            .items
            .iter()
            .position(|i| i.id == a)
            .ok_or_else(|| AppError::not_found("No such song"))?;
        let pos_b = self
            .items
            .iter()
            .position(|i| i.id == b)
            .ok_or_else(|| AppError::not_found("No such song"))?;
        self.swap(pos_a, pos_b)
    }

    /// Uniform random permutation; the cursor stays on the same entry
    /// (tracked through the permutation by ID, not position).
    pub fn shuffle(&mut self) {
        let current_id = self.current().map(|i| i.id);
        self.items.shuffle(&mut rand::thread_rng());
        self.index = current_id
            .and_then(|id| self.items.iter().position(|i| i.id == id))
            .unwrap_or(self.items.len());
    }

    /// Empties and resets the cursor; does **not** stop active playback.
    pub fn clear(&mut self) {
        self.items.clear();
        self.index = 0;
    }

    /// `index == len` is valid: "stopped past end" (spec.md §3).
    pub fn jump(&mut self, index: usize) -> AppResult<()> {
        if index > self.items.len() {
            return Err(AppError::bad_argument("song index out of range"));
        }
        self.index = index;
        Ok(())
    }

    pub fn jump_id(&mut self, id: EntryId) -> AppResult<()> {
        let id = self.resolve_current_id(id);
        let pos = self
            .items
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| AppError::not_found("No such song"))?;
        self.jump(pos)
    }

    /// Advances the cursor by one; returns whether it now points at a
    /// playable entry (`false` once it reaches `len`).
    pub fn advance(&mut self) -> bool {
        if self.index < self.items.len() {
            self.index += 1;
        }
        self.index < self.items.len()
    }

    pub fn retreat(&mut self) -> bool {
        if self.index > 0 {
            self.index -= 1;
        }
        self.index < self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use crate::library::EntryType;

    fn item(id: u32) -> QueueItem {
        QueueItem {
            id: EntryId(id),
            entry: Entry::new(Utf8PathBuf::from(format!("{id}.mp3")), EntryType::Audio),
        }
    }

    #[test]
    fn jump_accepts_index_equal_to_len() {
        let mut q = Queue::new();
        q.items.push(item(1));
        assert!(q.jump(1).is_ok());
        assert_eq!(q.index(), 1);
        assert!(q.current().is_none());
    }

    #[test]
    fn insert_preserves_suffix_order() {
        let mut q = Queue::new();
        q.items.push(item(1));
        q.items.push(item(2));
        q.next_id = 3;
        // manually splice without registry resolution to test the splice logic
        let new_items = vec![item(3)];
        let suffix = q.items.split_off(1);
        q.items.extend(new_items);
        q.items.extend(suffix);
        let ids: Vec<u32> = q.items.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn remove_half_open_range_through_end() {
        let mut q = Queue::new();
        for i in 1..=5 {
            q.items.push(item(i));
        }
        q.remove(2, -1).unwrap();
        let ids: Vec<u32> = q.items.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn ids_are_never_reused_after_removal() {
        let mut q = Queue::new();
        q.items.push(item(1));
        q.items.push(item(2));
        q.next_id = 3;
        q.remove(0, 1).unwrap();
        let id = q.alloc_id();
        assert_eq!(id, EntryId(3));
    }
}
