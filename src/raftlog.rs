//! C1: Replicated Log & State Machine.
//!
//! The log is the single flat, indexable sequence the rest of the replica
//! reasons about; entries carry no pointers. Indices are `i64` throughout
//! so that "no entries yet" is representable as `-1` rather than as a
//! special-cased `Option<usize>` at every call site.

use std::collections::HashMap;

use crate::message::LogEntry;

#[derive(Debug, Default)]
pub struct Log {
    entries: Vec<LogEntry>,
    kv: HashMap<String, String>,
    commit_index: i64,
    last_applied: i64,
}

impl Log {
    pub fn new() -> Self {
        Log {
            entries: Vec::new(),
            kv: HashMap::new(),
            commit_index: -1,
            last_applied: -1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_index(&self) -> i64 {
        self.entries.len() as i64 - 1
    }

    pub fn last_term(&self) -> u64 {
        self.term_at(self.last_index())
    }

    pub fn commit_index(&self) -> i64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> i64 {
        self.last_applied
    }

    pub fn entry_at(&self, index: i64) -> Option<&LogEntry> {
        if index < 0 {
            return None;
        }
        self.entries.get(index as usize)
    }

    /// Leader-only: appends at the end and returns the new entry's index.
    pub fn append(&mut self, entry: LogEntry) -> i64 {
        self.entries.push(entry);
        self.last_index()
    }

    pub fn append_all(&mut self, entries: impl IntoIterator<Item = LogEntry>) {
        for e in entries {
            self.entries.push(e);
        }
    }

    /// Followers only: erases entries at `index` and beyond. A leader must
    /// never call this on its own log (invariant 4, leader append-only).
    pub fn truncate_from(&mut self, index: i64) {
        if index < 0 {
            self.entries.clear();
        } else {
            self.entries.truncate(index as usize);
        }
    }

    /// True iff `prevIndex == -1` (empty-prefix agreement) or
    /// `prevIndex < len && log[prevIndex].term == prevTerm`.
    pub fn matches_at(&self, prev_index: i64, prev_term: u64) -> bool {
        if prev_index == -1 {
            return true;
        }
        match self.entry_at(prev_index) {
            Some(e) => e.term == prev_term,
            None => false,
        }
    }

    /// Applies `(lastApplied, commitIdx]` to the state machine in order and
    /// returns the entries that were applied, so the caller can reply to
    /// their originating clients.
    pub fn apply_up_to(&mut self, commit_idx: i64) -> Vec<LogEntry> {
        let mut applied = Vec::new();
        let mut i = self.last_applied + 1;
        while i <= commit_idx {
            let entry = self.entries[i as usize].clone();
            self.kv.insert(entry.key.clone(), entry.value.clone());
            applied.push(entry);
            i += 1;
        }
        self.last_applied = commit_idx.max(self.last_applied);
        applied
    }

    pub fn set_commit_index(&mut self, commit_index: i64) {
        debug_assert!(commit_index >= self.commit_index);
        self.commit_index = commit_index;
    }

    /// The key is always considered defined; absent keys return `""`.
    pub fn get(&self, key: &str) -> String {
        self.kv.get(key).cloned().unwrap_or_default()
    }

    /// True iff `key` appears in any entry strictly after `commit_index`
    /// (i.e. an uncommitted write could still change it).
    pub fn has_pending_write(&self, key: &str, commit_index: i64) -> bool {
        self.last_pending_write_index(key, commit_index).is_some()
    }

    /// Index of the last not-yet-committed entry touching `key`, if any.
    /// A `get` buffered against this index is safe to answer as soon as
    /// `commit_index` reaches it.
    pub fn last_pending_write_index(&self, key: &str, commit_index: i64) -> Option<i64> {
        let from = (commit_index + 1).max(0) as usize;
        self.entries[from.min(self.entries.len())..]
            .iter()
            .rposition(|e| e.key == key)
            .map(|i| (i + from) as i64)
    }

    pub fn term_at(&self, index: i64) -> u64 {
        self.entry_at(index).map(|e| e.term).unwrap_or(0)
    }

    pub fn first_index_of_term(&self, term: u64) -> i64 {
        if term == 0 {
            return 0;
        }
        self.entries
            .iter()
            .position(|e| e.term == term)
            .map(|i| i as i64)
            .unwrap_or(-1)
    }

    pub fn last_index_of_term(&self, term: u64) -> i64 {
        self.entries
            .iter()
            .rposition(|e| e.term == term)
            .map(|i| i as i64)
            .unwrap_or(-1)
    }

    /// Slice of entries from `from` (inclusive) to the end of the log.
    pub fn suffix_from(&self, from: i64) -> Vec<LogEntry> {
        let start = from.max(0) as usize;
        if start >= self.entries.len() {
            Vec::new()
        } else {
            self.entries[start..].to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: u64, key: &str, value: &str) -> LogEntry {
        LogEntry {
            term,
            key: key.into(),
            value: value.into(),
            client: "C001".into(),
            mid: "m1".into(),
        }
    }

    #[test]
    fn empty_log_matches_empty_prefix_only() {
        let log = Log::new();
        assert!(log.matches_at(-1, 0));
        assert!(!log.matches_at(0, 1));
    }

    #[test]
    fn get_on_absent_key_is_empty_string() {
        let log = Log::new();
        assert_eq!(log.get("missing"), "");
    }

    #[test]
    fn append_apply_updates_state_machine_in_order() {
        let mut log = Log::new();
        log.append(entry(1, "k", "v1"));
        log.append(entry(1, "k", "v2"));
        let applied = log.apply_up_to(1);
        assert_eq!(applied.len(), 2);
        assert_eq!(log.get("k"), "v2");
        assert_eq!(log.last_applied(), 1);
    }

    #[test]
    fn truncate_from_erases_conflicting_suffix() {
        let mut log = Log::new();
        log.append(entry(1, "a", "1"));
        log.append(entry(1, "b", "2"));
        log.append(entry(2, "c", "3"));
        log.truncate_from(1);
        assert_eq!(log.len(), 1);
        assert_eq!(log.last_term(), 1);
    }

    #[test]
    fn fast_conflict_hints_locate_term_boundaries() {
        let mut log = Log::new();
        log.append(entry(1, "a", "1"));
        log.append(entry(1, "b", "2"));
        log.append(entry(2, "c", "3"));
        log.append(entry(2, "d", "4"));
        assert_eq!(log.first_index_of_term(2), 2);
        assert_eq!(log.last_index_of_term(1), 1);
        assert_eq!(log.first_index_of_term(5), -1);
    }

    #[test]
    fn has_pending_write_sees_uncommitted_entries_only() {
        let mut log = Log::new();
        log.append(entry(1, "k", "v1"));
        log.append(entry(1, "k", "v2"));
        assert!(log.has_pending_write("k", -1));
        log.set_commit_index(1);
        log.apply_up_to(1);
        assert!(!log.has_pending_write("k", 1));
    }
}
