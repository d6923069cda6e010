//! Memory of which encounters have already been surfaced.
//!
//! Shared between the poll loop (reads and upserts) and the sweep loop
//! (evicts). Backed by a sharded concurrent map so neither side ever sees a
//! half-written entry.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

/// Entries whose despawn time is less than this far ahead of "now" are swept.
pub const SWEEP_TOLERANCE_SECS: i64 = 5;

#[derive(Debug, Default)]
pub struct DedupStore {
    entries: DashMap<String, DateTime<Utc>>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Idempotent upsert of `id` with its despawn time.
    pub fn remember(&self, id: impl Into<String>, despawn_time: DateTime<Utc>) {
        self.entries.insert(id.into(), despawn_time);
    }

    /// Evict every entry that despawns within the tolerance of `now`.
    /// Returns the number of entries removed.
    ///
    /// Candidates are snapshotted first and each removal re-checks its entry,
    /// so a concurrent `remember` that pushed an id's despawn time out is kept.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let tolerance = TimeDelta::seconds(SWEEP_TOLERANCE_SECS);
        let expired = |despawn: &DateTime<Utc>| *despawn - now < tolerance;

        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        candidates
            .iter()
            .filter(|id| self.entries.remove_if(*id, |_, despawn| expired(despawn)).is_some())
            .count()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn remembered_ids_are_known() {
        let store = DedupStore::new();
        assert!(!store.is_known("E1"));

        store.remember("E1", at(600));
        assert!(store.is_known("E1"));
        assert_eq!(store.size(), 1);

        store.remember("E1", at(900));
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn sweep_uses_five_second_tolerance() {
        let store = DedupStore::new();
        let now = at(0);

        store.remember("past", at(-30));
        store.remember("now", at(0));
        store.remember("almost", at(4));
        store.remember("boundary", at(5));
        store.remember("later", at(60));

        assert_eq!(store.sweep(now), 3);
        assert!(!store.is_known("past"));
        assert!(!store.is_known("now"));
        assert!(!store.is_known("almost"));
        assert!(store.is_known("boundary"));
        assert!(store.is_known("later"));
    }

    #[test]
    fn sweep_on_empty_store_is_noop() {
        let store = DedupStore::new();
        assert_eq!(store.sweep(at(0)), 0);
    }

    #[test]
    fn clear_forgets_everything() {
        let store = DedupStore::new();
        store.remember("a", at(100));
        store.remember("b", at(200));

        store.clear();

        assert_eq!(store.size(), 0);
        assert!(!store.is_known("a"));
    }

    #[test]
    fn concurrent_remember_and_sweep_keep_live_entries() {
        let store = Arc::new(DedupStore::new());
        let now = at(0);

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    store.remember(format!("live-{i}"), at(3_600));
                }
            })
        };
        let sweeper = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    store.sweep(now);
                }
            })
        };

        writer.join().unwrap();
        sweeper.join().unwrap();

        assert_eq!(store.size(), 2_000);
    }
}
