use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::models::{EntryKey, ReviewEntry, Stage};
use crate::store::EntryStore;

// In-process store. One mutex guards the map; each call holds it for a single
// read or compare-and-swap, which gives the same per-key atomicity as SQLite.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<EntryKey, ReviewEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<EntryKey, ReviewEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scoped<F>(&self, user_id: &str, sheet_group: &str, keep: F) -> Vec<ReviewEntry>
    where
        F: Fn(&ReviewEntry) -> bool,
    {
        let mut entries: Vec<ReviewEntry> = self
            .lock()
            .values()
            .filter(|e| e.key.user_id == user_id && e.key.sheet_group == sheet_group)
            .filter(|e| keep(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.stage_entered_at
                .cmp(&b.stage_entered_at)
                .then_with(|| a.key.item_id.cmp(&b.key.item_id))
        });
        entries
    }
}

impl EntryStore for MemoryStore {
    fn insert_if_absent(&self, entry: &ReviewEntry) -> Result<(ReviewEntry, bool)> {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&entry.key) {
            return Ok((existing.clone(), false));
        }
        entries.insert(entry.key.clone(), entry.clone());
        Ok((entry.clone(), true))
    }

    fn get(&self, key: &EntryKey) -> Result<Option<ReviewEntry>> {
        Ok(self.lock().get(key).cloned())
    }

    fn list(&self, user_id: &str, sheet_group: &str) -> Result<Vec<ReviewEntry>> {
        Ok(self.scoped(user_id, sheet_group, |_| true))
    }

    fn list_pending(&self, user_id: &str, sheet_group: &str) -> Result<Vec<ReviewEntry>> {
        Ok(self.scoped(user_id, sheet_group, |e| e.stage != Stage::Completed))
    }

    fn set_confirmed(&self, key: &EntryKey, confirmed: bool) -> Result<Option<ReviewEntry>> {
        let mut entries = self.lock();
        Ok(entries.get_mut(key).map(|e| {
            e.confirmed = confirmed;
            e.version += 1;
            e.clone()
        }))
    }

    fn update_if_version(&self, entry: &ReviewEntry, expected_version: i64) -> Result<bool> {
        let mut entries = self.lock();
        match entries.get_mut(&entry.key) {
            Some(stored) if stored.version == expected_version => {
                stored.stage = entry.stage;
                stored.stage_entered_at = entry.stage_entered_at;
                stored.confirmed = entry.confirmed;
                stored.review_count = entry.review_count;
                stored.version = expected_version + 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove(&self, key: &EntryKey) -> Result<bool> {
        Ok(self.lock().remove(key).is_some())
    }

    fn sheet_groups(&self, user_id: &str) -> Result<Vec<String>> {
        let mut groups: Vec<String> = self
            .lock()
            .keys()
            .filter(|k| k.user_id == user_id)
            .map(|k| k.sheet_group.clone())
            .collect();
        groups.dedup();
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(user: &str, sheet: &str, item: &str) -> ReviewEntry {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        ReviewEntry::new(EntryKey::new(user, sheet, item).unwrap(), now)
    }

    #[test]
    fn insert_if_absent_keeps_first() {
        let store = MemoryStore::new();
        let first = entry("ana", "s", "1");
        let (_, created) = store.insert_if_absent(&first).unwrap();
        assert!(created);

        let mut second = first.clone();
        second.confirmed = true;
        let (stored, created) = store.insert_if_absent(&second).unwrap();
        assert!(!created);
        assert!(!stored.confirmed);
    }

    #[test]
    fn update_if_version_rejects_stale_writes() {
        let store = MemoryStore::new();
        let e = entry("ana", "s", "1");
        store.insert_if_absent(&e).unwrap();
        store.set_confirmed(&e.key, true).unwrap();

        let mut stale = e.clone();
        stale.stage = Stage::Tomorrow;
        assert!(!store.update_if_version(&stale, 0).unwrap());
        assert!(store.update_if_version(&stale, 1).unwrap());

        let stored = store.get(&e.key).unwrap().unwrap();
        assert_eq!(stored.stage, Stage::Tomorrow);
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn sheet_groups_are_per_user_and_distinct() {
        let store = MemoryStore::new();
        for (u, s, i) in [("ana", "b", "1"), ("ana", "a", "2"), ("ana", "a", "3"), ("bo", "c", "1")] {
            store.insert_if_absent(&entry(u, s, i)).unwrap();
        }
        assert_eq!(store.sheet_groups("ana").unwrap(), vec!["a", "b"]);
        assert_eq!(store.sheet_groups("bo").unwrap(), vec!["c"]);
    }

    #[test]
    fn list_pending_skips_completed() {
        let store = MemoryStore::new();
        let mut done = entry("ana", "s", "1");
        done.stage = Stage::Completed;
        store.insert_if_absent(&done).unwrap();
        store.insert_if_absent(&entry("ana", "s", "2")).unwrap();

        let pending = store.list_pending("ana", "s").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].item_id(), "2");
        assert_eq!(store.list("ana", "s").unwrap().len(), 2);
    }
}
