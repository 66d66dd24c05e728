mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use crate::error::Result;
use crate::models::{EntryKey, ReviewEntry};

/// Keyed persistence for review entries, one record per (user, sheet, item).
///
/// Every mutation is atomic per key. Stage advances go through
/// [`EntryStore::update_if_version`], which only writes when the stored
/// version still matches what the caller read.
pub trait EntryStore {
    /// Insert `entry` unless its key exists. Returns the stored entry and
    /// whether this call created it.
    fn insert_if_absent(&self, entry: &ReviewEntry) -> Result<(ReviewEntry, bool)>;

    fn get(&self, key: &EntryKey) -> Result<Option<ReviewEntry>>;

    fn list(&self, user_id: &str, sheet_group: &str) -> Result<Vec<ReviewEntry>>;

    /// Entries not yet in the terminal stage.
    fn list_pending(&self, user_id: &str, sheet_group: &str) -> Result<Vec<ReviewEntry>>;

    /// Set the confirmation flag and bump the version. `None` if missing.
    fn set_confirmed(&self, key: &EntryKey, confirmed: bool) -> Result<Option<ReviewEntry>>;

    /// Overwrite the mutable fields of `entry` if the stored version equals
    /// `expected_version`. The stored version becomes `expected_version + 1`.
    fn update_if_version(&self, entry: &ReviewEntry, expected_version: i64) -> Result<bool>;

    fn remove(&self, key: &EntryKey) -> Result<bool>;

    fn sheet_groups(&self, user_id: &str) -> Result<Vec<String>>;
}

macro_rules! forward_entry_store {
    ($($ty:ty),*) => {$(
        impl<S: EntryStore + ?Sized> EntryStore for $ty {
            fn insert_if_absent(&self, entry: &ReviewEntry) -> Result<(ReviewEntry, bool)> {
                (**self).insert_if_absent(entry)
            }

            fn get(&self, key: &EntryKey) -> Result<Option<ReviewEntry>> {
                (**self).get(key)
            }

            fn list(&self, user_id: &str, sheet_group: &str) -> Result<Vec<ReviewEntry>> {
                (**self).list(user_id, sheet_group)
            }

            fn list_pending(&self, user_id: &str, sheet_group: &str) -> Result<Vec<ReviewEntry>> {
                (**self).list_pending(user_id, sheet_group)
            }

            fn set_confirmed(&self, key: &EntryKey, confirmed: bool) -> Result<Option<ReviewEntry>> {
                (**self).set_confirmed(key, confirmed)
            }

            fn update_if_version(&self, entry: &ReviewEntry, expected_version: i64) -> Result<bool> {
                (**self).update_if_version(entry, expected_version)
            }

            fn remove(&self, key: &EntryKey) -> Result<bool> {
                (**self).remove(key)
            }

            fn sheet_groups(&self, user_id: &str) -> Result<Vec<String>> {
                (**self).sheet_groups(user_id)
            }
        }
    )*};
}

forward_entry_store!(&S, Arc<S>, Box<S>);
