//! Last-observed-value table owned by each backend.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Mapping from request key to the last successfully observed value.
///
/// Entries appear on the first successful read, are replaced on every later
/// successful read, and are never removed. Reads take the shared lock; the
/// compare-and-swap step holds the exclusive lock for both the comparison and
/// the replacement, so two concurrent checks on one key cannot lose an update.
///
/// # Examples
///
/// ```rust
/// use watchkeeper::surveillee::SnapshotTable;
///
/// let table: SnapshotTable<String> = SnapshotTable::new();
/// let differs = |old: &String, new: &String| old != new;
///
/// // first observation is a baseline
/// assert!(!table.compare_and_swap("/etc/app.conf", "aaa".to_string(), differs));
/// assert!(!table.compare_and_swap("/etc/app.conf", "aaa".to_string(), differs));
/// assert!(table.compare_and_swap("/etc/app.conf", "bbb".to_string(), differs));
/// ```
pub struct SnapshotTable<V> {
    entries: RwLock<HashMap<String, Arc<V>>>,
}

impl<V> SnapshotTable<V> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store `new` under `key` and report whether it differs from the
    /// previous value according to `changed(old, new)`.
    ///
    /// Returns `false` when there was no previous value.
    pub fn compare_and_swap<F>(&self, key: &str, new: V, changed: F) -> bool
    where
        F: FnOnce(&V, &V) -> bool,
    {
        let new = Arc::new(new);
        let mut entries = self.entries.write();
        match entries.insert(key.to_string(), Arc::clone(&new)) {
            Some(old) => changed(&old, &new),
            None => false,
        }
    }

    /// Last observed value for `key`.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.entries.read().get(key).cloned()
    }

    /// Check whether a baseline exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of keys with a baseline.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if no key has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for SnapshotTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
