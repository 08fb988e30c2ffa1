use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

/// Maps request ids to single-resolution result slots.
///
/// All access goes through one mutex, so a `resolve` that races an `insert`
/// either sees the entry or finds nothing; it never observes a half-written
/// slot. Resolving removes the entry, which makes second resolutions no-ops.
pub struct CorrelationTable<T> {
    pending: Mutex<HashMap<String, oneshot::Sender<T>>>,
}

impl<T> Default for CorrelationTable<T> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> CorrelationTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` and returns the receiving half of its slot.
    ///
    /// Re-using a live id replaces the older slot; its receiver then observes
    /// a closed channel.
    pub fn insert(&self, id: impl Into<String>) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id.into(), tx);
        rx
    }

    /// Removes `id` and hands it `value`. Returns `false` if no slot was
    /// waiting under that id.
    pub fn resolve(&self, id: &str, value: T) -> bool {
        let Some(tx) = self.lock().remove(id) else {
            return false;
        };
        // The waiter may have given up already; the entry is gone either way.
        tx.send(value).is_ok()
    }

    /// Removes `id` without resolving it. The waiter sees a closed channel.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties the table, handing every slot to `f` to produce a final value.
    pub fn drain_with(&self, mut f: impl FnMut(&str) -> T) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (id, tx) in drained {
            let _ = tx.send(f(&id));
        }
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<T>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_matching_id_only() {
        let table = CorrelationTable::<u32>::new();
        let a = table.insert("a");
        let b = table.insert("b");

        assert!(table.resolve("b", 2));
        assert_eq!(b.await.unwrap(), 2);
        assert!(table.contains("a"));
        assert_eq!(table.len(), 1);

        assert!(table.resolve("a", 1));
        assert_eq!(a.await.unwrap(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_id_is_ignored() {
        let table = CorrelationTable::<u32>::new();
        let _rx = table.insert("known");
        assert!(!table.resolve("unknown", 7));
        assert!(table.contains("known"));
    }

    #[tokio::test]
    async fn second_resolution_is_a_no_op() {
        let table = CorrelationTable::<u32>::new();
        let rx = table.insert("once");
        assert!(table.resolve("once", 1));
        assert!(!table.resolve("once", 2));
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[test]
    fn resolving_after_waiter_dropped_still_removes_entry() {
        let table = CorrelationTable::<u32>::new();
        drop(table.insert("gone"));
        assert!(!table.resolve("gone", 1));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn drain_resolves_everything() {
        let table = CorrelationTable::<String>::new();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_eq!(table.drain_with(|id| format!("closed {id}")), 2);
        assert_eq!(a.await.unwrap(), "closed a");
        assert_eq!(b.await.unwrap(), "closed b");
        assert!(table.is_empty());
    }
}
