use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio_util::sync::CancellationToken;

/// Cancellation handle shared by a registry entry and its task.
///
/// Emission goes through [`Subscription::emit_while_active`], which holds the
/// same lock `cancel` takes, so once `cancel` returns nothing else is emitted.
#[derive(Clone)]
pub struct Subscription {
    token: CancellationToken,
    open: Arc<Mutex<bool>>,
}

impl Subscription {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            open: Arc::new(Mutex::new(true)),
        }
    }

    /// Waits for an in-flight emission to finish, then closes the
    /// subscription.
    pub fn cancel(&self) {
        let mut open = self.lock();
        *open = false;
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Runs `emit` unless the subscription has been cancelled. Returns
    /// whether it ran.
    pub fn emit_while_active(&self, emit: impl FnOnce()) -> bool {
        let open = self.lock();
        if !*open {
            return false;
        }
        emit();
        true
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

struct Entry {
    generation: u64,
    subscription: Subscription,
}

#[derive(Default)]
struct Entries {
    active: HashMap<String, Entry>,
    next_generation: u64,
}

/// Background tasks keyed by subscription, at most one per key.
///
/// Installing under a live key cancels the old task before the new one is
/// recorded. A task that ends on its own removes its entry, unless it has
/// already been replaced, in which case the successor's entry is left alone.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<Entries>,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawns `pump` under `key`. The pump receives a [`Subscription`] that is
    /// cancelled when the entry is cancelled or replaced and must stop at its
    /// next suspension point. Returns `true` if an older task was replaced.
    pub fn install<F, Fut>(self: &Arc<Self>, key: impl Into<String>, pump: F) -> bool
    where
        F: FnOnce(Subscription) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let subscription = Subscription::new();
        let task = pump(subscription.clone());
        let registry: Weak<Self> = Arc::downgrade(self);

        let mut entries = self.lock();
        let replaced = match entries.active.remove(&key) {
            Some(previous) => {
                previous.subscription.cancel();
                tracing::debug!(key = %key, "replacing active subscription");
                true
            }
            None => false,
        };

        let generation = entries.next_generation;
        entries.next_generation += 1;

        let finished_key = key.clone();
        tokio::spawn(async move {
            task.await;
            if let Some(registry) = registry.upgrade() {
                registry.finish(&finished_key, generation);
            }
        });

        entries.active.insert(key, Entry { generation, subscription });
        replaced
    }

    /// Cancels the task under `key`. Returns `false` when nothing was active.
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().active.remove(key) {
            Some(entry) => {
                entry.subscription.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.lock().active.drain().collect();
        for (_, entry) in &drained {
            entry.subscription.cancel();
        }
        drained.len()
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.lock().active.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.lock().active.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn finish(&self, key: &str, generation: u64) {
        let mut entries = self.lock();
        if entries.active.get(key).is_some_and(|entry| entry.generation == generation) {
            entries.active.remove(key);
            tracing::debug!(key, "subscription ended");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
