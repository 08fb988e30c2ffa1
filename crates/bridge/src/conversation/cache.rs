use std::collections::HashMap;
use std::sync::RwLock;

use crate::network::Conversation;

/// Composite cache key. The client address is part of the key so two
/// sessions that share a topic never see each other's handle.
pub fn cache_key(client_address: &str, topic: &str) -> String {
    format!("{client_address}:{topic}")
}

/// Resolved conversation handles keyed by [`cache_key`].
#[derive(Default)]
pub struct ConversationCache {
    entries: RwLock<HashMap<String, Conversation>>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, client_address: &str, topic: &str) -> Option<Conversation> {
        self.read().get(&cache_key(client_address, topic)).cloned()
    }

    /// Inserts or refreshes the handle for `conversation.topic`.
    pub fn insert(&self, client_address: &str, conversation: Conversation) {
        let key = cache_key(client_address, &conversation.topic);
        self.write().insert(key, conversation);
    }

    pub fn extend<'a>(
        &self,
        client_address: &str,
        conversations: impl IntoIterator<Item = &'a Conversation>,
    ) {
        let mut entries = self.write();
        for conversation in conversations {
            entries.insert(cache_key(client_address, &conversation.topic), conversation.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Conversation>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Conversation>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
