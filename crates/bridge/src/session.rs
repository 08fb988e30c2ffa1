use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::conversation::{ConversationCache, ConversationResolver};
use crate::encoding::CodecRegistry;
use crate::error::BridgeError;
use crate::host::EventSink;
use crate::network::{Conversation, NetworkClient};
use crate::subscription::{
    ALL_MESSAGES_KEY, CONVERSATIONS_KEY, SubscriptionRegistry, pump_all_messages,
    pump_conversation_messages, pump_conversations,
};

/// Everything the bridge holds for one authenticated identity: the client,
/// its conversation cache, and its live subscriptions.
pub struct Session {
    client: Arc<dyn NetworkClient>,
    cache: Arc<ConversationCache>,
    resolver: ConversationResolver,
    subscriptions: Arc<SubscriptionRegistry>,
    events: Arc<dyn EventSink>,
    codecs: Arc<CodecRegistry>,
}

impl Session {
    pub fn new(
        client: Arc<dyn NetworkClient>,
        events: Arc<dyn EventSink>,
        codecs: Arc<CodecRegistry>,
    ) -> Self {
        let cache = Arc::new(ConversationCache::new());
        Self {
            resolver: ConversationResolver::new(client.clone(), cache.clone()),
            client,
            cache,
            subscriptions: SubscriptionRegistry::new(),
            events,
            codecs,
        }
    }

    pub fn address(&self) -> &str {
        self.client.address()
    }

    pub fn client(&self) -> &Arc<dyn NetworkClient> {
        &self.client
    }

    pub fn resolver(&self) -> &ConversationResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Resolves `topic`, turning "not found" into an error.
    pub async fn conversation(&self, topic: &str) -> Result<Conversation, BridgeError> {
        self.resolver
            .resolve(topic)
            .await?
            .ok_or_else(|| BridgeError::ConversationNotFound(topic.to_string()))
    }

    pub fn subscribe_conversations(&self) {
        let stream = self.client.stream_conversations();
        let address = self.address().to_string();
        let events = self.events.clone();
        self.subscriptions.install(CONVERSATIONS_KEY, move |subscription| async move {
            pump_conversations(address, stream, events, subscription).await;
        });
    }

    pub fn subscribe_all_messages(&self) {
        let stream = self.client.stream_all_messages();
        let address = self.address().to_string();
        let events = self.events.clone();
        let codecs = self.codecs.clone();
        self.subscriptions.install(ALL_MESSAGES_KEY, move |subscription| async move {
            pump_all_messages(address, stream, events, codecs, subscription).await;
        });
    }

    /// Streams one conversation. Returns `false` without starting anything
    /// when the topic cannot be resolved.
    pub async fn subscribe_messages(&self, topic: &str) -> Result<bool, BridgeError> {
        let Some(conversation) = self.resolver.resolve(topic).await? else {
            tracing::debug!(
                address = self.address(),
                topic,
                "not subscribing to unknown conversation"
            );
            return Ok(false);
        };

        let key = self.resolver.key(&conversation.topic);
        let stream = self.client.stream_messages(&conversation);
        let address = self.address().to_string();
        let events = self.events.clone();
        let codecs = self.codecs.clone();
        self.subscriptions.install(key, move |subscription| async move {
            pump_conversation_messages(address, conversation, stream, events, codecs, subscription)
                .await;
        });
        Ok(true)
    }

    /// Returns whether an active stream was cancelled.
    pub async fn unsubscribe_messages(&self, topic: &str) -> Result<bool, BridgeError> {
        let Some(conversation) = self.resolver.resolve(topic).await? else {
            return Ok(false);
        };
        Ok(self.subscriptions.cancel(&self.resolver.key(&conversation.topic)))
    }

    /// Cancels every pump and forgets every cached conversation.
    pub fn teardown(&self) {
        let cancelled = self.subscriptions.cancel_all();
        self.cache.clear();
        tracing::debug!(address = self.address(), cancelled, "session torn down");
    }
}

/// Sessions keyed by client address.
#[derive(Default)]
pub struct Sessions {
    by_address: RwLock<HashMap<String, Arc<Session>>>,
}

impl Sessions {
    pub fn get(&self, address: &str) -> Result<Arc<Session>, BridgeError> {
        self.by_address
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(address)
            .cloned()
            .ok_or_else(|| BridgeError::NoClient(address.to_string()))
    }

    /// Stores `session`, tearing down any session it replaces.
    pub fn insert(&self, session: Arc<Session>) {
        let previous = self
            .by_address
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session.address().to_string(), session);
        if let Some(previous) = previous {
            previous.teardown();
        }
    }

    pub fn remove(&self, address: &str) -> Option<Arc<Session>> {
        let removed = self
            .by_address
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(address);
        if let Some(session) = &removed {
            session.teardown();
        }
        removed
    }

    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self
            .by_address
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .collect();
        for (_, session) in &drained {
            session.teardown();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.by_address.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
