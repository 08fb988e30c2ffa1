use std::sync::Arc;

use super::cache::{ConversationCache, cache_key};
use crate::network::{Conversation, NetworkClient, NetworkError};

/// Finds conversation handles for one client, consulting the cache before
/// falling back to a full remote listing.
pub struct ConversationResolver {
    client: Arc<dyn NetworkClient>,
    cache: Arc<ConversationCache>,
}

impl ConversationResolver {
    pub fn new(client: Arc<dyn NetworkClient>, cache: Arc<ConversationCache>) -> Self {
        Self { client, cache }
    }

    pub fn key(&self, topic: &str) -> String {
        cache_key(self.client.address(), topic)
    }

    /// `Ok(None)` means the topic is unknown both locally and remotely.
    pub async fn resolve(&self, topic: &str) -> Result<Option<Conversation>, NetworkError> {
        let address = self.client.address();
        if let Some(conversation) = self.cache.get(address, topic) {
            return Ok(Some(conversation));
        }

        tracing::debug!(address, topic, "conversation cache miss, listing remote conversations");
        let conversations = self.list().await?;
        Ok(conversations.into_iter().find(|c| c.topic == topic))
    }

    /// Lists every remote conversation and refreshes the cache with all of them.
    pub async fn list(&self) -> Result<Vec<Conversation>, NetworkError> {
        let conversations = self.client.list_conversations().await?;
        self.cache.extend(self.client.address(), &conversations);
        Ok(conversations)
    }

    pub fn remember(&self, conversation: Conversation) {
        self.cache.insert(self.client.address(), conversation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Environment, MemoryNetwork, Network};

    async fn setup() -> (
        MemoryNetwork,
        Arc<dyn NetworkClient>,
        ConversationResolver,
        Arc<ConversationCache>,
    ) {
        let network = MemoryNetwork::new();
        let client = network.create_random(Environment::Local).await.unwrap();
        let cache = Arc::new(ConversationCache::new());
        let resolver = ConversationResolver::new(client.clone(), cache.clone());
        (network, client, resolver, cache)
    }

    #[tokio::test]
    async fn second_resolve_hits_cache() {
        let (network, client, resolver, _) = setup().await;
        network.register_address("0xB");
        network.seed_conversation(client.address(), "0xB", "/xmtp/0/t1", None);

        let first = resolver.resolve("/xmtp/0/t1").await.unwrap().unwrap();
        let second = resolver.resolve("/xmtp/0/t1").await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(network.list_calls(client.address()), 1);
    }

    #[tokio::test]
    async fn unknown_topic_is_none_not_error() {
        let (network, client, resolver, _) = setup().await;
        assert!(resolver.resolve("/xmtp/0/unknown").await.unwrap().is_none());
        assert_eq!(network.list_calls(client.address()), 1);
    }

    #[tokio::test]
    async fn listing_refreshes_every_entry() {
        let (network, client, resolver, cache) = setup().await;
        network.register_address("0xB");
        network.register_address("0xC");
        network.seed_conversation(client.address(), "0xB", "/t/1", None);
        network.seed_conversation("0xC", client.address(), "/t/2", None);

        let listed = resolver.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(client.address(), "/t/2").unwrap().peer_address, "0xC");

        resolver.resolve("/t/1").await.unwrap().unwrap();
        assert_eq!(network.list_calls(client.address()), 1);
    }
}
