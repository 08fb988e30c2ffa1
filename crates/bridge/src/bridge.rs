use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::encoding::{CodecRegistry, MessageView};
use crate::error::BridgeError;
use crate::host::{EventSink, HostEvent};
use crate::network::{
    Conversation, ConversationContext, Environment, Network, NetworkClient, Pagination, TopicQuery,
};
use crate::session::{Session, Sessions};
use crate::signing::{ExternalSigner, HostSigner};

#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Upper bound on a single host signing round-trip. `None` waits forever.
    pub sign_timeout: Option<Duration>,
}

/// The host-facing surface: one method per host call.
///
/// A bridge owns the signing correlation table and one [`Session`] per
/// authenticated identity. Dropping or shutting it down cancels every
/// subscription and fails every outstanding signing request.
pub struct Bridge {
    network: Arc<dyn Network>,
    events: Arc<dyn EventSink>,
    signer: Arc<ExternalSigner>,
    sessions: Sessions,
    codecs: Arc<CodecRegistry>,
}

impl Bridge {
    pub fn new(
        network: Arc<dyn Network>,
        events: Arc<dyn EventSink>,
        config: BridgeConfig,
    ) -> Self {
        let signer = ExternalSigner::new(events.clone()).with_timeout(config.sign_timeout);
        Self {
            network,
            events,
            signer: Arc::new(signer),
            sessions: Sessions::default(),
            codecs: Arc::new(CodecRegistry::default()),
        }
    }

    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Arc::new(codecs);
        self
    }

    pub fn session(&self, address: &str) -> Result<Arc<Session>, BridgeError> {
        self.sessions.get(address)
    }

    pub fn pending_signatures(&self) -> usize {
        self.signer.pending()
    }

    /// Creates a client for a host-held key. Every signature the network asks
    /// for is forwarded to the host as a `signRequested` event.
    pub async fn authenticate(
        &self,
        address: &str,
        environment: Environment,
    ) -> Result<(), BridgeError> {
        tracing::info!(address, %environment, "authenticating");
        let signer = Arc::new(HostSigner::new(address, self.signer.clone()));
        let client = self.network.create_client(environment, signer).await?;
        let address = self.register(client);
        self.events.emit(HostEvent::Authenticated { address: address.clone() });
        tracing::info!(%address, "authenticated");
        Ok(())
    }

    /// Hands a host signature to the matching pending request. Unknown ids are
    /// ignored.
    pub fn submit_signature(&self, id: &str, signature: &str) -> bool {
        self.signer.resolve(id, signature)
    }

    pub async fn create_random(&self, environment: Environment) -> Result<String, BridgeError> {
        let client = self.network.create_random(environment).await?;
        Ok(self.register(client))
    }

    pub async fn create_from_key_bundle(
        &self,
        key_bundle: &str,
        environment: Environment,
    ) -> Result<String, BridgeError> {
        let client = self.network.create_from_key_bundle(key_bundle, environment).await?;
        Ok(self.register(client))
    }

    pub async fn export_key_bundle(&self, address: &str) -> Result<String, BridgeError> {
        let session = self.sessions.get(address)?;
        Ok(session.client().export_key_bundle().await?)
    }

    pub async fn export_conversation_topic_data(
        &self,
        address: &str,
        topic: &str,
    ) -> Result<String, BridgeError> {
        let session = self.sessions.get(address)?;
        let conversation = session.conversation(topic).await?;
        Ok(session.client().export_topic_data(&conversation).await?)
    }

    pub async fn import_conversation_topic_data(
        &self,
        address: &str,
        topic_data: &str,
    ) -> Result<Conversation, BridgeError> {
        let session = self.sessions.get(address)?;
        let conversation = session.client().import_topic_data(topic_data).await?;
        session.resolver().remember(conversation.clone());
        Ok(conversation)
    }

    pub async fn can_message(
        &self,
        address: &str,
        peer_address: &str,
    ) -> Result<bool, BridgeError> {
        let session = self.sessions.get(address)?;
        Ok(session.client().can_message(peer_address).await?)
    }

    pub async fn list_conversations(
        &self,
        address: &str,
    ) -> Result<Vec<Conversation>, BridgeError> {
        let session = self.sessions.get(address)?;
        Ok(session.resolver().list().await?)
    }

    /// Batched history. `conversation_ids[i]` pairs with `topics[i]`.
    pub async fn load_messages(
        &self,
        address: &str,
        topics: &[String],
        conversation_ids: &[Option<String>],
        pagination: Pagination,
    ) -> Result<Vec<MessageView>, BridgeError> {
        let session = self.sessions.get(address)?;
        let queries: Vec<TopicQuery> = topics
            .iter()
            .enumerate()
            .map(|(i, topic)| TopicQuery {
                topic: topic.clone(),
                conversation_id: conversation_ids.get(i).cloned().flatten(),
            })
            .collect();
        let messages = session.client().load_messages(&queries, pagination).await?;
        Ok(messages
            .into_iter()
            .map(|message| MessageView::decode(message, session.codecs()))
            .collect())
    }

    pub async fn create_conversation(
        &self,
        address: &str,
        peer_address: &str,
        conversation_id: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Conversation, BridgeError> {
        let session = self.sessions.get(address)?;
        let context = conversation_id.map(|conversation_id| ConversationContext {
            conversation_id,
            metadata,
        });
        let conversation = session.client().new_conversation(peer_address, context).await?;
        session.resolver().remember(conversation.clone());
        Ok(conversation)
    }

    pub async fn send(
        &self,
        address: &str,
        topic: &str,
        conversation_id: Option<&str>,
        content: Vec<u8>,
    ) -> Result<String, BridgeError> {
        let session = self.sessions.get(address)?;
        let conversation = session.conversation(topic).await?;
        let message_id = session.client().send(&conversation, content).await?;
        tracing::debug!(address, topic, conversation_id, %message_id, "message sent");
        Ok(message_id)
    }

    pub async fn subscribe_to_conversations(&self, address: &str) -> Result<(), BridgeError> {
        self.sessions.get(address)?.subscribe_conversations();
        Ok(())
    }

    pub async fn subscribe_to_all_messages(&self, address: &str) -> Result<(), BridgeError> {
        self.sessions.get(address)?.subscribe_all_messages();
        Ok(())
    }

    /// A topic that cannot be resolved starts nothing and is not an error.
    pub async fn subscribe_to_messages(
        &self,
        address: &str,
        topic: &str,
        conversation_id: Option<&str>,
    ) -> Result<(), BridgeError> {
        let session = self.sessions.get(address)?;
        if !session.subscribe_messages(topic).await? {
            tracing::debug!(
                address,
                topic,
                conversation_id,
                "subscribe ignored, conversation not found"
            );
        }
        Ok(())
    }

    pub async fn unsubscribe_from_messages(
        &self,
        address: &str,
        topic: &str,
        conversation_id: Option<&str>,
    ) -> Result<(), BridgeError> {
        let session = self.sessions.get(address)?;
        if !session.unsubscribe_messages(topic).await? {
            tracing::debug!(address, topic, conversation_id, "nothing to unsubscribe");
        }
        Ok(())
    }

    pub async fn decode_message(
        &self,
        address: &str,
        topic: &str,
        envelope: &str,
        conversation_id: Option<&str>,
    ) -> Result<MessageView, BridgeError> {
        let session = self.sessions.get(address)?;
        let conversation = session.conversation(topic).await?;
        let bytes = STANDARD
            .decode(envelope.trim())
            .map_err(|e| BridgeError::NoMessage(format!("envelope is not base64: {e}")))?;
        let message = session.client().decode_envelope(&conversation, &bytes).await?;
        tracing::trace!(
            address,
            topic,
            conversation_id,
            message_id = %message.id,
            "decoded envelope"
        );
        Ok(MessageView::decode(message, session.codecs()))
    }

    /// Ends the session for `address`. Returns `false` if there was none.
    pub fn logout(&self, address: &str) -> bool {
        let removed = self.sessions.remove(address).is_some();
        if removed {
            tracing::info!(address, "logged out");
        }
        removed
    }

    pub fn shutdown(&self) {
        let abandoned = self.signer.close();
        let sessions = self.sessions.clear();
        tracing::info!(abandoned, sessions, "bridge shut down");
    }

    fn register(&self, client: Arc<dyn NetworkClient>) -> String {
        let address = client.address().to_string();
        let session = Session::new(client, self.events.clone(), self.codecs.clone());
        self.sessions.insert(Arc::new(session));
        address
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.signer.close();
        self.sessions.clear();
    }
}
