use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use super::{
    AccountSigner, Conversation, ConversationContext, ConversationVersion, Environment, Message,
    Network, NetworkClient, NetworkError, Pagination, TopicQuery,
};
use crate::signing::{LocalKeySigner, recover_address};

const FEED_CAPACITY: usize = 1024;

/// A messaging network living entirely in this process.
///
/// Every client created from the same `MemoryNetwork` (or a clone of it)
/// shares accounts, conversations, and live feeds. Test helpers let callers
/// seed conversations, deliver messages from peers, and break streams.
#[derive(Clone)]
pub struct MemoryNetwork {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    feed: broadcast::Sender<Feed>,
    verify_signatures: bool,
}

#[derive(Default)]
struct State {
    accounts: HashSet<String>,
    conversations: Vec<StoredConversation>,
    messages: HashMap<String, Vec<Message>>,
    list_calls: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
struct StoredConversation {
    topic: String,
    members: [String; 2],
    version: ConversationVersion,
    created_at_ms: u64,
    context: Option<ConversationContext>,
}

impl StoredConversation {
    fn is_member(&self, address: &str) -> bool {
        self.members.iter().any(|m| m == address)
    }

    fn view_for(&self, address: &str) -> Option<Conversation> {
        let peer = match &self.members {
            [a, b] if a == address => b,
            [a, b] if b == address => a,
            _ => return None,
        };
        Some(Conversation {
            topic: self.topic.clone(),
            peer_address: peer.clone(),
            version: self.version,
            created_at_ms: self.created_at_ms,
            context: self.context.clone(),
        })
    }
}

#[derive(Debug, Clone)]
enum Feed {
    Conversation(StoredConversation),
    Message { message: Message, members: [String; 2] },
    Failure { address: String, reason: String },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyBundle {
    address: String,
    identity_key: String,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_signature_verification(false)
    }

    /// When enabled, `create_client` recovers the signer's address from the
    /// identity signature and rejects mismatches.
    pub fn with_signature_verification(verify_signatures: bool) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                feed,
                verify_signatures,
            }),
        }
    }

    /// Makes `address` reachable without creating a client for it.
    pub fn register_address(&self, address: &str) {
        self.shared.lock().accounts.insert(address.to_string());
    }

    /// Creates a conversation between `creator` and `peer` under a fixed topic
    /// and announces it on the live feed.
    pub fn seed_conversation(
        &self,
        creator: &str,
        peer: &str,
        topic: &str,
        context: Option<ConversationContext>,
    ) -> Conversation {
        let conversation = Conversation {
            topic: topic.to_string(),
            peer_address: peer.to_string(),
            version: ConversationVersion::V2,
            created_at_ms: now_ms(),
            context,
        };
        self.shared.insert_conversation(StoredConversation {
            topic: conversation.topic.clone(),
            members: [creator.to_string(), peer.to_string()],
            version: conversation.version,
            created_at_ms: conversation.created_at_ms,
            context: conversation.context.clone(),
        });
        conversation
    }

    /// Appends a message from `sender` to `topic` and announces it.
    pub fn deliver(
        &self,
        topic: &str,
        sender: &str,
        content: Vec<u8>,
    ) -> Result<Message, NetworkError> {
        self.shared.append_message(topic, sender, content)
    }

    /// Breaks every live stream currently open for `address`.
    pub fn fail_streams(&self, address: &str, reason: &str) {
        let _ = self.shared.feed.send(Feed::Failure {
            address: address.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Number of full conversation listings `address` has requested.
    pub fn list_calls(&self, address: &str) -> usize {
        self.shared.lock().list_calls.get(address).copied().unwrap_or_default()
    }

    /// Serializes a message into the envelope form `decode_envelope` accepts.
    pub fn seal_envelope(message: &Message) -> Vec<u8> {
        serde_json::to_vec(message).unwrap_or_default()
    }

    fn client(
        &self,
        address: String,
        environment: Environment,
        identity_key: LocalKeySigner,
    ) -> Arc<dyn NetworkClient> {
        self.register_address(&address);
        Arc::new(MemoryClient {
            address,
            environment,
            identity_key,
            shared: self.shared.clone(),
        })
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert_conversation(&self, stored: StoredConversation) {
        {
            let mut state = self.lock();
            state.messages.entry(stored.topic.clone()).or_default();
            state.conversations.push(stored.clone());
        }
        let _ = self.feed.send(Feed::Conversation(stored));
    }

    fn append_message(
        &self,
        topic: &str,
        sender: &str,
        content: Vec<u8>,
    ) -> Result<Message, NetworkError> {
        let message = Message {
            id: Uuid::new_v4().simple().to_string(),
            topic: topic.to_string(),
            sender_address: sender.to_string(),
            sent_at_ms: now_ms(),
            content,
        };
        let members = {
            let mut state = self.lock();
            let members = state
                .conversations
                .iter()
                .find(|c| c.topic == topic && c.is_member(sender))
                .map(|c| c.members.clone())
                .ok_or_else(|| {
                    NetworkError::Decode(format!("{sender} is not a member of {topic}"))
                })?;
            state.messages.entry(topic.to_string()).or_default().push(message.clone());
            members
        };
        let _ = self.feed.send(Feed::Message {
            message: message.clone(),
            members,
        });
        Ok(message)
    }

    fn subscribe(&self) -> BoxStream<'static, Result<Feed, NetworkError>> {
        let receiver = self.feed.subscribe();
        stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(feed) => Some((Ok(feed), receiver)),
                Err(RecvError::Lagged(skipped)) => Some((
                    Err(NetworkError::Stream(format!("lagged behind by {skipped} events"))),
                    receiver,
                )),
                Err(RecvError::Closed) => None,
            }
        })
        .boxed()
    }
}

#[async_trait]
impl Network for MemoryNetwork {
    async fn create_client(
        &self,
        environment: Environment,
        signer: Arc<dyn AccountSigner>,
    ) -> Result<Arc<dyn NetworkClient>, NetworkError> {
        let address = signer.address().to_string();
        let identity_key = LocalKeySigner::random();
        let known = self.shared.lock().accounts.contains(&address);
        let action = if known { "Enable Identity" } else { "Create Identity" };
        let message = format!(
            "XMTP : {action}\n{}\n\nFor more info: https://xmtp.org/signatures/",
            identity_key.address()
        );

        let signature = signer.sign(&message).await?;
        if self.shared.verify_signatures {
            let recovered = recover_address(&message, &signature)?;
            if !recovered.eq_ignore_ascii_case(&address) {
                tracing::warn!(%address, %recovered, "identity signature does not match account");
                return Err(NetworkError::Verification(address));
            }
        }

        tracing::debug!(%address, %environment, "memory client created");
        Ok(self.client(address, environment, identity_key))
    }

    async fn create_random(
        &self,
        environment: Environment,
    ) -> Result<Arc<dyn NetworkClient>, NetworkError> {
        let wallet = LocalKeySigner::random();
        Ok(self.client(wallet.address().to_string(), environment, LocalKeySigner::random()))
    }

    async fn create_from_key_bundle(
        &self,
        key_bundle: &str,
        environment: Environment,
    ) -> Result<Arc<dyn NetworkClient>, NetworkError> {
        let bundle: KeyBundle =
            serde_json::from_str(key_bundle).map_err(|e| {
                NetworkError::InvalidKeyBundle(e.to_string())
            })?;
        let identity_key = LocalKeySigner::from_hex(&bundle.identity_key)
            .map_err(|e| NetworkError::InvalidKeyBundle(e.to_string()))?;
        Ok(self.client(bundle.address, environment, identity_key))
    }
}

struct MemoryClient {
    address: String,
    environment: Environment,
    identity_key: LocalKeySigner,
    shared: Arc<Shared>,
}

impl MemoryClient {
    fn conversation_for(&self, topic: &str) -> Option<StoredConversation> {
        self.shared
            .lock()
            .conversations
            .iter()
            .find(|c| c.topic == topic && c.is_member(&self.address))
            .cloned()
    }
}

#[async_trait]
impl NetworkClient for MemoryClient {
    fn address(&self) -> &str {
        &self.address
    }

    fn environment(&self) -> Environment {
        self.environment
    }

    async fn export_key_bundle(&self) -> Result<String, NetworkError> {
        let bundle = KeyBundle {
            address: self.address.clone(),
            identity_key: self.identity_key.private_key_hex(),
        };
        serde_json::to_string(&bundle).map_err(|e| NetworkError::InvalidKeyBundle(e.to_string()))
    }

    async fn can_message(&self, peer_address: &str) -> Result<bool, NetworkError> {
        Ok(self.shared.lock().accounts.contains(peer_address))
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, NetworkError> {
        let mut state = self.shared.lock();
        *state.list_calls.entry(self.address.clone()).or_default() += 1;
        Ok(state
            .conversations
            .iter()
            .filter_map(|c| c.view_for(&self.address))
            .collect())
    }

    async fn new_conversation(
        &self,
        peer_address: &str,
        context: Option<ConversationContext>,
    ) -> Result<Conversation, NetworkError> {
        {
            let state = self.shared.lock();
            if !state.accounts.contains(peer_address) {
                return Err(NetworkError::NotOnNetwork(peer_address.to_string()));
            }
            let wanted = context.as_ref().map(|c| c.conversation_id.as_str());
            if let Some(existing) = state.conversations.iter().find(|c| {
                c.is_member(&self.address)
                    && c.is_member(peer_address)
                    && c.context.as_ref().map(|c| c.conversation_id.as_str()) == wanted
            }) {
                return existing
                    .view_for(&self.address)
                    .ok_or_else(|| NetworkError::UnknownAccount(self.address.clone()));
            }
        }

        let stored = StoredConversation {
            topic: format!("/xmtp/0/m-{}/proto", Uuid::new_v4().simple()),
            members: [self.address.clone(), peer_address.to_string()],
            version: ConversationVersion::V2,
            created_at_ms: now_ms(),
            context,
        };
        let view = stored
            .view_for(&self.address)
            .ok_or_else(|| NetworkError::UnknownAccount(self.address.clone()))?;
        self.shared.insert_conversation(stored);
        Ok(view)
    }

    async fn export_topic_data(&self, conversation: &Conversation) -> Result<String, NetworkError> {
        serde_json::to_string(conversation)
            .map_err(|e| NetworkError::InvalidTopicData(e.to_string()))
    }

    async fn import_topic_data(&self, topic_data: &str) -> Result<Conversation, NetworkError> {
        let conversation: Conversation =
            serde_json::from_str(topic_data).map_err(|e| {
                NetworkError::InvalidTopicData(e.to_string())
            })?;
        if self.conversation_for(&conversation.topic).is_none() {
            self.shared.insert_conversation(StoredConversation {
                topic: conversation.topic.clone(),
                members: [self.address.clone(), conversation.peer_address.clone()],
                version: conversation.version,
                created_at_ms: conversation.created_at_ms,
                context: conversation.context.clone(),
            });
        }
        Ok(conversation)
    }

    async fn load_messages(
        &self,
        queries: &[TopicQuery],
        pagination: Pagination,
    ) -> Result<Vec<Message>, NetworkError> {
        let state = self.shared.lock();
        let mut loaded = Vec::new();
        for query in queries {
            let member = state
                .conversations
                .iter()
                .any(|c| c.topic == query.topic && c.is_member(&self.address));
            if !member {
                continue;
            }
            let Some(messages) = state.messages.get(&query.topic) else {
                continue;
            };
            let mut page: Vec<Message> = messages
                .iter()
                .rev()
                .filter(|m| pagination.before_ms.is_none_or(|before| m.sent_at_ms < before))
                .filter(|m| pagination.after_ms.is_none_or(|after| m.sent_at_ms > after))
                .cloned()
                .collect();
            page.sort_by_key(|m| Reverse(m.sent_at_ms));
            if let Some(limit) = pagination.limit {
                page.truncate(limit);
            }
            loaded.extend(page);
        }
        Ok(loaded)
    }

    async fn send(
        &self,
        conversation: &Conversation,
        content: Vec<u8>,
    ) -> Result<String, NetworkError> {
        let message = self.shared.append_message(&conversation.topic, &self.address, content)?;
        Ok(message.id)
    }

    async fn decode_envelope(
        &self,
        conversation: &Conversation,
        envelope: &[u8],
    ) -> Result<Message, NetworkError> {
        let message: Message =
            serde_json::from_slice(envelope).map_err(|e| NetworkError::Decode(e.to_string()))?;
        if message.topic != conversation.topic {
            return Err(NetworkError::Decode(format!(
                "envelope belongs to {}, not {}",
                message.topic, conversation.topic
            )));
        }
        Ok(message)
    }

    fn stream_conversations(&self) -> BoxStream<'static, Result<Conversation, NetworkError>> {
        let address = self.address.clone();
        self.shared
            .subscribe()
            .filter_map(move |item| {
                let item = match item {
                    Ok(Feed::Conversation(stored)) => stored.view_for(&address).map(Ok),
                    Ok(Feed::Failure { address: target, reason }) if target == address => {
                        Some(Err(NetworkError::Stream(reason)))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                };
                async move { item }
            })
            .boxed()
    }

    fn stream_all_messages(&self) -> BoxStream<'static, Result<Message, NetworkError>> {
        let address = self.address.clone();
        self.shared
            .subscribe()
            .filter_map(move |item| {
                let item = match item {
                    Ok(Feed::Message { message, members }) if members.contains(&address) => {
                        Some(Ok(message))
                    }
                    Ok(Feed::Failure { address: target, reason }) if target == address => {
                        Some(Err(NetworkError::Stream(reason)))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                };
                async move { item }
            })
            .boxed()
    }

    fn stream_messages(
        &self,
        conversation: &Conversation,
    ) -> BoxStream<'static, Result<Message, NetworkError>> {
        let address = self.address.clone();
        let topic = conversation.topic.clone();
        self.shared
            .subscribe()
            .filter_map(move |item| {
                let item = match item {
                    Ok(Feed::Message { message, .. }) if message.topic == topic => {
                        Some(Ok(message))
                    }
                    Ok(Feed::Failure { address: target, reason }) if target == address => {
                        Some(Err(NetworkError::Stream(reason)))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                };
                async move { item }
            })
            .boxed()
    }
}
