//! The messaging-network collaborator.
//!
//! The bridge never talks to the wire directly. It drives a [`Network`] to
//! create authenticated [`NetworkClient`]s and then issues every remote
//! operation through that client. [`memory::MemoryNetwork`] is the in-process
//! implementation used for local runs and tests.

pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::signing::{SignatureValue, SigningError};

pub use memory::MemoryNetwork;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("unknown account: {0}")]
    UnknownAccount(String),
    #[error("{0} is not on the network")]
    NotOnNetwork(String),
    #[error("invalid key bundle: {0}")]
    InvalidKeyBundle(String),
    #[error("invalid topic data: {0}")]
    InvalidTopicData(String),
    #[error("could not decode envelope: {0}")]
    Decode(String),
    #[error("stream closed: {0}")]
    Stream(String),
    #[error("identity verification failed for {0}")]
    Verification(String),
}

/// Which deployment of the messaging network a client connects to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    #[default]
    Dev,
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Local => "local",
            Environment::Dev => "dev",
            Environment::Production => "production",
        })
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "dev" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationVersion {
    V1,
    V2,
}

/// Application-supplied context distinguishing several conversations with the
/// same peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub conversation_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A conversation as seen from one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub topic: String,
    pub peer_address: String,
    pub version: ConversationVersion,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ConversationContext>,
}

impl Conversation {
    pub fn conversation_id(&self) -> Option<&str> {
        self.context.as_ref().map(|c| c.conversation_id.as_str())
    }
}

/// A message as stored on the network: the content stays encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub topic: String,
    pub sender_address: String,
    pub sent_at_ms: u64,
    pub content: Vec<u8>,
}

/// One topic of a batched history query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicQuery {
    pub topic: String,
    pub conversation_id: Option<String>,
}

/// Paging bounds shared by every topic of a batched query. `before` and
/// `after` are exclusive millisecond timestamps; `limit` applies per topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub before_ms: Option<u64>,
    pub after_ms: Option<u64>,
}

/// Signs on behalf of one account. The network calls this while creating a
/// client; the bridge implements it by round-tripping through the host.
#[async_trait]
pub trait AccountSigner: Send + Sync {
    fn address(&self) -> &str;

    async fn sign(&self, message: &str) -> Result<SignatureValue, SigningError>;
}

/// Creates authenticated clients.
#[async_trait]
pub trait Network: Send + Sync {
    /// Creates a client for an externally held key, asking `signer` for as
    /// many signatures as the network needs.
    async fn create_client(
        &self,
        environment: Environment,
        signer: Arc<dyn AccountSigner>,
    ) -> Result<Arc<dyn NetworkClient>, NetworkError>;

    async fn create_random(
        &self,
        environment: Environment,
    ) -> Result<Arc<dyn NetworkClient>, NetworkError>;

    async fn create_from_key_bundle(
        &self,
        key_bundle: &str,
        environment: Environment,
    ) -> Result<Arc<dyn NetworkClient>, NetworkError>;
}

/// An authenticated session on the network.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    fn address(&self) -> &str;

    fn environment(&self) -> Environment;

    async fn export_key_bundle(&self) -> Result<String, NetworkError>;

    async fn can_message(&self, peer_address: &str) -> Result<bool, NetworkError>;

    async fn list_conversations(&self) -> Result<Vec<Conversation>, NetworkError>;

    async fn new_conversation(
        &self,
        peer_address: &str,
        context: Option<ConversationContext>,
    ) -> Result<Conversation, NetworkError>;

    async fn export_topic_data(&self, conversation: &Conversation) -> Result<String, NetworkError>;

    async fn import_topic_data(&self, topic_data: &str) -> Result<Conversation, NetworkError>;

    async fn load_messages(
        &self,
        queries: &[TopicQuery],
        pagination: Pagination,
    ) -> Result<Vec<Message>, NetworkError>;

    async fn send(
        &self,
        conversation: &Conversation,
        content: Vec<u8>,
    ) -> Result<String, NetworkError>;

    async fn decode_envelope(
        &self,
        conversation: &Conversation,
        envelope: &[u8],
    ) -> Result<Message, NetworkError>;

    fn stream_conversations(&self) -> BoxStream<'static, Result<Conversation, NetworkError>>;

    fn stream_all_messages(&self) -> BoxStream<'static, Result<Message, NetworkError>>;

    fn stream_messages(
        &self,
        conversation: &Conversation,
    ) -> BoxStream<'static, Result<Message, NetworkError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_aliases() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(" Dev ".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn conversation_serializes_camel_case() {
        let conversation = Conversation {
            topic: "/xmtp/0/t1".into(),
            peer_address: "0xB".into(),
            version: ConversationVersion::V2,
            created_at_ms: 5,
            context: Some(ConversationContext {
                conversation_id: "chat".into(),
                metadata: BTreeMap::new(),
            }),
        };
        let value = serde_json::to_value(&conversation).unwrap();
        assert_eq!(value["peerAddress"], "0xB");
        assert_eq!(value["version"], "v2");
        assert_eq!(value["context"]["conversationId"], "chat");
        assert_eq!(conversation.conversation_id(), Some("chat"));
    }
}
