mod text;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::network::Message;

pub use text::{TEXT_CONTENT_TYPE, TextCodec};

/// Content as it travels inside a message: a type tag, codec parameters, an
/// optional human-readable fallback, and the codec-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl EncodedContent {
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(self).context("serializing encoded content")
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(bytes).context("deserializing encoded content")
    }
}

/// Trait for turning application values into [`EncodedContent`] and back.
pub trait ContentCodec: Send + Sync {
    fn content_type(&self) -> &str;

    fn encode(&self, value: &serde_json::Value) -> anyhow::Result<EncodedContent>;

    fn decode(&self, content: &EncodedContent) -> anyhow::Result<serde_json::Value>;
}

/// Result of best-effort decoding. `Fallback` keeps the raw bytes so callers
/// can tell degraded delivery from a fully decoded message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MessageContent {
    Decoded {
        content_type: String,
        value: serde_json::Value,
    },
    Fallback {
        content_type: Option<String>,
        fallback: Option<String>,
        #[serde(with = "base64_bytes")]
        raw: Vec<u8>,
        reason: String,
    },
}

impl MessageContent {
    pub fn is_decoded(&self) -> bool {
        matches!(self, MessageContent::Decoded { .. })
    }
}

/// Codecs keyed by content type.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn ContentCodec>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self { codecs: HashMap::new() };
        registry.register(Arc::new(TextCodec));
        registry
    }
}

impl CodecRegistry {
    pub fn register(&mut self, codec: Arc<dyn ContentCodec>) {
        self.codecs.insert(codec.content_type().to_string(), codec);
    }

    pub fn get(&self, content_type: &str) -> Option<&Arc<dyn ContentCodec>> {
        self.codecs.get(content_type)
    }

    /// Decodes raw message content, degrading to [`MessageContent::Fallback`]
    /// instead of failing.
    pub fn decode(&self, raw: &[u8]) -> MessageContent {
        let encoded = match EncodedContent::from_bytes(raw) {
            Ok(encoded) => encoded,
            Err(e) => {
                return MessageContent::Fallback {
                    content_type: None,
                    fallback: None,
                    raw: raw.to_vec(),
                    reason: format!("{e:#}"),
                };
            }
        };

        let result = match self.get(&encoded.content_type) {
            Some(codec) => codec.decode(&encoded),
            None => Err(anyhow::anyhow!("no codec for {}", encoded.content_type)),
        };

        match result {
            Ok(value) => MessageContent::Decoded {
                content_type: encoded.content_type,
                value,
            },
            Err(e) => MessageContent::Fallback {
                content_type: Some(encoded.content_type),
                fallback: encoded.fallback,
                raw: raw.to_vec(),
                reason: format!("{e:#}"),
            },
        }
    }
}

/// A message with its content decoded, as handed to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub topic: String,
    pub sender_address: String,
    pub sent_at_ms: u64,
    pub content: MessageContent,
}

impl MessageView {
    pub fn decode(message: Message, codecs: &CodecRegistry) -> Self {
        let content = codecs.decode(&message.content);
        Self {
            id: message.id,
            topic: message.topic,
            sender_address: message.sender_address,
            sent_at_ms: message.sent_at_ms,
            content,
        }
    }
}

pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(D::Error::custom)
    }
}
