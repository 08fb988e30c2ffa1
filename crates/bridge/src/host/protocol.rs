use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::events::HostEvent;
use crate::error::ErrorBody;
use crate::network::Environment;

const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024; // 10 MB

/// Host → bridge: one call, answered by a `Response` with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRequest {
    pub id: u64,
    pub call: HostCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum HostCall {
    Authenticate {
        address: String,
        #[serde(default)]
        environment: Environment,
    },
    SubmitSignature {
        id: String,
        signature: String,
    },
    CreateRandom {
        #[serde(default)]
        environment: Environment,
    },
    CreateFromKeyBundle {
        key_bundle: String,
        #[serde(default)]
        environment: Environment,
    },
    ExportKeyBundle {
        address: String,
    },
    ExportConversationTopicData {
        address: String,
        topic: String,
    },
    ImportConversationTopicData {
        address: String,
        topic_data: String,
    },
    CanMessage {
        address: String,
        peer_address: String,
    },
    ListConversations {
        address: String,
    },
    LoadMessages {
        address: String,
        topics: Vec<String>,
        #[serde(default)]
        conversation_ids: Vec<Option<String>>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        before: Option<u64>,
        #[serde(default)]
        after: Option<u64>,
    },
    CreateConversation {
        address: String,
        peer_address: String,
        #[serde(default)]
        conversation_id: Option<String>,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
    #[serde(rename = "send")]
    SendMessage {
        address: String,
        topic: String,
        #[serde(default)]
        conversation_id: Option<String>,
        /// Base64 of the encoded content bytes.
        content: String,
    },
    SubscribeToConversations {
        address: String,
    },
    SubscribeToAllMessages {
        address: String,
    },
    SubscribeToMessages {
        address: String,
        topic: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    UnsubscribeFromMessages {
        address: String,
        topic: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    DecodeMessage {
        address: String,
        topic: String,
        /// Base64 of the encrypted envelope.
        envelope: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    Logout {
        address: String,
    },
}

impl HostCall {
    pub fn method(&self) -> &'static str {
        match self {
            HostCall::Authenticate { .. } => "authenticate",
            HostCall::SubmitSignature { .. } => "submitSignature",
            HostCall::CreateRandom { .. } => "createRandom",
            HostCall::CreateFromKeyBundle { .. } => "createFromKeyBundle",
            HostCall::ExportKeyBundle { .. } => "exportKeyBundle",
            HostCall::ExportConversationTopicData { .. } => "exportConversationTopicData",
            HostCall::ImportConversationTopicData { .. } => "importConversationTopicData",
            HostCall::CanMessage { .. } => "canMessage",
            HostCall::ListConversations { .. } => "listConversations",
            HostCall::LoadMessages { .. } => "loadMessages",
            HostCall::CreateConversation { .. } => "createConversation",
            HostCall::SendMessage { .. } => "send",
            HostCall::SubscribeToConversations { .. } => "subscribeToConversations",
            HostCall::SubscribeToAllMessages { .. } => "subscribeToAllMessages",
            HostCall::SubscribeToMessages { .. } => "subscribeToMessages",
            HostCall::UnsubscribeFromMessages { .. } => "unsubscribeFromMessages",
            HostCall::DecodeMessage { .. } => "decodeMessage",
            HostCall::Logout { .. } => "logout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Ok(serde_json::Value),
    Err(ErrorBody),
}

/// Bridge → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeMessage {
    Response { id: u64, outcome: Outcome },
    Event { event: HostEvent },
}

/// Write a length-prefixed JSON message.
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(msg).context("serializing message")?;
    let len = u32::try_from(payload.len()).context("message length overflows u32")?;
    if len > MAX_MESSAGE_SIZE {
        bail!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})");
    }
    writer.write_all(&len.to_be_bytes()).await.context("writing length prefix")?;
    writer.write_all(&payload).await.context("writing payload")?;
    writer.flush().await.context("flushing writer")?;
    Ok(())
}

/// Read a length-prefixed JSON message.
pub async fn read_message<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match try_read_message(reader).await? {
        Some(msg) => Ok(msg),
        None => bail!("stream closed before a message arrived"),
    }
}

/// Like [`read_message`], but a clean end of stream before the length prefix
/// yields `Ok(None)`.
pub async fn try_read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let read = reader
            .read(&mut len_buf[filled..])
            .await
            .context("reading length prefix")?;
        if read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            bail!("stream closed inside a length prefix");
        }
        filled += read;
    }
    let len = u32::from_be_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        bail!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})");
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.context("reading payload")?;
    serde_json::from_slice(&payload)
        .map(Some)
        .context("deserializing message")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::duplex;
    use tokio_util::compat::TokioAsyncReadCompatExt;

    #[test]
    fn request_wire_shape() {
        let request: HostRequest = serde_json::from_value(json!({
            "id": 7,
            "call": {
                "method": "subscribeToMessages",
                "params": {"address": "0xA", "topic": "/xmtp/0/t1"}
            }
        }))
        .unwrap();
        assert_eq!(request.id, 7);
        assert_eq!(
            request.call,
            HostCall::SubscribeToMessages {
                address: "0xA".into(),
                topic: "/xmtp/0/t1".into(),
                conversation_id: None,
            }
        );
        assert_eq!(request.call.method(), "subscribeToMessages");
    }

    #[test]
    fn send_uses_short_method_name() {
        let call: HostCall = serde_json::from_value(json!({
            "method": "send",
            "params": {"address": "0xA", "topic": "/t", "content": "aGk="}
        }))
        .unwrap();
        assert_eq!(call.method(), "send");
    }

    #[test]
    fn environment_defaults_to_dev() {
        let call: HostCall = serde_json::from_value(json!({
            "method": "authenticate",
            "params": {"address": "0xA"}
        }))
        .unwrap();
        assert_eq!(
            call,
            HostCall::Authenticate {
                address: "0xA".into(),
                environment: Environment::Dev,
            }
        );
    }

    #[test]
    fn response_wire_shape() {
        let msg = BridgeMessage::Response {
            id: 3,
            outcome: Outcome::Err(ErrorBody {
                kind: "noClient".into(),
                message: "no client for 0xA".into(),
            }),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "response",
                "id": 3,
                "outcome": {"err": {"kind": "noClient", "message": "no client for 0xA"}}
            })
        );
    }

    #[tokio::test]
    async fn roundtrip_event_message() {
        let (client, server) = duplex(1024);
        let (mut server_r, _server_w) = server.compat().split();
        let (_client_r, mut client_w) = client.compat().split();

        let msg = BridgeMessage::Event {
            event: HostEvent::Authenticated { address: "0xA".into() },
        };
        write_message(&mut client_w, &msg).await.unwrap();
        drop(client_w);

        let received: BridgeMessage = read_message(&mut server_r).await.unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        let (client, server) = duplex(64);
        drop(client);
        let mut server = server.compat();
        let received: Option<BridgeMessage> = try_read_message(&mut server).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (client, server) = duplex(64);
        let mut client = client.compat();
        client.write_all(&(MAX_MESSAGE_SIZE + 1).to_be_bytes()).await.unwrap();
        let mut server = server.compat();
        let err = read_message::<_, BridgeMessage>(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("message too large"));
    }
}
