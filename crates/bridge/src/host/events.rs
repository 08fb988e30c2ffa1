use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::encoding::{MessageContent, MessageView};
use crate::network::ConversationVersion;

/// Events pushed to the host without a matching request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostEvent {
    /// The host must sign `message` and answer with `submitSignature(id, ..)`.
    SignRequested { id: String, message: String },
    Authenticated { address: String },
    Conversation {
        client_address: String,
        topic: String,
        peer_address: String,
        version: ConversationVersion,
        conversation_id: Option<String>,
    },
    Message {
        client_address: String,
        id: String,
        content: MessageContent,
        sender_address: String,
        sent_at_ms: u64,
    },
    ConversationMessage {
        client_address: String,
        topic: String,
        conversation_id: Option<String>,
        message: MessageView,
    },
}

/// Fire-and-forget event emission towards the host.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: HostEvent);
}

impl EventSink for mpsc::UnboundedSender<HostEvent> {
    fn emit(&self, event: HostEvent) {
        if self.send(event).is_err() {
            tracing::debug!("host event dropped, receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_requested_wire_shape() {
        let event = HostEvent::SignRequested {
            id: "r1".into(),
            message: "sign me".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"kind": "signRequested", "id": "r1", "message": "sign me"})
        );
    }

    #[test]
    fn conversation_fields_are_camel_case() {
        let event = HostEvent::Conversation {
            client_address: "0xA".into(),
            topic: "/xmtp/0/t1".into(),
            peer_address: "0xB".into(),
            version: ConversationVersion::V2,
            conversation_id: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "conversation");
        assert_eq!(value["clientAddress"], "0xA");
        assert_eq!(value["peerAddress"], "0xB");
        assert!(value["conversationId"].is_null());
    }

    #[test]
    fn closed_channel_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.emit(HostEvent::Authenticated { address: "0xA".into() });
    }
}
