use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;

use super::registry::Subscription;
use crate::encoding::{CodecRegistry, MessageView};
use crate::error::BridgeError;
use crate::host::{EventSink, HostEvent};
use crate::network::{Conversation, Message, NetworkError};

/// Registry key of the per-client conversation stream.
pub const CONVERSATIONS_KEY: &str = "conversations";
/// Registry key of the per-client all-messages stream.
pub const ALL_MESSAGES_KEY: &str = "messages";

/// How a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    Cancelled,
    Completed,
    Failed(String),
}

/// Forwards every item of `stream` to `emit` until the stream ends, fails,
/// or `subscription` is cancelled. Cancellation wins over a ready item, and
/// each emission runs under the subscription's lock, so nothing is emitted
/// once `cancel` has returned.
pub async fn pump<T>(
    key: &str,
    mut stream: BoxStream<'static, Result<T, NetworkError>>,
    subscription: Subscription,
    mut emit: impl FnMut(T),
) -> PumpExit {
    let exit = loop {
        let next = tokio::select! {
            biased;
            _ = subscription.cancelled() => break PumpExit::Cancelled,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(item)) => {
                if !subscription.emit_while_active(|| emit(item)) {
                    break PumpExit::Cancelled;
                }
            }
            Some(Err(e)) => break PumpExit::Failed(e.to_string()),
            None => break PumpExit::Completed,
        }
    };

    match &exit {
        PumpExit::Cancelled => tracing::debug!(key, "subscription cancelled"),
        PumpExit::Completed => tracing::info!(key, "subscription stream completed"),
        PumpExit::Failed(reason) => {
            let failure = BridgeError::StreamFailure {
                key: key.to_string(),
                reason: reason.clone(),
            };
            tracing::warn!(key, error = %failure, "subscription stream failed");
        }
    }
    exit
}

pub async fn pump_conversations(
    client_address: String,
    stream: BoxStream<'static, Result<Conversation, NetworkError>>,
    events: Arc<dyn EventSink>,
    subscription: Subscription,
) -> PumpExit {
    let key = format!("{client_address}/{CONVERSATIONS_KEY}");
    pump(&key, stream, subscription, |conversation| {
        events.emit(HostEvent::Conversation {
            client_address: client_address.clone(),
            conversation_id: conversation.conversation_id().map(str::to_string),
            topic: conversation.topic,
            peer_address: conversation.peer_address,
            version: conversation.version,
        });
    })
    .await
}

pub async fn pump_all_messages(
    client_address: String,
    stream: BoxStream<'static, Result<Message, NetworkError>>,
    events: Arc<dyn EventSink>,
    codecs: Arc<CodecRegistry>,
    subscription: Subscription,
) -> PumpExit {
    let key = format!("{client_address}/{ALL_MESSAGES_KEY}");
    pump(&key, stream, subscription, |message| {
        let content = codecs.decode(&message.content);
        if !content.is_decoded() {
            tracing::debug!(message_id = %message.id, "delivering message with fallback content");
        }
        events.emit(HostEvent::Message {
            client_address: client_address.clone(),
            id: message.id,
            content,
            sender_address: message.sender_address,
            sent_at_ms: message.sent_at_ms,
        });
    })
    .await
}

pub async fn pump_conversation_messages(
    client_address: String,
    conversation: Conversation,
    stream: BoxStream<'static, Result<Message, NetworkError>>,
    events: Arc<dyn EventSink>,
    codecs: Arc<CodecRegistry>,
    subscription: Subscription,
) -> PumpExit {
    let key = format!("{client_address}:{}", conversation.topic);
    let conversation_id = conversation.conversation_id().map(str::to_string);
    pump(&key, stream, subscription, |message| {
        events.emit(HostEvent::ConversationMessage {
            client_address: client_address.clone(),
            topic: conversation.topic.clone(),
            conversation_id: conversation_id.clone(),
            message: MessageView::decode(message, &codecs),
        });
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::ContentCodec;
    use futures::stream;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn emits_until_completion() {
        let items = stream::iter(vec![Ok(1u32), Ok(2), Ok(3)]).boxed();
        let mut seen = Vec::new();
        let exit = pump("test", items, Subscription::new(), |i| seen.push(i)).await;
        assert_eq!(exit, PumpExit::Completed);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stops_at_first_error() {
        let items = stream::iter(vec![
            Ok(1u32),
            Err(NetworkError::Stream("boom".into())),
            Ok(3),
        ])
        .boxed();
        let mut seen = Vec::new();
        let exit = pump("test", items, Subscription::new(), |i| seen.push(i)).await;
        assert_eq!(exit, PumpExit::Failed("stream closed: boom".into()));
        assert_eq!(seen, vec![1]);
    }

    #[tokio::test]
    async fn cancellation_beats_ready_items() {
        let subscription = Subscription::new();
        subscription.cancel();
        let items = stream::iter(vec![Ok(1u32)]).boxed();
        let mut seen = Vec::new();
        let exit = pump("test", items, subscription, |i| seen.push(i)).await;
        assert_eq!(exit, PumpExit::Cancelled);
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn conversation_events_carry_context_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conversation = Conversation {
            topic: "/t/1".into(),
            peer_address: "0xB".into(),
            version: crate::network::ConversationVersion::V1,
            created_at_ms: 1,
            context: Some(crate::network::ConversationContext {
                conversation_id: "ctx".into(),
                metadata: Default::default(),
            }),
        };
        let items = stream::iter(vec![Ok(conversation)]).boxed();
        pump_conversations("0xA".into(), items, Arc::new(tx), Subscription::new()).await;

        match rx.recv().await.unwrap() {
            HostEvent::Conversation { client_address, topic, conversation_id, .. } => {
                assert_eq!(client_address, "0xA");
                assert_eq!(topic, "/t/1");
                assert_eq!(conversation_id.as_deref(), Some("ctx"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_message_degrades_without_stopping() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let good = crate::encoding::TextCodec
            .encode(&serde_json::json!("hello"))
            .unwrap()
            .to_bytes()
            .unwrap();
        let message = |id: &str, content: Vec<u8>| Message {
            id: id.into(),
            topic: "/t/1".into(),
            sender_address: "0xB".into(),
            sent_at_ms: 9,
            content,
        };
        let items = stream::iter(vec![
            Ok(message("bad", b"???".to_vec())),
            Ok(message("good", good)),
        ])
        .boxed();
        let exit = pump_all_messages(
            "0xA".into(),
            items,
            Arc::new(tx),
            Arc::new(CodecRegistry::default()),
            Subscription::new(),
        )
        .await;
        assert_eq!(exit, PumpExit::Completed);

        let mut decoded = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let HostEvent::Message { id, content, .. } = event {
                decoded.push((id, content.is_decoded()));
            }
        }
        assert_eq!(decoded, vec![("bad".to_string(), false), ("good".to_string(), true)]);
    }
}
