use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use super::protocol::{HostCall, Outcome};
use crate::bridge::Bridge;
use crate::error::{BridgeError, ErrorBody};
use crate::network::Pagination;

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, BridgeError> {
    serde_json::to_value(value)
        .map_err(|e| BridgeError::InvalidRequest(format!("unserializable result: {e}")))
}

/// Runs one host call against `bridge` and shapes its result for the wire.
pub async fn dispatch(bridge: &Bridge, call: HostCall) -> Result<Value, BridgeError> {
    match call {
        HostCall::Authenticate { address, environment } => {
            bridge.authenticate(&address, environment).await?;
            Ok(Value::Null)
        }
        HostCall::SubmitSignature { id, signature } => {
            bridge.submit_signature(&id, &signature);
            Ok(Value::Null)
        }
        HostCall::CreateRandom { environment } => {
            to_value(bridge.create_random(environment).await?)
        }
        HostCall::CreateFromKeyBundle { key_bundle, environment } => {
            to_value(bridge.create_from_key_bundle(&key_bundle, environment).await?)
        }
        HostCall::ExportKeyBundle { address } => {
            to_value(bridge.export_key_bundle(&address).await?)
        }
        HostCall::ExportConversationTopicData { address, topic } => {
            to_value(bridge.export_conversation_topic_data(&address, &topic).await?)
        }
        HostCall::ImportConversationTopicData { address, topic_data } => {
            to_value(bridge.import_conversation_topic_data(&address, &topic_data).await?)
        }
        HostCall::CanMessage {
            address,
            peer_address,
        } => to_value(bridge.can_message(&address, &peer_address).await?),
        HostCall::ListConversations { address } => {
            to_value(bridge.list_conversations(&address).await?)
        }
        HostCall::LoadMessages {
            address,
            topics,
            conversation_ids,
            limit,
            before,
            after,
        } => {
            let pagination = Pagination {
                limit,
                before_ms: before,
                after_ms: after,
            };
            to_value(bridge.load_messages(&address, &topics, &conversation_ids, pagination).await?)
        }
        HostCall::CreateConversation {
            address,
            peer_address,
            conversation_id,
            metadata,
        } => to_value(
            bridge
                .create_conversation(&address, &peer_address, conversation_id, metadata)
                .await?,
        ),
        HostCall::SendMessage {
            address,
            topic,
            conversation_id,
            content,
        } => {
            let content = STANDARD
                .decode(content.trim())
                .map_err(|e| BridgeError::InvalidRequest(format!("content is not base64: {e}")))?;
            to_value(
                bridge
                    .send(&address, &topic, conversation_id.as_deref(), content)
                    .await?,
            )
        }
        HostCall::SubscribeToConversations { address } => {
            bridge.subscribe_to_conversations(&address).await?;
            Ok(Value::Null)
        }
        HostCall::SubscribeToAllMessages { address } => {
            bridge.subscribe_to_all_messages(&address).await?;
            Ok(Value::Null)
        }
        HostCall::SubscribeToMessages {
            address,
            topic,
            conversation_id,
        } => {
            bridge
                .subscribe_to_messages(&address, &topic, conversation_id.as_deref())
                .await?;
            Ok(Value::Null)
        }
        HostCall::UnsubscribeFromMessages {
            address,
            topic,
            conversation_id,
        } => {
            bridge
                .unsubscribe_from_messages(&address, &topic, conversation_id.as_deref())
                .await?;
            Ok(Value::Null)
        }
        HostCall::DecodeMessage {
            address,
            topic,
            envelope,
            conversation_id,
        } => to_value(
            bridge
                .decode_message(&address, &topic, &envelope, conversation_id.as_deref())
                .await?,
        ),
        HostCall::Logout { address } => to_value(bridge.logout(&address)),
    }
}

impl From<Result<Value, BridgeError>> for Outcome {
    fn from(result: Result<Value, BridgeError>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(error) => Outcome::Err(ErrorBody::from(&error)),
        }
    }
}
