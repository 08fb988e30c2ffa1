use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::io::AsyncWriteExt;
use serde_json::{Value, json};
use tokio::io::{DuplexStream, duplex};
use tokio::task::JoinHandle;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};

use messaging_bridge::encoding::{ContentCodec, TextCodec};
use messaging_bridge::host::{
    BridgeMessage, HostCall, HostRequest, Outcome, read_message, try_read_message, write_message,
};
use messaging_bridge::{
    BridgeConfig, Environment, HostEvent, LocalKeySigner, MemoryNetwork, serve_connection,
};

struct Host {
    io: Compat<DuplexStream>,
    next_id: u64,
    events: Vec<HostEvent>,
    responses: HashMap<u64, Outcome>,
    server: JoinHandle<anyhow::Result<()>>,
}

fn connect(network: MemoryNetwork) -> Host {
    let (host_io, bridge_io) = duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(bridge_io);
    let server = tokio::spawn(serve_connection(
        reader.compat(),
        writer.compat_write(),
        Arc::new(network),
        BridgeConfig::default(),
    ));
    Host {
        io: host_io.compat(),
        next_id: 1,
        events: Vec::new(),
        responses: HashMap::new(),
        server,
    }
}

impl Host {
    async fn send(&mut self, call: HostCall) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        write_message(&mut self.io, &HostRequest { id, call }).await.unwrap();
        id
    }

    /// Reads frames until the response for `id`, keeping everything else aside.
    async fn response(&mut self, id: u64) -> Outcome {
        loop {
            if let Some(outcome) = self.responses.remove(&id) {
                return outcome;
            }
            match read_message::<_, BridgeMessage>(&mut self.io).await.unwrap() {
                BridgeMessage::Response { id, outcome } => {
                    self.responses.insert(id, outcome);
                }
                BridgeMessage::Event { event } => self.events.push(event),
            }
        }
    }

    async fn call(&mut self, call: HostCall) -> Outcome {
        let id = self.send(call).await;
        self.response(id).await
    }

    async fn next_event(&mut self) -> HostEvent {
        if !self.events.is_empty() {
            return self.events.remove(0);
        }
        loop {
            match read_message::<_, BridgeMessage>(&mut self.io).await.unwrap() {
                BridgeMessage::Event { event } => return event,
                BridgeMessage::Response { id, outcome } => {
                    self.responses.insert(id, outcome);
                }
            }
        }
    }

    async fn authenticate(&mut self, signer: &LocalKeySigner) -> (Outcome, Outcome) {
        let auth = self
            .send(HostCall::Authenticate {
                address: signer.address().to_string(),
                environment: Environment::Local,
            })
            .await;
        let HostEvent::SignRequested { id, message } = self.next_event().await else {
            panic!("expected a sign request");
        };
        let signature = signer.sign_personal_message(&message).unwrap();
        let submit = self
            .send(HostCall::SubmitSignature {
                id,
                signature: signature.to_base64(),
            })
            .await;
        let submitted = self.response(submit).await;
        let authenticated = self.response(auth).await;
        (authenticated, submitted)
    }
}

fn error_kind(outcome: &Outcome) -> &str {
    match outcome {
        Outcome::Err(body) => &body.kind,
        Outcome::Ok(value) => panic!("expected an error, got {value}"),
    }
}

#[tokio::test]
async fn authenticates_with_verified_host_signature() {
    let mut host = connect(MemoryNetwork::with_signature_verification(true));
    let signer = LocalKeySigner::from_seed("alice").unwrap();

    let (authenticated, submitted) = host.authenticate(&signer).await;
    assert_eq!(authenticated, Outcome::Ok(Value::Null));
    assert_eq!(submitted, Outcome::Ok(Value::Null));
    assert_eq!(
        host.next_event().await,
        HostEvent::Authenticated {
            address: signer.address().to_string()
        }
    );

    let bundle = host
        .call(HostCall::ExportKeyBundle {
            address: signer.address().to_string(),
        })
        .await;
    let Outcome::Ok(Value::String(bundle)) = bundle else {
        panic!("expected a key bundle");
    };
    assert!(bundle.contains(signer.address()));
}

#[tokio::test]
async fn rejects_signature_from_another_key() {
    let mut host = connect(MemoryNetwork::with_signature_verification(true));
    let claimed = LocalKeySigner::from_seed("alice").unwrap();
    let actual = LocalKeySigner::from_seed("mallory").unwrap();

    let auth = host
        .send(HostCall::Authenticate {
            address: claimed.address().to_string(),
            environment: Environment::Local,
        })
        .await;
    let HostEvent::SignRequested { id, message } = host.next_event().await else {
        panic!("expected a sign request");
    };
    let signature = actual.sign_personal_message(&message).unwrap();
    host.send(HostCall::SubmitSignature {
        id,
        signature: signature.to_base64(),
    })
    .await;

    let outcome = host.response(auth).await;
    assert_eq!(error_kind(&outcome), "transportFailure");
    let listed = host
        .call(HostCall::ListConversations {
            address: claimed.address().to_string(),
        })
        .await;
    assert_eq!(error_kind(&listed), "noClient");
}

#[tokio::test]
async fn malformed_request_gets_invalid_request() {
    let mut host = connect(MemoryNetwork::new());
    write_message(&mut host.io, &json!({"id": 9, "call": {"method": "fly", "params": {}}}))
        .await
        .unwrap();
    let outcome = host.response(9).await;
    assert_eq!(error_kind(&outcome), "invalidRequest");

    // The connection keeps serving after a bad frame.
    let outcome = host
        .call(HostCall::CanMessage {
            address: "0xA".into(),
            peer_address: "0xB".into(),
        })
        .await;
    assert_eq!(error_kind(&outcome), "noClient");
}

#[tokio::test]
async fn random_clients_converse_over_one_connection() {
    let mut host = connect(MemoryNetwork::new());
    let Outcome::Ok(Value::String(alice)) = host
        .call(HostCall::CreateRandom {
            environment: Environment::Dev,
        })
        .await
    else {
        panic!("expected an address");
    };
    let Outcome::Ok(Value::String(bob)) = host
        .call(HostCall::CreateRandom {
            environment: Environment::Dev,
        })
        .await
    else {
        panic!("expected an address");
    };

    let Outcome::Ok(conversation) = host
        .call(HostCall::CreateConversation {
            address: alice.clone(),
            peer_address: bob.clone(),
            conversation_id: None,
            metadata: Default::default(),
        })
        .await
    else {
        panic!("expected a conversation");
    };
    let topic = conversation["topic"].as_str().unwrap().to_string();

    let outcome = host
        .call(HostCall::SubscribeToMessages {
            address: bob.clone(),
            topic: topic.clone(),
            conversation_id: None,
        })
        .await;
    assert_eq!(outcome, Outcome::Ok(Value::Null));

    let encoded = TextCodec.encode(&json!("hi")).unwrap();
    let content = STANDARD.encode(encoded.to_bytes().unwrap());
    let sent = host
        .call(HostCall::SendMessage {
            address: alice.clone(),
            topic: topic.clone(),
            conversation_id: None,
            content,
        })
        .await;
    assert!(matches!(sent, Outcome::Ok(Value::String(_))));

    match host.next_event().await {
        HostEvent::ConversationMessage {
            client_address,
            message,
            ..
        } => {
            assert_eq!(client_address, bob);
            assert_eq!(message.sender_address, alice);
            assert!(message.content.is_decoded());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn host_disconnect_ends_connection() {
    let mut host = connect(MemoryNetwork::new());
    host.send(HostCall::Authenticate {
        address: "0xA".into(),
        environment: Environment::Dev,
    })
    .await;
    let HostEvent::SignRequested { .. } = host.next_event().await else {
        panic!("expected a sign request");
    };

    host.io.close().await.unwrap();
    drop(host.io);
    host.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn disconnect_with_queued_authenticate_closes_connection() {
    let mut host = connect(MemoryNetwork::new());
    host.send(HostCall::Authenticate {
        address: "0xA".into(),
        environment: Environment::Dev,
    })
    .await;
    host.io.close().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), &mut host.server)
        .await
        .expect("connection task never finished")
        .unwrap()
        .unwrap();

    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while try_read_message::<_, BridgeMessage>(&mut host.io)
            .await
            .unwrap()
            .is_some()
        {}
    })
    .await;
    assert!(drained.is_ok(), "host side never reached end of stream");
}
