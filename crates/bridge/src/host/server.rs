use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};

use super::dispatch::dispatch;
use super::events::{EventSink, HostEvent};
use super::protocol::{BridgeMessage, HostRequest, Outcome, try_read_message, write_message};
use crate::bridge::{Bridge, BridgeConfig};
use crate::error::ErrorBody;
use crate::network::Network;

/// Frames queued for a host before events start being dropped.
const OUTGOING_CAPACITY: usize = 1024;

/// Routes bridge events onto a connection's outgoing frame queue. Events are
/// dropped when the host stops reading and the queue is full.
struct ConnectionSink(mpsc::Sender<BridgeMessage>);

impl EventSink for ConnectionSink {
    fn emit(&self, event: HostEvent) {
        match self.0.try_send(BridgeMessage::Event { event }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::warn!("host is not reading, event dropped"),
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("host connection closed, event dropped")
            }
        }
    }
}

/// Accepts host connections until the listener fails. Every connection gets
/// its own [`Bridge`].
pub async fn run(
    host: String,
    port: u16,
    network: Arc<dyn Network>,
    config: BridgeConfig,
) -> Result<()> {
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;
    let local: SocketAddr = listener.local_addr().context("reading local address")?;
    tracing::info!(%local, "listening for host connections");

    loop {
        let (stream, peer) = listener.accept().await.context("accepting host connection")?;
        let network = network.clone();
        let config = config.clone();
        tokio::spawn(async move {
            tracing::info!(%peer, "host connected");
            let (reader, writer) = stream.into_split();
            match serve_connection(reader.compat(), writer.compat_write(), network, config).await {
                Ok(()) => tracing::info!(%peer, "host disconnected"),
                Err(e) => {
                    tracing::warn!(%peer, error = %format!("{e:#}"), "host connection failed")
                }
            }
        });
    }
}

/// Serves one host over an already-established byte stream.
///
/// Requests are handled concurrently, each on its own task, so a
/// `submitSignature` can arrive while `authenticate` is still waiting for it.
/// When the host goes away the bridge is shut down and every request task is
/// aborted: pending signatures fail and every subscription is cancelled.
pub async fn serve_connection<R, W>(
    mut reader: R,
    mut writer: W,
    network: Arc<dyn Network>,
    config: BridgeConfig,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outgoing, mut queue) = mpsc::channel::<BridgeMessage>(OUTGOING_CAPACITY);
    let bridge = Arc::new(Bridge::new(
        network,
        Arc::new(ConnectionSink(outgoing.clone())),
        config,
    ));

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = queue.recv().await {
            write_message(&mut writer, &msg).await?;
        }
        anyhow::Ok(())
    });

    let mut calls = JoinSet::new();
    let result = loop {
        let frame = match try_read_message::<_, serde_json::Value>(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        while calls.try_join_next().is_some() {}

        let request: HostRequest = match serde_json::from_value(frame.clone()) {
            Ok(request) => request,
            Err(e) => {
                let id = frame.get("id").and_then(|id| id.as_u64()).unwrap_or_default();
                tracing::warn!(id, error = %e, "rejecting malformed host request");
                let rejection = BridgeMessage::Response {
                    id,
                    outcome: Outcome::Err(ErrorBody {
                        kind: "invalidRequest".to_string(),
                        message: e.to_string(),
                    }),
                };
                if outgoing.send(rejection).await.is_err() {
                    break Ok(());
                }
                continue;
            }
        };

        let bridge = bridge.clone();
        let outgoing = outgoing.clone();
        calls.spawn(async move {
            let HostRequest { id, call } = request;
            let method = call.method();
            tracing::debug!(id, method, "host call");
            let result = dispatch(&bridge, call).await;
            if let Err(e) = &result {
                tracing::debug!(id, method, error = %e, "host call failed");
            }
            let response = BridgeMessage::Response {
                id,
                outcome: Outcome::from(result),
            };
            if outgoing.send(response).await.is_err() {
                tracing::debug!(id, method, "host connection closed, response dropped");
            }
        });
    };

    bridge.shutdown();
    calls.shutdown().await;
    drop(outgoing);
    drop(bridge);
    // Pumps stop on their own once cancelled; the writer drains whatever was
    // queued and stops when the last sender is gone or the host stops reading.
    drop(writer_task);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::MessageContent;

    fn message_event(id: &str) -> HostEvent {
        HostEvent::Message {
            client_address: "0xA".into(),
            id: id.into(),
            content: MessageContent::Decoded {
                content_type: "xmtp.org/text:1.0".into(),
                value: serde_json::json!("hi"),
            },
            sender_address: "0xB".into(),
            sent_at_ms: 1,
        }
    }

    #[tokio::test]
    async fn full_queue_drops_events_without_blocking() {
        let (tx, mut rx) = mpsc::channel(2);
        let sink = ConnectionSink(tx);
        for i in 0..5 {
            sink.emit(message_event(&i.to_string()));
        }

        let mut ids = Vec::new();
        while let Ok(BridgeMessage::Event {
            event: HostEvent::Message { id, .. },
        }) = rx.try_recv()
        {
            ids.push(id);
        }
        assert_eq!(ids, vec!["0".to_string(), "1".to_string()]);

        sink.emit(message_event("5"));
        assert!(matches!(rx.try_recv(), Ok(BridgeMessage::Event { .. })));
    }

    #[tokio::test]
    async fn closed_queue_is_ignored() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        ConnectionSink(tx).emit(message_event("late"));
    }
}
