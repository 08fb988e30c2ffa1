use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::io::AsyncWrite;
use messaging_bridge::host::{
    BridgeMessage, HostCall, HostRequest, Outcome, try_read_message, write_message,
};
use messaging_bridge::{Environment, HostEvent, LocalKeySigner};
use tokio::net::TcpStream;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    #[clap(long, env = "BRIDGE_HOST", default_value = "127.0.0.1")]
    host: String,
    #[clap(long, env = "BRIDGE_PORT", default_value = "3000")]
    port: u16,
    /// Derives the account key this client signs with.
    #[clap(long, env = "BRIDGE_CLIENT_SEED", default_value = "bridge-client")]
    seed: String,
    #[clap(long, env = "BRIDGE_ENVIRONMENT", default_value = "dev")]
    environment: Environment,
}

struct Requests<W> {
    writer: W,
    next_id: u64,
}

impl<W: AsyncWrite + Unpin> Requests<W> {
    async fn send(&mut self, call: HostCall) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        tracing::debug!(id, method = call.method(), "sending");
        write_message(&mut self.writer, &HostRequest { id, call }).await?;
        Ok(id)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let signer = LocalKeySigner::from_seed(&args.seed).context("deriving account key")?;
    let address = signer.address().to_string();

    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("connecting to {}:{}", args.host, args.port))?;
    let (reader, writer) = stream.into_split();
    let mut reader = reader.compat();
    let mut requests = Requests {
        writer: writer.compat_write(),
        next_id: 1,
    };

    tracing::info!(%address, environment = %args.environment, "authenticating");
    let auth_id = requests
        .send(HostCall::Authenticate {
            address: address.clone(),
            environment: args.environment,
        })
        .await?;
    let mut list_id = None;

    while let Some(msg) = try_read_message::<_, BridgeMessage>(&mut reader).await? {
        match msg {
            BridgeMessage::Event {
                event: HostEvent::SignRequested { id, message },
            } => {
                tracing::info!(%id, "signing for bridge");
                let signature = signer.sign_personal_message(&message)?;
                requests
                    .send(HostCall::SubmitSignature {
                        id,
                        signature: signature.to_base64(),
                    })
                    .await?;
            }
            BridgeMessage::Event {
                event: HostEvent::Authenticated { address: authenticated },
            } if authenticated == address => {
                tracing::info!(%address, "authenticated, subscribing");
                requests
                    .send(HostCall::SubscribeToConversations {
                        address: address.clone(),
                    })
                    .await?;
                requests
                    .send(HostCall::SubscribeToAllMessages {
                        address: address.clone(),
                    })
                    .await?;
                list_id = Some(
                    requests
                        .send(HostCall::ListConversations {
                            address: address.clone(),
                        })
                        .await?,
                );
            }
            BridgeMessage::Event { event } => {
                tracing::info!(event = %serde_json::to_string(&event)?, "event");
            }
            BridgeMessage::Response {
                id,
                outcome: Outcome::Err(error),
            } => {
                if id == auth_id {
                    bail!("authentication failed: {} ({})", error.message, error.kind);
                }
                tracing::warn!(id, kind = %error.kind, message = %error.message, "request failed");
            }
            BridgeMessage::Response {
                id,
                outcome: Outcome::Ok(value),
            } if Some(id) == list_id => {
                let count = value.as_array().map(Vec::len).unwrap_or_default();
                tracing::info!(count, "conversations listed");
            }
            BridgeMessage::Response { id, .. } => {
                tracing::debug!(id, "request succeeded");
            }
        }
    }

    tracing::info!("bridge closed the connection");
    Ok(())
}
