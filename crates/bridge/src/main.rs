use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use messaging_bridge::{BridgeConfig, MemoryNetwork, Network, run};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, ValueEnum)]
enum NetworkBackend {
    Memory,
}

#[derive(Parser)]
struct Args {
    #[clap(long, env = "BRIDGE_HOST", default_value = "127.0.0.1")]
    host: String,
    #[clap(long, env = "BRIDGE_PORT", default_value = "3000")]
    port: u16,
    #[clap(long, env = "BRIDGE_NETWORK", default_value = "memory")]
    network: NetworkBackend,
    /// Give up on a host signing round-trip after this many seconds.
    #[clap(long, env = "BRIDGE_SIGN_TIMEOUT_SECS")]
    sign_timeout_secs: Option<u64>,
    /// Reject identity signatures that do not recover to the account address.
    #[clap(long, env = "BRIDGE_VERIFY_SIGNATURES")]
    verify_signatures: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let network: Arc<dyn Network> = match args.network {
        NetworkBackend::Memory => Arc::new(MemoryNetwork::with_signature_verification(
            args.verify_signatures,
        )),
    };

    let config = BridgeConfig {
        sign_timeout: args.sign_timeout_secs.map(Duration::from_secs),
    };

    tracing::info!(host = %args.host, port = args.port, network = ?args.network, "starting bridge");
    run(args.host, args.port, network, config).await
}
