pub mod bridge;
pub mod conversation;
pub mod encoding;
pub mod error;
pub mod host;
pub mod network;
pub mod session;
pub mod signing;
pub mod subscription;

pub use bridge::{Bridge, BridgeConfig};
pub use error::{BridgeError, ErrorBody};
pub use host::{EventSink, HostEvent, run, serve_connection};
pub use network::{Environment, MemoryNetwork, Network, NetworkClient};
pub use signing::{ExternalSigner, LocalKeySigner, SignatureValue, SigningError};
