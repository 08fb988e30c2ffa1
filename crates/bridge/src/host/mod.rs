//! The host side of the bridge: wire frames, events, and the connection loop.

mod dispatch;
mod events;
mod protocol;
mod server;

pub use dispatch::dispatch;
pub use events::{EventSink, HostEvent};
pub use protocol::{
    BridgeMessage, HostCall, HostRequest, Outcome, read_message, try_read_message, write_message,
};
pub use server::{run, serve_connection};
