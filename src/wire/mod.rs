//! Wire side of the bridge: message codec, link handles and TCP transport.

pub(crate) mod events;
pub mod link;
pub mod message;
pub mod transport;

pub use link::{LinkHandle, LinkId, LinkStats};
pub use message::{EventId, NodeId, TargetDescription, WireMessage};
pub use transport::{accept_links, connect, connect_to_targets, parse_target, start_listener};
