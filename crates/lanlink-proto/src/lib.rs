//! LAN Tunnel Protocol Definitions
//!
//! This crate defines the wire protocol, endpoint resolution, and
//! configuration snapshot types shared by the client and server halves
//! of the tunnel.

pub mod config;
pub mod endpoint;
pub mod framing;

pub use config::{
    ClientConfig, Config, ConnectionSpec, NeededService, OfferedService, ServerConfig, ServiceType,
};
pub use endpoint::{EndpointError, ServiceEndpoint};
pub use framing::{decode_tag, encode_tag, read_tag, write_tag, FrameError};

/// UDP port that discovery queries are broadcast to.
pub const DISCOVERY_PORT: u16 = 7608;

/// TCP rendezvous port accepting all multiplexed sessions on the server side.
pub const RENDEZVOUS_PORT: u16 = 51000;

/// Tag carried by a heartbeat probe.
pub const HEARTBEAT_TAG: &str = "ping";

/// Heartbeat response, written raw with no length prefix.
pub const HEARTBEAT_REPLY: &[u8; 4] = b"pong";

/// Upper bound accepted for a tag frame's declared length.
pub const MAX_TAG_LEN: usize = 1024 * 1024;
