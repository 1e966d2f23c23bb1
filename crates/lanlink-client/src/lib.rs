//! Tunnel Client
//!
//! Owns the local listening sockets and the three connection variants:
//! direct proxy, multiplexed proxy, and discovery-driven proxy with
//! destination health monitoring.

mod connection;
mod direct;
mod discover;
mod manager;
mod monitor;
mod mux;
mod registry;

pub use connection::ClientConnection;
pub use direct::DirectConnection;
pub use discover::DiscoverConnection;
pub use manager::ConnectionManager;
pub use monitor::{DestinationMonitor, MonitorSubscription};
pub use mux::MultiplexingConnection;
pub use registry::MonitorRegistry;

use lanlink_proto::EndpointError;
use thiserror::Error;

/// Read buffer size for client-side forwarding.
pub(crate) const FORWARD_BUF_SIZE: usize = 8 * 1024;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("a listener on port {0} is already registered")]
    PortInUse(u16),

    #[error("failed to bind local port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid destination for service '{service}': {source}")]
    InvalidDestination {
        service: String,
        #[source]
        source: EndpointError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
