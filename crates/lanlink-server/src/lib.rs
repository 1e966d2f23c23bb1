//! Tunnel Server
//!
//! The rendezvous-port dispatcher that routes multiplexed sessions by
//! their tag, and the UDP responder that answers broadcast discovery
//! queries for locally offered services.

mod dispatcher;
mod responder;

pub use dispatcher::{DispatcherConfig, ServiceDispatcher};
pub use responder::{DiscoveryResponder, ResponderConfig};

use std::net::SocketAddr;
use thiserror::Error;

/// Read buffer size for server-side forwarding.
pub(crate) const FORWARD_BUF_SIZE: usize = 4 * 1024;

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid destination for offered service '{service}': {source}")]
    InvalidDestination {
        service: String,
        #[source]
        source: lanlink_proto::EndpointError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
