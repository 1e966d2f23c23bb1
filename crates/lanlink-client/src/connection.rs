//! Connection variant selection
//!
//! The closed set of connection variants behind one start/stop
//! contract. Which variant a spec gets is a pure function of its
//! fields: no destination means discovery, a destination proxied
//! through the remote dispatcher means multiplexing, and a destination
//! reached directly means direct.

use std::sync::Arc;

use lanlink_proto::ConnectionSpec;

use crate::registry::MonitorRegistry;
use crate::{ClientError, DirectConnection, DiscoverConnection, MultiplexingConnection};

pub enum ClientConnection {
    Direct(DirectConnection),
    Multiplexing(MultiplexingConnection),
    Discover(DiscoverConnection),
}

impl ClientConnection {
    pub fn from_spec(spec: ConnectionSpec, registry: Arc<MonitorRegistry>) -> Self {
        match (spec.destination, spec.direct) {
            (None, _) => Self::Discover(DiscoverConnection::new(
                spec.local_port,
                spec.service_name,
                registry,
            )),
            (Some(destination), false) => Self::Multiplexing(MultiplexingConnection::new(
                spec.local_port,
                spec.service_name,
                destination,
            )),
            (Some(destination), true) => Self::Direct(DirectConnection::new(
                spec.local_port,
                spec.service_name,
                destination,
            )),
        }
    }

    pub fn local_port(&self) -> u16 {
        match self {
            Self::Direct(c) => c.local_port(),
            Self::Multiplexing(c) => c.local_port(),
            Self::Discover(c) => c.local_port(),
        }
    }

    /// Begin background work. Idempotent and non-blocking past bind.
    pub async fn start_listening(&self) -> Result<(), ClientError> {
        match self {
            Self::Direct(c) => c.start_listening().await,
            Self::Multiplexing(c) => c.start_listening().await,
            Self::Discover(c) => c.start_listening().await,
        }
    }

    /// Release the listening socket and any owned sub-connections.
    pub async fn stop(&self) {
        match self {
            Self::Direct(c) => c.stop().await,
            Self::Multiplexing(c) => c.stop().await,
            Self::Discover(c) => c.stop().await,
        }
    }
}
