//! Destination endpoint resolution

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

/// Endpoint parsing errors
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid address in '{0}'")]
    InvalidAddress(String),

    #[error("invalid port in '{0}'")]
    InvalidPort(String),
}

/// A resolved destination that data or heartbeats are sent to.
///
/// Value-equal and hashable so it can key the monitor registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceEndpoint {
    pub addr: IpAddr,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl FromStr for ServiceEndpoint {
    type Err = EndpointError;

    /// Parse a `host[:port]` string.
    ///
    /// A bare address gets port 0; a bare `:port` resolves to loopback.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // A bare IP address, including IPv6 forms like `::1`.
        if let Ok(addr) = value.parse::<IpAddr>() {
            return Ok(Self::new(addr, 0));
        }

        if let Some(port) = value.strip_prefix(':') {
            let port = port
                .parse::<u16>()
                .map_err(|_| EndpointError::InvalidPort(value.to_string()))?;
            return Ok(Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
        }

        let (addr, port) = value
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::InvalidAddress(value.to_string()))?;
        let addr = addr
            .parse::<IpAddr>()
            .map_err(|_| EndpointError::InvalidAddress(value.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointError::InvalidPort(value.to_string()))?;

        Ok(Self::new(addr, port))
    }
}
