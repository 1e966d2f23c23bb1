//! Discovery responder
//!
//! UDP listener answering broadcast queries for locally offered
//! services. The reply is the rendezvous port in decimal ASCII; the
//! querying side combines it with this datagram's source address to
//! form the destination endpoint.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use lanlink_proto::{ServerConfig, DISCOVERY_PORT, RENDEZVOUS_PORT};

use crate::ServerError;

/// Responder configuration
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub bind_addr: SocketAddr,
    /// Rendezvous port advertised in replies.
    pub advertised_port: u16,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)),
            advertised_port: RENDEZVOUS_PORT,
        }
    }
}

pub struct DiscoveryResponder {
    config: ResponderConfig,
    service_names: Vec<String>,
    local_addr: Option<IpAddr>,
}

impl DiscoveryResponder {
    pub fn new(config: ResponderConfig, server: &ServerConfig) -> Self {
        Self {
            config,
            service_names: server
                .offered_services
                .iter()
                .map(|s| s.service_name.clone())
                .collect(),
            local_addr: None,
        }
    }

    /// Override the address used for the self-broadcast check. When
    /// not set it is detected once when the responder starts.
    pub fn with_local_addr(mut self, addr: IpAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Answer discovery queries until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let socket = UdpSocket::bind(self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr,
                source,
            })?;
        info!(addr = %self.config.bind_addr, "listening for discovery requests");

        // Our own broadcasts arrive on this socket too; remember who
        // we are so they can be skipped. Detection can fail on hosts
        // without a default route, which just disables the check.
        let own_addr = self.local_addr.or_else(detect_local_addr);

        let mut buf = [0u8; 512];
        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => {
                    debug!("discovery responder shutting down");
                    break;
                }
                received = socket.recv_from(&mut buf) => received,
            };

            let (n, src) = match received {
                Ok(received) => received,
                Err(e) => {
                    error!(error = %e, "failed to receive discovery request");
                    continue;
                }
            };

            // Skip just this datagram, never the whole receive loop.
            if Some(src.ip()) == own_addr {
                debug!(%src, "ignoring broadcast from self");
                continue;
            }

            let Ok(service_name) = std::str::from_utf8(&buf[..n]) else {
                warn!(%src, "discovery request is not valid UTF-8");
                continue;
            };
            debug!(%service_name, %src, "received discovery request");

            if self.service_names.iter().any(|s| s == service_name) {
                let reply = self.config.advertised_port.to_string();
                if let Err(e) = socket.send_to(reply.as_bytes(), src).await {
                    error!(%src, error = %e, "failed to send discovery reply");
                } else {
                    debug!(%service_name, %src, port = %reply, "answered discovery request");
                }
            } else {
                warn!(%service_name, "no matching service offered");
            }
        }

        Ok(())
    }
}

/// Best-effort detection of this host's outbound address. A connected
/// UDP socket never sends anything; it only fixes the local address.
fn detect_local_addr() -> Option<IpAddr> {
    let socket = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 53)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
