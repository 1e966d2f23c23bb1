//! Service dispatcher
//!
//! Accepts every multiplexed session on one rendezvous port and routes
//! it by the tag frame the client sends first. A `"ping"` tag is the
//! heartbeat probe and is answered in place, any number of times per
//! connection; a service tag hands the rest of the connection over to
//! raw forwarding toward the offered destination.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use lanlink_proto::{
    framing, ServerConfig, ServiceEndpoint, ServiceType, HEARTBEAT_REPLY, HEARTBEAT_TAG,
    RENDEZVOUS_PORT,
};

use crate::{ServerError, FORWARD_BUF_SIZE};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub bind_addr: SocketAddr,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, RENDEZVOUS_PORT)),
        }
    }
}

/// An offered service with its destination already resolved.
#[derive(Debug, Clone)]
struct ResolvedService {
    service_name: String,
    destination: ServiceEndpoint,
    service_type: ServiceType,
}

pub struct ServiceDispatcher {
    config: DispatcherConfig,
    services: Arc<Vec<ResolvedService>>,
}

impl ServiceDispatcher {
    /// Build a dispatcher from the offered-service table, resolving
    /// every destination up front so bad configuration fails startup.
    pub fn new(config: DispatcherConfig, server: &ServerConfig) -> Result<Self, ServerError> {
        let mut services = Vec::with_capacity(server.offered_services.len());
        for offered in &server.offered_services {
            let destination = offered.destination.parse::<ServiceEndpoint>().map_err(
                |source| ServerError::InvalidDestination {
                    service: offered.service_name.clone(),
                    source,
                },
            )?;
            services.push(ResolvedService {
                service_name: offered.service_name.clone(),
                destination,
                service_type: offered.service_type,
            });
        }

        Ok(Self {
            config,
            services: Arc::new(services),
        })
    }

    /// Accept and dispatch sessions until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr,
                source,
            })?;
        info!(addr = %self.config.bind_addr, "dispatcher listening for client connections");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("dispatcher shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted a client connection");
                        tokio::spawn(handle_session(stream, self.services.clone(), shutdown.clone()));
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_session(
    mut stream: TcpStream,
    services: Arc<Vec<ResolvedService>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => {
                debug!("session closing on shutdown");
                return;
            }
            frame = framing::read_tag(&mut stream) => frame,
        };

        let tag = match frame {
            Ok(Some(tag)) => tag,
            Ok(None) => {
                debug!("client disconnected");
                return;
            }
            Err(e) => {
                warn!(error = %e, "invalid tag frame, closing session");
                return;
            }
        };
        debug!(%tag, "received tag");

        if tag == HEARTBEAT_TAG {
            // The reply is raw, unframed. Peers depend on that.
            if let Err(e) = write_heartbeat_reply(&mut stream).await {
                debug!(error = %e, "failed to answer heartbeat");
                return;
            }
            continue;
        }

        let Some(service) = services
            .iter()
            .find(|s| s.service_name == tag && s.service_type == ServiceType::Direct)
        else {
            warn!(%tag, "no matching service, awaiting next tag");
            continue;
        };

        // The data-plane tag consumes the rest of the connection.
        forward_to_destination(stream, service.destination).await;
        return;
    }
}

async fn write_heartbeat_reply(stream: &mut TcpStream) -> std::io::Result<()> {
    stream.write_all(HEARTBEAT_REPLY).await?;
    stream.flush().await
}

async fn forward_to_destination(client: TcpStream, destination: ServiceEndpoint) {
    let local = match TcpStream::connect(destination.socket_addr()).await {
        Ok(local) => local,
        Err(e) => {
            error!(%destination, error = %e, "failed to connect to offered destination");
            return;
        }
    };
    debug!(%destination, "forwarding session to offered destination");

    lanlink_forward::relay(client, local, FORWARD_BUF_SIZE).await;
    debug!(%destination, "session closed");
}
