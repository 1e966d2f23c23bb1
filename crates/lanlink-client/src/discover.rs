//! Discovery-driven proxy connection
//!
//! Has no fixed destination. Broadcasts the service name over UDP,
//! resolves the destination from the reply, then runs an internal
//! multiplexing handle against it while subscribed to the destination's
//! health monitor. An unreachable notification tears the tunnel down
//! and restarts discovery.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use lanlink_proto::{ServiceEndpoint, DISCOVERY_PORT};

use crate::registry::MonitorRegistry;
use crate::{ClientError, MultiplexingConnection};

/// How long to wait for a discovery reply.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay before retrying a failed or unanswered discovery round.
const RETRY_DELAY: Duration = Duration::from_secs(10);

/// Delay before re-discovering after an unreachable notification.
const REDISCOVER_DELAY: Duration = Duration::from_secs(1);

enum DiscoverState {
    Created,
    Running {
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
    },
    Stopped,
}

pub struct DiscoverConnection {
    local_port: u16,
    service_name: String,
    registry: Arc<MonitorRegistry>,
    discovery_addr: SocketAddr,
    state: Mutex<DiscoverState>,
}

impl DiscoverConnection {
    pub fn new(local_port: u16, service_name: String, registry: Arc<MonitorRegistry>) -> Self {
        Self {
            local_port,
            service_name,
            registry,
            discovery_addr: SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT)),
            state: Mutex::new(DiscoverState::Created),
        }
    }

    /// Override where discovery queries are sent. The default is the
    /// subnet broadcast address on the fixed discovery port.
    pub fn with_discovery_addr(mut self, addr: SocketAddr) -> Self {
        self.discovery_addr = addr;
        self
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Start the discovery loop in the background.
    ///
    /// Idempotent: at most one loop instance runs per handle, also
    /// under repeated calls.
    pub async fn start_listening(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        if !matches!(*state, DiscoverState::Created) {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(discovery_loop(
            self.local_port,
            self.service_name.clone(),
            self.registry.clone(),
            self.discovery_addr,
            shutdown_rx,
        ));

        *state = DiscoverState::Running {
            shutdown: shutdown_tx,
            task,
        };
        Ok(())
    }

    /// Stop discovery and any internal tunnel. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let prev = std::mem::replace(&mut *state, DiscoverState::Stopped);
        if let DiscoverState::Running { shutdown, task } = prev {
            info!(service = %self.service_name, "discover connection stopping");
            let _ = shutdown.send(true);
            let _ = task.await;
        }
    }
}

/// Idle -> Discovering -> Connected, looping back on failure.
async fn discovery_loop(
    local_port: u16,
    service_name: String,
    registry: Arc<MonitorRegistry>,
    discovery_addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        // Discovering: broadcast until someone answers.
        let destination = loop {
            debug!(service = %service_name, "discovering");
            let attempt = tokio::select! {
                _ = shutdown.changed() => return,
                attempt = query_service(&service_name, discovery_addr) => attempt,
            };

            match attempt {
                Ok(Some(destination)) => break destination,
                Ok(None) => {
                    debug!(service = %service_name, "no discovery response, retrying");
                }
                Err(e) => {
                    error!(service = %service_name, error = %e, "discovery failed, retrying");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(RETRY_DELAY) => {}
            }
        };

        info!(service = %service_name, %destination, "service discovered");

        // Connected: run the tunnel until the destination goes away.
        let tunnel =
            MultiplexingConnection::new(local_port, service_name.clone(), destination);
        if let Err(e) = tunnel.start_listening().await {
            error!(service = %service_name, error = %e, "failed to start tunnel, retrying discovery");
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(RETRY_DELAY) => {}
            }
            continue;
        }

        let monitor = registry.get_or_create(destination);
        let mut subscription = monitor.subscribe();

        tokio::select! {
            _ = shutdown.changed() => {
                drop(subscription);
                tunnel.stop().await;
                return;
            }
            _ = subscription.unreachable() => {
                warn!(service = %service_name, %destination, "destination unreachable, restarting discovery");
                drop(subscription);
                tunnel.stop().await;
            }
        }

        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(REDISCOVER_DELAY) => {}
        }
    }
}

/// One discovery round: broadcast the service name, wait for a reply.
///
/// The reply is the destination's rendezvous port in decimal ASCII;
/// the destination address is the reply's source address. `Ok(None)`
/// means nobody answered in time (or the reply was unparsable), which
/// the caller treats as a retry.
async fn query_service(
    service_name: &str,
    discovery_addr: SocketAddr,
) -> Result<Option<ServiceEndpoint>, std::io::Error> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    socket
        .send_to(service_name.as_bytes(), discovery_addr)
        .await?;

    let mut buf = [0u8; 64];
    match tokio::time::timeout(RESPONSE_TIMEOUT, socket.recv_from(&mut buf)).await {
        Err(_) => Ok(None),
        Ok(Err(e)) => Err(e),
        Ok(Ok((n, src))) => {
            let port = std::str::from_utf8(&buf[..n])
                .ok()
                .and_then(|reply| reply.trim().parse::<u16>().ok());
            match port {
                Some(port) => Ok(Some(ServiceEndpoint::new(src.ip(), port))),
                None => {
                    warn!(%src, "unparsable discovery reply");
                    Ok(None)
                }
            }
        }
    }
}
