//! Direct proxy connection
//!
//! Binds a local port and proxies every accepted client straight to a
//! fixed destination. No handshake, no health monitoring.

use std::net::Ipv4Addr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use lanlink_proto::ServiceEndpoint;

use crate::{ClientError, FORWARD_BUF_SIZE};

/// Lifecycle of a listening connection handle.
pub(crate) enum ListenerState {
    Created,
    Listening {
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
    },
    Stopped,
}

pub struct DirectConnection {
    local_port: u16,
    service_name: String,
    destination: ServiceEndpoint,
    state: Mutex<ListenerState>,
}

impl DirectConnection {
    pub fn new(local_port: u16, service_name: String, destination: ServiceEndpoint) -> Self {
        Self {
            local_port,
            service_name,
            destination,
            state: Mutex::new(ListenerState::Created),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Bind the local port and start accepting in the background.
    ///
    /// Idempotent: calling again while listening or stopped is a no-op.
    pub async fn start_listening(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        if !matches!(*state, ListenerState::Created) {
            return Ok(());
        }

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.local_port))
            .await
            .map_err(|e| ClientError::Bind {
                port: self.local_port,
                source: e,
            })?;
        info!(
            port = self.local_port,
            service = %self.service_name,
            "listening for client connections"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let destination = self.destination;
        let service_name = self.service_name.clone();
        let task = tokio::spawn(accept_loop(listener, destination, service_name, shutdown_rx));

        *state = ListenerState::Listening {
            shutdown: shutdown_tx,
            task,
        };
        Ok(())
    }

    /// Release the listening socket. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let prev = std::mem::replace(&mut *state, ListenerState::Stopped);
        if let ListenerState::Listening { shutdown, task } = prev {
            info!(port = self.local_port, "direct connection stopping");
            let _ = shutdown.send(true);
            let _ = task.await;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    destination: ServiceEndpoint,
    service_name: String,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(service = %service_name, "accept loop shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((client, peer)) => {
                    debug!(%peer, service = %service_name, "accepted a connection");
                    tokio::spawn(handle_client(client, destination));
                }
                Err(e) => {
                    error!(service = %service_name, error = %e, "accept failed");
                }
            }
        }
    }
}

async fn handle_client(client: TcpStream, destination: ServiceEndpoint) {
    let server = match TcpStream::connect(destination.socket_addr()).await {
        Ok(server) => server,
        Err(e) => {
            warn!(%destination, error = %e, "failed to connect to destination");
            return;
        }
    };
    debug!(%destination, "client connected to destination");

    lanlink_forward::relay(client, server, FORWARD_BUF_SIZE).await;
    debug!(%destination, "session closed");
}
