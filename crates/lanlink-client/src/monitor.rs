//! Destination health monitoring
//!
//! One monitor per distinct destination, shared by every discovery
//! handle that resolved to it. The heartbeat loop runs over a single
//! dedicated TCP connection and exists only while the subscriber set
//! is non-empty. A monitor never retries: after a failure it notifies
//! its subscribers once and stops; the next subscription to the same
//! destination gets a fresh monitor from the registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use lanlink_proto::{framing, FrameError, ServiceEndpoint, HEARTBEAT_REPLY, HEARTBEAT_TAG};

/// Delay between heartbeats.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

type EmptyCallback = Box<dyn Fn(ServiceEndpoint) + Send + Sync>;

struct MonitorInner {
    subscribers: HashMap<u64, mpsc::UnboundedSender<()>>,
    next_id: u64,
    running: bool,
    shutdown: Option<watch::Sender<bool>>,
}

pub struct DestinationMonitor {
    destination: ServiceEndpoint,
    inner: Mutex<MonitorInner>,
    on_empty: EmptyCallback,
}

impl DestinationMonitor {
    pub(crate) fn new(destination: ServiceEndpoint, on_empty: EmptyCallback) -> Arc<Self> {
        Arc::new(Self {
            destination,
            inner: Mutex::new(MonitorInner {
                subscribers: HashMap::new(),
                next_id: 0,
                running: false,
                shutdown: None,
            }),
            on_empty,
        })
    }

    pub fn destination(&self) -> ServiceEndpoint {
        self.destination
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    /// Subscribe to unreachable notifications for this destination.
    ///
    /// The first subscription starts the heartbeat loop. Dropping the
    /// returned guard unsubscribes; when the last guard goes, the loop
    /// stops silently and the registry entry is removed.
    pub fn subscribe(self: &Arc<Self>) -> MonitorSubscription {
        let (tx, rx) = mpsc::unbounded_channel();

        let (id, shutdown_rx) = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.insert(id, tx);

            let shutdown_rx = if inner.running {
                None
            } else {
                inner.running = true;
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                inner.shutdown = Some(shutdown_tx);
                Some(shutdown_rx)
            };
            (id, shutdown_rx)
        };
        if let Some(shutdown_rx) = shutdown_rx {
            let monitor = self.clone();
            tokio::spawn(heartbeat_loop(monitor, shutdown_rx));
        }

        MonitorSubscription {
            monitor: self.clone(),
            id,
            rx,
        }
    }

    fn unsubscribe(&self, id: u64) {
        let emptied = {
            let mut inner = self.inner.lock().unwrap();
            inner.subscribers.remove(&id);
            let emptied = inner.subscribers.is_empty();
            if emptied {
                inner.running = false;
                if let Some(shutdown) = inner.shutdown.take() {
                    let _ = shutdown.send(true);
                }
            }
            emptied
        };

        // Outside the lock: the callback takes the registry lock.
        if emptied {
            (self.on_empty)(self.destination);
        }
    }

    /// Notify every current subscriber that the destination is gone.
    ///
    /// The sender list is snapshotted under the lock and the sends
    /// happen after it is released, so a subscriber may unsubscribe
    /// from inside its notification handling without deadlocking.
    fn notify_unreachable(&self) {
        let senders: Vec<mpsc::UnboundedSender<()>> = {
            let inner = self.inner.lock().unwrap();
            inner.subscribers.values().cloned().collect()
        };

        for sender in senders {
            let _ = sender.send(());
        }
    }
}

/// RAII subscription handle. Dropping it unsubscribes.
pub struct MonitorSubscription {
    monitor: Arc<DestinationMonitor>,
    id: u64,
    rx: mpsc::UnboundedReceiver<()>,
}

impl MonitorSubscription {
    /// Resolves when the monitor reports the destination unreachable.
    pub async fn unreachable(&mut self) {
        let _ = self.rx.recv().await;
    }
}

impl Drop for MonitorSubscription {
    fn drop(&mut self) {
        self.monitor.unsubscribe(self.id);
    }
}

#[derive(Debug, thiserror::Error)]
enum HeartbeatError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected heartbeat response {0:?}")]
    UnexpectedReply([u8; 4]),
}

async fn heartbeat_loop(monitor: Arc<DestinationMonitor>, mut shutdown: watch::Receiver<bool>) {
    let destination = monitor.destination;

    let connected = tokio::select! {
        _ = shutdown.changed() => return,
        connected = TcpStream::connect(destination.socket_addr()) => connected,
    };
    let mut stream = match connected {
        Ok(stream) => stream,
        Err(e) => {
            error!(%destination, error = %e, "failed to connect for heartbeats, notifying subscribers");
            monitor.notify_unreachable();
            return;
        }
    };

    loop {
        let beat = tokio::select! {
            _ = shutdown.changed() => {
                debug!(%destination, "heartbeat loop stopped, last subscriber left");
                return;
            }
            beat = heartbeat_once(&mut stream) => beat,
        };

        match beat {
            Ok(()) => debug!(%destination, "heartbeat successful"),
            Err(e) => {
                warn!(%destination, error = %e, "heartbeat failed, notifying subscribers");
                monitor.notify_unreachable();
                return;
            }
        }

        tokio::select! {
            _ = shutdown.changed() => {
                debug!(%destination, "heartbeat loop stopped, last subscriber left");
                return;
            }
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
        }
    }
}

/// One ping/pong exchange. The probe is a framed tag; the reply is the
/// raw 4 bytes `"pong"` with no prefix.
async fn heartbeat_once(stream: &mut TcpStream) -> Result<(), HeartbeatError> {
    framing::write_tag(stream, HEARTBEAT_TAG).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if &reply != HEARTBEAT_REPLY {
        return Err(HeartbeatError::UnexpectedReply(reply));
    }
    Ok(())
}
