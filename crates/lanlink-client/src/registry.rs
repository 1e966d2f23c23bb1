//! Monitor registry
//!
//! Process-wide map of destination -> monitor, guaranteeing exactly
//! one live monitor per destination. Entries remove themselves when
//! their monitor's subscriber set empties.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

use lanlink_proto::ServiceEndpoint;

use crate::monitor::DestinationMonitor;

pub struct MonitorRegistry {
    monitors: Mutex<HashMap<ServiceEndpoint, Arc<DestinationMonitor>>>,
}

impl MonitorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            monitors: Mutex::new(HashMap::new()),
        })
    }

    /// Return the monitor for `destination`, creating it if absent.
    ///
    /// The mutex is held only across the map mutation; the new monitor
    /// is wired with a callback that removes its own entry once its
    /// last subscriber leaves.
    pub fn get_or_create(self: &Arc<Self>, destination: ServiceEndpoint) -> Arc<DestinationMonitor> {
        let mut monitors = self.monitors.lock().unwrap();
        if let Some(monitor) = monitors.get(&destination) {
            return monitor.clone();
        }

        let registry: Weak<Self> = Arc::downgrade(self);
        let monitor = DestinationMonitor::new(
            destination,
            Box::new(move |dest| {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(dest);
                }
            }),
        );
        monitors.insert(destination, monitor.clone());
        debug!(%destination, "created destination monitor");
        monitor
    }

    fn remove(&self, destination: ServiceEndpoint) {
        if self.monitors.lock().unwrap().remove(&destination).is_some() {
            debug!(%destination, "removed destination monitor");
        }
    }

    pub fn len(&self) -> usize {
        self.monitors.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.lock().unwrap().is_empty()
    }
}
