//! Connection manager
//!
//! Owns the local-port -> connection handle map. Registration is
//! all-or-nothing: a duplicate local port is a configuration error and
//! leaves the map untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use lanlink_proto::{ClientConfig, ConnectionSpec};

use crate::connection::ClientConnection;
use crate::registry::MonitorRegistry;
use crate::ClientError;

pub struct ConnectionManager {
    connections: Mutex<HashMap<u16, Arc<ClientConnection>>>,
    registry: Arc<MonitorRegistry>,
}

impl ConnectionManager {
    pub fn new(registry: Arc<MonitorRegistry>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            registry,
        }
    }

    /// Register a connection handle for the spec's local port.
    ///
    /// The caller must still call `start_listening` on the returned
    /// handle.
    pub fn add(&self, spec: ConnectionSpec) -> Result<Arc<ClientConnection>, ClientError> {
        let mut connections = self.connections.lock().unwrap();
        if connections.contains_key(&spec.local_port) {
            return Err(ClientError::PortInUse(spec.local_port));
        }

        let local_port = spec.local_port;
        let connection = Arc::new(ClientConnection::from_spec(spec, self.registry.clone()));
        connections.insert(local_port, connection.clone());
        debug!(port = local_port, "registered connection");
        Ok(connection)
    }

    /// Stop and evict the handle bound to `local_port`, if any.
    pub async fn remove(&self, local_port: u16) {
        let connection = self.connections.lock().unwrap().remove(&local_port);
        if let Some(connection) = connection {
            connection.stop().await;
            debug!(port = local_port, "removed connection");
        }
    }

    /// Add and start one handle per configured local service.
    pub async fn start_from_config(&self, config: &ClientConfig) -> Result<(), ClientError> {
        for needed in &config.needed_services {
            let spec = needed
                .to_spec()
                .map_err(|source| ClientError::InvalidDestination {
                    service: needed.service_name.clone(),
                    source,
                })?;
            let connection = self.add(spec)?;
            connection.start_listening().await?;
        }
        info!(
            services = config.needed_services.len(),
            "client connections started"
        );
        Ok(())
    }

    /// Stop and evict every registered handle.
    pub async fn stop_all(&self) {
        let ports: Vec<u16> = self.connections.lock().unwrap().keys().copied().collect();
        for port in ports {
            self.remove(port).await;
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery_spec(local_port: u16) -> ConnectionSpec {
        ConnectionSpec {
            local_port,
            service_name: "svc".to_string(),
            destination: None,
            direct: false,
        }
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(MonitorRegistry::new())
    }

    #[test]
    fn test_duplicate_port_is_rejected_without_mutation() {
        let manager = manager();

        manager.add(discovery_spec(6000)).unwrap();
        assert_eq!(manager.len(), 1);

        let duplicate = manager.add(discovery_spec(6000));
        assert!(matches!(duplicate, Err(ClientError::PortInUse(6000))));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_distinct_ports_coexist() {
        let manager = manager();

        manager.add(discovery_spec(6000)).unwrap();
        manager.add(discovery_spec(6001)).unwrap();
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_unknown_port_is_a_noop() {
        let manager = manager();
        manager.remove(4242).await;
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_remove_evicts_handle() {
        let manager = manager();
        manager.add(discovery_spec(6000)).unwrap();

        manager.remove(6000).await;
        assert!(manager.is_empty());

        // The port is free to register again.
        manager.add(discovery_spec(6000)).unwrap();
    }
}
