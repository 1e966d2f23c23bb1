//! Configuration snapshot types
//!
//! The core never parses files or command lines; it consumes this
//! already-deserialized snapshot. Field names follow the JSON the
//! binary loads.

use serde::{Deserialize, Serialize};

use crate::endpoint::{EndpointError, ServiceEndpoint};

/// Top-level configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub server: Option<ServerConfig>,
}

/// Client-side configuration: one entry per requested local tunnel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub needed_services: Vec<NeededService>,
}

/// One requested local tunnel entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeededService {
    pub local_port: u16,
    pub service_name: String,
    /// `host[:port]` of a fixed destination. Absent means the
    /// destination is resolved at runtime via discovery.
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub direct: bool,
}

impl NeededService {
    /// Resolve the destination string into a connection spec.
    pub fn to_spec(&self) -> Result<ConnectionSpec, EndpointError> {
        let destination = self
            .destination
            .as_deref()
            .map(str::parse::<ServiceEndpoint>)
            .transpose()?;

        Ok(ConnectionSpec {
            local_port: self.local_port,
            service_name: self.service_name.clone(),
            destination,
            direct: self.direct,
        })
    }
}

/// Server-side configuration: services offered for dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub offered_services: Vec<OfferedService>,
}

/// A locally offered service, reachable through the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferedService {
    pub service_name: String,
    pub destination: String,
    #[serde(rename = "type", default)]
    pub service_type: ServiceType,
}

/// How an offered service is reached. Only `Direct` is dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    Direct,
    Forward,
    Discovery,
}

/// Immutable descriptor of one requested local tunnel entry, with the
/// destination already resolved. Absent destination means discovery.
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub local_port: u16,
    pub service_name: String,
    pub destination: Option<ServiceEndpoint>,
    pub direct: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "client": {
                "neededServices": [
                    {"localPort": 5001, "serviceName": "db", "destination": "10.0.0.2:5432", "direct": true},
                    {"localPort": 5002, "serviceName": "web"}
                ]
            },
            "server": {
                "offeredServices": [
                    {"serviceName": "db", "destination": ":5432", "type": "Direct"},
                    {"serviceName": "cache", "destination": ":6379"}
                ]
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.client.needed_services.len(), 2);

        let server = config.server.unwrap();
        assert_eq!(server.offered_services.len(), 2);
        assert_eq!(server.offered_services[0].service_type, ServiceType::Direct);
        // Type defaults to Direct when omitted.
        assert_eq!(server.offered_services[1].service_type, ServiceType::Direct);
    }

    #[test]
    fn test_client_only_config() {
        let json = r#"{"client": {"neededServices": []}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.server.is_none());
    }

    #[test]
    fn test_to_spec_resolves_destination() {
        let needed = NeededService {
            local_port: 5001,
            service_name: "db".to_string(),
            destination: Some("192.168.0.7:5432".to_string()),
            direct: false,
        };

        let spec = needed.to_spec().unwrap();
        let destination = spec.destination.unwrap();
        assert_eq!(destination.port, 5432);
        assert!(!spec.direct);
    }

    #[test]
    fn test_to_spec_without_destination() {
        let needed = NeededService {
            local_port: 5002,
            service_name: "web".to_string(),
            destination: None,
            direct: false,
        };

        let spec = needed.to_spec().unwrap();
        assert!(spec.destination.is_none());
    }

    #[test]
    fn test_to_spec_rejects_bad_destination() {
        let needed = NeededService {
            local_port: 5003,
            service_name: "db".to_string(),
            destination: Some("nonsense".to_string()),
            direct: true,
        };

        assert!(needed.to_spec().is_err());
    }
}
