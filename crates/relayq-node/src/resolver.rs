//! Mapping from a node identity to a dialable endpoint.

use relayq_types::{NodeConfig, RelayError, RelayResult};
use relayq_wire::{Endpoint, WireError};
use std::collections::HashMap;

/// Resolves the destination identity of a message to an endpoint.
pub trait AddressResolver: Send + Sync + 'static {
    fn resolve(&self, destination_id: &str) -> Result<Endpoint, WireError>;
}

/// Treats the identity itself as the host name, on a fixed port.
#[derive(Debug, Clone, Copy)]
pub struct IdentityAsHost {
    pub port: u16,
}

impl AddressResolver for IdentityAsHost {
    fn resolve(&self, destination_id: &str) -> Result<Endpoint, WireError> {
        if destination_id.is_empty() {
            return Err(WireError::InvalidEndpoint(
                "empty destination identity".to_string(),
            ));
        }
        Ok(Endpoint::new(destination_id, self.port))
    }
}

/// Explicit routes from configuration, falling back to [`IdentityAsHost`].
#[derive(Debug, Clone)]
pub struct StaticResolver {
    routes: HashMap<String, Endpoint>,
    fallback: IdentityAsHost,
}

impl StaticResolver {
    pub fn new(routes: HashMap<String, Endpoint>, fallback_port: u16) -> Self {
        Self {
            routes,
            fallback: IdentityAsHost {
                port: fallback_port,
            },
        }
    }

    /// Build from the `peers` table and `peer_port` of a config.
    pub fn from_config(config: &NodeConfig) -> RelayResult<Self> {
        let mut routes = HashMap::with_capacity(config.peers.len());
        for (identity, address) in &config.peers {
            let endpoint = Endpoint::parse(address)
                .map_err(|e| RelayError::Config(format!("peer '{identity}': {e}")))?;
            routes.insert(identity.clone(), endpoint);
        }
        Ok(Self::new(routes, config.peer_port))
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl AddressResolver for StaticResolver {
    fn resolve(&self, destination_id: &str) -> Result<Endpoint, WireError> {
        match self.routes.get(destination_id) {
            Some(endpoint) => Ok(endpoint.clone()),
            None => self.fallback.resolve(destination_id),
        }
    }
}
