//! Configuration loading from a TOML file.
//!
//! Read and parse failures are returned as [`RelayError::Config`].

use relayq_types::{NodeConfig, RelayError, RelayResult};
use std::path::Path;
use tracing::{debug, info};

/// Load node configuration.
///
/// With no path, the built-in defaults are returned. The result is not yet
/// validated; [`crate::Node`] validates it on start.
pub fn load_config(path: Option<&Path>) -> RelayResult<NodeConfig> {
    let Some(path) = path else {
        debug!("No configuration file given, using defaults");
        return Ok(NodeConfig::default());
    };

    let contents = std::fs::read_to_string(path).map_err(|e| {
        RelayError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let config = NodeConfig::from_toml_str(&contents)?;
    info!(
        path = %path.display(),
        node_id = %config.node_id,
        "Loaded configuration"
    );
    Ok(config)
}
