//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::clustering::ClusterConfig;
use crate::error::{FleetError, Result};
use crate::styles::StyleConfig;

/// Everything the engine needs besides data.
///
/// Missing sections and fields fall back to their defaults, so a partial
/// JSON document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cluster: ClusterConfig,
    pub styles: StyleConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json).map_err(|e| FleetError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()
    }
}
