// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration: the communication core settings plus daemon-only
//! options, in one JSON file.
//!
//! ```json
//! {
//!   "local_id": "0x4001",
//!   "system_name": "ccu-lab",
//!   "multicast_ports": "30100-30104",
//!   "table_interval_secs": 30
//! }
//! ```

use imc_comm::{CommConfig, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(flatten)]
    pub comm: CommConfig,

    /// Seconds between peer table dumps (0 disables)
    #[serde(default = "default_table_interval")]
    pub table_interval_secs: u64,
}

fn default_table_interval() -> u64 {
    30
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            comm: CommConfig::default(),
            table_interval_secs: default_table_interval(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    #[allow(dead_code)]
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Peer table period, `None` when disabled.
    pub fn table_interval(&self) -> Option<Duration> {
        (self.table_interval_secs > 0).then(|| Duration::from_secs(self.table_interval_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.comm.validate()
    }
}
