// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Communication core configuration.

use crate::id::PeerId;
use crate::message::SystemType;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Transport names accepted in `transports_preference` and send hints.
pub const TRANSPORT_UDP: &str = "UDP";
pub const TRANSPORT_TCP: &str = "TCP";

/// A vehicle known ahead of time (not learned from announces).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticPeerConfig {
    pub id: PeerId,
    pub name: String,
    /// Announce-style type string ("UUV", "CCU", "AUV"...)
    #[serde(default = "default_static_kind")]
    pub kind: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub udp_port: Option<u16>,
    #[serde(default)]
    pub tcp_port: Option<u16>,
}

/// Core configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommConfig {
    /// Our IMC address
    #[serde(default = "default_local_id")]
    pub local_id: PeerId,

    /// Name announced to peers
    #[serde(default = "default_system_name")]
    pub system_name: String,

    /// Type announced to peers
    #[serde(default = "default_system_type")]
    pub system_type: SystemType,

    /// Owner announced to peers (0xFFFF = none)
    #[serde(default = "default_owner")]
    pub owner: u16,

    #[serde(default)]
    pub latitude_deg: f64,

    #[serde(default)]
    pub longitude_deg: f64,

    #[serde(default)]
    pub height_m: f32,

    #[serde(default = "default_true")]
    pub udp_enabled: bool,

    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    #[serde(default = "default_true")]
    pub tcp_enabled: bool,

    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    #[serde(default = "default_true")]
    pub multicast_enabled: bool,

    #[serde(default = "default_multicast_address")]
    pub multicast_address: Ipv4Addr,

    /// Port list/range text, e.g. "30100-30104" or "6969,6970"
    #[serde(default = "default_multicast_ports")]
    pub multicast_ports: String,

    /// Global transport preference order
    #[serde(default = "default_transports_preference")]
    pub transports_preference: Vec<String>,

    /// Match unknown UDP senders by ip:port instead of ip only
    #[serde(default)]
    pub filter_by_port: bool,

    /// Redirect traffic from unknown ids to the first known peer
    #[serde(default)]
    pub redirect_unknown_to_first: bool,

    /// Learn source address -> id mappings used to redirect unknown ids
    #[serde(default = "default_true")]
    pub change_id_by_source_ip: bool,

    /// Per-call reachability race timeout
    #[serde(default = "default_reachability_timeout")]
    pub reachability_timeout_ms: u64,

    /// Silence after which the local id collision flag clears
    #[serde(default = "default_collision_clear")]
    pub local_id_collision_clear_ms: u64,

    /// Negative disables
    #[serde(default = "default_announce_multicast_period")]
    pub announce_multicast_period_ms: i64,

    /// Negative disables
    #[serde(default = "default_announce_broadcast_period")]
    pub announce_broadcast_period_ms: i64,

    /// Negative disables
    #[serde(default = "default_announce_unicast_period")]
    pub announce_unicast_period_ms: i64,

    #[serde(default)]
    pub announce_unicast_enabled: bool,

    /// Entity list / plan db / beacons / acoustic polling. Negative disables
    #[serde(default = "default_poll_period")]
    pub poll_period_ms: i64,

    /// Negative disables
    #[serde(default = "default_heartbeat_period")]
    pub heartbeat_period_ms: i64,

    /// Entity alias store
    #[serde(default = "default_entities_store")]
    pub entities_store: PathBuf,

    /// Threads for bus delivery and reachability probes
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default)]
    pub static_peers: Vec<StaticPeerConfig>,

    /// Extra service URIs added to our announce
    #[serde(default)]
    pub extra_services: Vec<String>,
}

fn default_local_id() -> PeerId {
    PeerId::new(0x4000)
}

fn default_system_name() -> String {
    "ccu-neptus".to_string()
}

fn default_system_type() -> SystemType {
    SystemType::Ccu
}

fn default_owner() -> u16 {
    0xFFFF
}

fn default_true() -> bool {
    true
}

fn default_udp_port() -> u16 {
    6001
}

fn default_tcp_port() -> u16 {
    6001
}

fn default_multicast_address() -> Ipv4Addr {
    Ipv4Addr::new(224, 0, 75, 69)
}

fn default_multicast_ports() -> String {
    "30100-30104".to_string()
}

fn default_transports_preference() -> Vec<String> {
    vec![TRANSPORT_UDP.to_string(), TRANSPORT_TCP.to_string()]
}

fn default_reachability_timeout() -> u64 {
    100
}

fn default_collision_clear() -> u64 {
    20_000
}

fn default_announce_multicast_period() -> i64 {
    10_000
}

fn default_announce_broadcast_period() -> i64 {
    7_000
}

fn default_announce_unicast_period() -> i64 {
    10_000
}

fn default_poll_period() -> i64 {
    30_000
}

fn default_heartbeat_period() -> i64 {
    1_000
}

fn default_entities_store() -> PathBuf {
    PathBuf::from("conf/entities.properties")
}

fn default_worker_threads() -> usize {
    4
}

fn default_static_kind() -> String {
    "UUV".to_string()
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            local_id: default_local_id(),
            system_name: default_system_name(),
            system_type: default_system_type(),
            owner: default_owner(),
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            height_m: 0.0,
            udp_enabled: true,
            udp_port: default_udp_port(),
            tcp_enabled: true,
            tcp_port: default_tcp_port(),
            multicast_enabled: true,
            multicast_address: default_multicast_address(),
            multicast_ports: default_multicast_ports(),
            transports_preference: default_transports_preference(),
            filter_by_port: false,
            redirect_unknown_to_first: false,
            change_id_by_source_ip: true,
            reachability_timeout_ms: default_reachability_timeout(),
            local_id_collision_clear_ms: default_collision_clear(),
            announce_multicast_period_ms: default_announce_multicast_period(),
            announce_broadcast_period_ms: default_announce_broadcast_period(),
            announce_unicast_period_ms: default_announce_unicast_period(),
            announce_unicast_enabled: false,
            poll_period_ms: default_poll_period(),
            heartbeat_period_ms: default_heartbeat_period(),
            entities_store: default_entities_store(),
            worker_threads: default_worker_threads(),
            static_peers: Vec::new(),
            extra_services: Vec::new(),
        }
    }
}

impl CommConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Multicast ports, parsed from `multicast_ports`.
    pub fn multicast_port_list(&self) -> Result<Vec<u16>, ConfigError> {
        parse_port_range(&self.multicast_ports)
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }

    pub fn local_id_collision_clear(&self) -> Duration {
        Duration::from_millis(self.local_id_collision_clear_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.local_id.is_valid_source() {
            return Err(ConfigError::InvalidValue(format!(
                "local_id {} is reserved",
                self.local_id.to_pretty_string()
            )));
        }
        if self.system_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "system_name cannot be empty".into(),
            ));
        }
        if !self.multicast_address.is_multicast() {
            return Err(ConfigError::InvalidValue(format!(
                "{} is not a multicast address",
                self.multicast_address
            )));
        }
        if self.multicast_enabled && self.multicast_port_list()?.is_empty() {
            return Err(ConfigError::InvalidValue(
                "multicast_ports cannot be empty".into(),
            ));
        }
        for t in &self.transports_preference {
            if !t.eq_ignore_ascii_case(TRANSPORT_UDP) && !t.eq_ignore_ascii_case(TRANSPORT_TCP) {
                return Err(ConfigError::InvalidValue(format!(
                    "unknown transport '{}' in transports_preference",
                    t
                )));
            }
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::InvalidValue(
                "worker_threads cannot be 0".into(),
            ));
        }
        if self.reachability_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "reachability_timeout_ms cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Parse "a-b", "a,b,c" or a mix ("6969,30100-30102").
pub fn parse_port_range(text: &str) -> Result<Vec<u16>, ConfigError> {
    let mut ports = Vec::new();
    for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let bad = || ConfigError::InvalidValue(format!("bad port range '{}'", part));
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u16 = start.trim().parse().map_err(|_| bad())?;
                let end: u16 = end.trim().parse().map_err(|_| bad())?;
                if start > end {
                    return Err(bad());
                }
                ports.extend(start..=end);
            }
            None => ports.push(part.parse().map_err(|_| bad())?),
        }
    }
    ports.dedup();
    Ok(ports)
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
