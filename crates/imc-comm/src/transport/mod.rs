// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network transports.
//!
//! # Modules
//!
//! - `udp` - unicast datagrams with a bounded send queue
//! - `multicast` - group and broadcast datagrams on the announce ports
//! - `tcp` - length-prefixed stream transport with pooled connections
//! - `net_if` - IPv4 interface and broadcast address discovery
//!
//! A transport owns its sockets and threads. `send` only hands the message
//! over: `Ok` means exactly one [`DeliveryResult`](crate::DeliveryResult)
//! callback will follow, `Err` means the message was refused and no callback
//! will fire.

pub mod multicast;
pub mod net_if;
pub mod tcp;
pub mod udp;

pub use multicast::MulticastTransport;
pub use net_if::{InterfaceProvider, NetInterface, StaticInterfaces, SystemInterfaces};
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use crate::delivery::DeliveryCallback;
use crate::error::Result;
use crate::message::ImcMessage;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Udp,
    Multicast,
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "UDP"),
            Self::Multicast => write!(f, "Multicast"),
            Self::Tcp => write!(f, "TCP"),
        }
    }
}

/// Transport request for one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportHint {
    /// Follow the configured preference order
    #[default]
    Auto,
    Udp,
    Tcp,
    Multicast,
    Broadcast,
    MulticastAndBroadcast,
}

impl TransportHint {
    pub fn wants_multicast(self) -> bool {
        matches!(self, Self::Multicast | Self::MulticastAndBroadcast)
    }

    pub fn wants_broadcast(self) -> bool {
        matches!(self, Self::Broadcast | Self::MulticastAndBroadcast)
    }

    /// Unicast transport explicitly requested, if any.
    pub fn unicast(self) -> Option<TransportKind> {
        match self {
            Self::Udp => Some(TransportKind::Udp),
            Self::Tcp => Some(TransportKind::Tcp),
            _ => None,
        }
    }
}

impl std::str::FromStr for TransportHint {
    type Err = crate::error::CommError;

    /// Accepts "UDP", "TCP", "Multicast", "Broadcast" and
    /// "Multicast+Broadcast", case-insensitive. Empty means `Auto`.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let wants = |name: &str| lower.split('+').any(|p| p.trim() == name);
        match lower.as_str() {
            "" | "auto" => Ok(Self::Auto),
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            _ if wants("multicast") && wants("broadcast") => Ok(Self::MulticastAndBroadcast),
            "multicast" => Ok(Self::Multicast),
            "broadcast" => Ok(Self::Broadcast),
            _ => Err(crate::error::CommError::TransportRejected(format!(
                "unknown transport '{}'",
                s
            ))),
        }
    }
}

/// Where an inbound message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundInfo {
    pub addr: SocketAddr,
    pub kind: TransportKind,
}

/// Receives decoded inbound messages on transport threads.
pub type InboundHandler = Arc<dyn Fn(InboundInfo, ImcMessage) + Send + Sync>;

pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Begin delivering inbound messages to `handler`.
    fn start(&self, handler: InboundHandler) -> Result<()>;

    /// Hand `msg` over for delivery to `dest`.
    fn send(&self, dest: SocketAddr, msg: &ImcMessage, callback: DeliveryCallback) -> Result<()>;

    fn local_port(&self) -> Option<u16>;

    /// Stop threads and close sockets. Idempotent.
    fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_parsing() {
        assert_eq!("".parse::<TransportHint>().unwrap(), TransportHint::Auto);
        assert_eq!("TCP".parse::<TransportHint>().unwrap(), TransportHint::Tcp);
        assert_eq!(
            "Broadcast+Multicast".parse::<TransportHint>().unwrap(),
            TransportHint::MulticastAndBroadcast
        );
        assert!("carrier-pigeon".parse::<TransportHint>().is_err());
        assert!(TransportHint::MulticastAndBroadcast.wants_broadcast());
        assert_eq!(TransportHint::Multicast.unicast(), None);
    }
}
