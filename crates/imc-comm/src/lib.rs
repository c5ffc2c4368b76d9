// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # imc-comm - IMC peer-to-peer communication core
//!
//! Discovery, reachability and message routing for nodes speaking the IMC
//! protocol over UDP, TCP and multicast: vehicles, consoles and sensors on a
//! shared network.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imc_comm::{CommConfig, ImcMessage, MessageRouter, Payload, PeerId, TransportHint};
//! use std::sync::Arc;
//!
//! fn main() -> imc_comm::Result<()> {
//!     let router = MessageRouter::builder(CommConfig::default())
//!         .with_default_transports()?
//!         .build()?;
//!
//!     router.register_listener(
//!         Arc::new(|info, msg| println!("{} from {:?}", msg.abbrev(), info.publisher)),
//!         None,
//!     );
//!     router.start()?;
//!
//!     router.send(
//!         ImcMessage::new(Payload::Heartbeat),
//!         PeerId::new(0x0c05),
//!         TransportHint::Auto,
//!         None,
//!     )?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  MessageRouter   inbound dispatch | send policy | announce emission  |
//! +---------------------------------------------------------------------+
//! |  AnnounceService | PeerConnection | state reports | reassembly       |
//! +---------------------------------------------------------------------+
//! |  SystemRegistry | EntityResolver | ReachabilityCache | EventBus      |
//! +---------------------------------------------------------------------+
//! |  Transports: UDP | multicast/broadcast | TCP      (WireCodec seam)   |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MessageRouter`] | Entry point: owns transports, routes traffic |
//! | [`CommConfig`] | Identity, transports, schedules and policies |
//! | [`Peer`] | A remote system and its derived state |
//! | [`SystemRegistry`] | One `Peer` per id, lookups by name/type/service |
//! | [`DeliveryResult`] | Terminal outcome of one transport attempt |

/// Announce emission and processing, periodic polling.
pub mod announce;
/// Listener buses for inbound messages and peer status events.
pub mod bus;
/// Configuration (identity, transports, schedules, static peers).
pub mod config;
/// Per-peer inbound processing and activity detection.
pub mod connection;
/// Shared state handed to every component.
pub mod context;
/// Delivery results, send counters and reliable-send waiters.
pub mod delivery;
/// Per-peer entity alias tables.
pub mod entities;
/// Error types.
pub mod error;
/// MessagePart reassembly.
pub mod fragment;
/// Local-frame offsets to geodetic positions.
pub mod geo;
/// 16-bit peer identifiers.
pub mod id;
/// Message model and codec seam.
pub mod message;
/// Remote systems.
pub mod peer;
/// Worker pool for bus delivery and probes.
pub mod pool;
/// Endpoint reachability probes and cache.
pub mod reachability;
/// Peer directory.
pub mod registry;
/// Top-level router.
pub mod router;
/// Named repeating tasks.
pub mod scheduler;
/// Service URI lists.
pub mod services;
mod state_report;
/// Network transports.
pub mod transport;

pub use announce::{AnnounceRoute, AnnounceService, AnnounceSink};
pub use bus::{
    ListenerId, MessageFilter, MessageHandler, MessageInfo, PeerEvent, StatusListener,
};
pub use config::{CommConfig, ConfigError, StaticPeerConfig};
pub use connection::PeerConnection;
pub use delivery::{DeliveryCallback, DeliveryResult, ResultWaiter};
pub use entities::{EntityMap, EntityResolver};
pub use error::{CommError, Result};
pub use id::PeerId;
pub use message::{ImcMessage, JsonCodec, Payload, WireCodec};
pub use peer::{Authority, Peer, PeerSnapshot, SystemKind, VehicleKind};
pub use reachability::{Prober, TcpEchoProber};
pub use registry::SystemRegistry;
pub use router::{MessageRouter, RouterBuilder, RouterStats};
pub use transport::{
    InboundHandler, InboundInfo, InterfaceProvider, MulticastTransport, StaticInterfaces,
    SystemInterfaces, TcpTransport, Transport, TransportHint, TransportKind, UdpTransport,
};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
