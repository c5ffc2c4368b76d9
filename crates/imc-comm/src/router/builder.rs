// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Router construction.

use super::{MessageRouter, RouterInner, StatsCounters, STATE_IDLE};
use crate::announce::AnnounceService;
use crate::config::CommConfig;
use crate::context::CommContext;
use crate::entities::{EntityMap, EntityResolver};
use crate::error::Result;
use crate::fragment::FragmentReassembler;
use crate::message::{JsonCodec, WireCodec};
use crate::peer::Flag;
use crate::reachability::{Prober, TcpEchoProber};
use crate::scheduler::Scheduler;
use crate::transport::{
    InterfaceProvider, MulticastTransport, SystemInterfaces, TcpTransport, Transport,
    TransportKind, UdpTransport,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;

/// Builder for a [`MessageRouter`].
///
/// Anything not supplied falls back to the real thing: a TCP echo prober,
/// the host's interfaces, [`JsonCodec`] and the entity store named in the
/// configuration.
pub struct RouterBuilder {
    config: CommConfig,
    transports: Vec<Arc<dyn Transport>>,
    prober: Option<Arc<dyn Prober>>,
    interfaces: Option<Arc<dyn InterfaceProvider>>,
    codec: Option<Arc<dyn WireCodec>>,
    entities: Option<EntityResolver>,
}

impl RouterBuilder {
    pub(super) fn new(config: CommConfig) -> Self {
        Self {
            config,
            transports: Vec::new(),
            prober: None,
            interfaces: None,
            codec: None,
            entities: None,
        }
    }

    /// Install a transport. One multicast transport at most is used.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn interfaces(mut self, interfaces: Arc<dyn InterfaceProvider>) -> Self {
        self.interfaces = Some(interfaces);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn WireCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn entities(mut self, entities: EntityResolver) -> Self {
        self.entities = Some(entities);
        self
    }

    /// Bind the UDP, TCP and multicast transports the configuration enables.
    pub fn with_default_transports(mut self) -> Result<Self> {
        let codec = Arc::clone(
            self.codec
                .get_or_insert_with(|| Arc::new(JsonCodec) as Arc<dyn WireCodec>),
        );
        let interfaces = Arc::clone(self.interfaces.get_or_insert_with(|| {
            Arc::new(SystemInterfaces::new()) as Arc<dyn InterfaceProvider>
        }));
        let cfg = &self.config;

        let mut installed: Vec<Arc<dyn Transport>> = Vec::new();
        if cfg.udp_enabled {
            installed.push(Arc::new(UdpTransport::bind(cfg.udp_port, Arc::clone(&codec))?));
        }
        if cfg.tcp_enabled {
            installed.push(Arc::new(TcpTransport::bind(cfg.tcp_port, Arc::clone(&codec))?));
        }
        if cfg.multicast_enabled {
            let ports = cfg.multicast_port_list()?;
            let mcast = MulticastTransport::bind(
                cfg.multicast_address,
                &ports,
                &interfaces.interfaces(),
                codec,
            )?;
            installed.push(Arc::new(mcast));
        }
        self.transports.extend(installed);
        Ok(self)
    }

    pub fn build(self) -> Result<MessageRouter> {
        self.config.validate()?;
        let multicast_ports = self.config.multicast_port_list()?;

        let entities = match self.entities {
            Some(entities) => entities,
            None => EntityResolver::open(&self.config.entities_store)?,
        };
        let prober = self
            .prober
            .unwrap_or_else(|| Arc::new(TcpEchoProber) as Arc<dyn Prober>);
        let interfaces = self
            .interfaces
            .unwrap_or_else(|| Arc::new(SystemInterfaces::new()) as Arc<dyn InterfaceProvider>);
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(JsonCodec) as Arc<dyn WireCodec>);

        let (multicast, unicast): (Vec<_>, Vec<_>) = self
            .transports
            .into_iter()
            .partition(|t| t.kind() == TransportKind::Multicast);
        if multicast.len() > 1 {
            log::warn!(
                "[Router] {} multicast transports installed, using the first",
                multicast.len()
            );
        }
        let multicast = multicast.into_iter().next();

        let ctx = Arc::new(CommContext::new(
            self.config,
            entities,
            prober,
            interfaces,
            codec,
        )?);
        let announce = Arc::new(AnnounceService::new(Arc::clone(&ctx)));

        let mut inner = RouterInner {
            ctx,
            announce,
            unicast,
            multicast,
            multicast_ports,
            connections: DashMap::new(),
            udp_on_ip: DashMap::new(),
            static_ids: HashSet::new(),
            fragments: Mutex::new(FragmentReassembler::default()),
            local_entities: RwLock::new(EntityMap::new()),
            local_collision: Mutex::new(Flag::default()),
            monitor: Scheduler::new("imc-router"),
            state: AtomicU8::new(STATE_IDLE),
            stats: StatsCounters::default(),
        };
        inner.register_static_peers();

        Ok(MessageRouter {
            inner: Arc::new(inner),
        })
    }
}
