// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State shared by the router, the announce service and peer connections.

use crate::bus::{EventBus, StatusBus};
use crate::config::CommConfig;
use crate::delivery::SendCounters;
use crate::entities::EntityResolver;
use crate::error::Result;
use crate::id::PeerId;
use crate::message::WireCodec;
use crate::pool::WorkerPool;
use crate::reachability::{Prober, ReachabilityCache};
use crate::registry::SystemRegistry;
use crate::transport::InterfaceProvider;
use std::sync::Arc;

/// One per router; handed out as `Arc<CommContext>`.
pub struct CommContext {
    pub config: CommConfig,
    pub registry: SystemRegistry,
    pub entities: EntityResolver,
    pub reachability: ReachabilityCache,
    /// Bus receiving every inbound message
    pub bus: EventBus,
    pub status: StatusBus,
    pub pool: Arc<WorkerPool>,
    pub interfaces: Arc<dyn InterfaceProvider>,
    pub codec: Arc<dyn WireCodec>,
    pub counters: Arc<SendCounters>,
}

impl CommContext {
    pub fn new(
        config: CommConfig,
        entities: EntityResolver,
        prober: Arc<dyn Prober>,
        interfaces: Arc<dyn InterfaceProvider>,
        codec: Arc<dyn WireCodec>,
    ) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new("imc-worker", config.worker_threads)?);
        Ok(Self {
            registry: SystemRegistry::new(),
            entities,
            reachability: ReachabilityCache::new(prober, Arc::clone(&pool)),
            bus: EventBus::new(Arc::clone(&pool)),
            status: StatusBus::new(),
            pool,
            interfaces,
            codec,
            counters: Arc::new(SendCounters::default()),
            config,
        })
    }

    pub fn local_id(&self) -> PeerId {
        self.config.local_id
    }
}
