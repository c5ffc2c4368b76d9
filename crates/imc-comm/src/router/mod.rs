// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Top-level message router.
//!
//! The router owns the transports, the announce service and one
//! [`PeerConnection`] per peer it has heard from. Inbound traffic from every
//! transport funnels into one dispatch path; outbound sends pick a transport
//! per call.
//!
//! # Modules
//!
//! - `builder` - configuration, transport installation and `build()`
//! - `inbound` - source validation, per-type pre-processing, unknown senders
//! - `outbound` - stamping, transport selection, multicast fan-out
//!
//! # Example
//!
//! ```no_run
//! use imc_comm::{CommConfig, MessageRouter};
//!
//! let router = MessageRouter::builder(CommConfig::default())
//!     .with_default_transports()?
//!     .build()?;
//! router.start()?;
//! # Ok::<(), imc_comm::CommError>(())
//! ```

mod builder;
mod inbound;
mod outbound;

pub use builder::RouterBuilder;

use crate::announce::{AnnounceService, AnnounceSink};
use crate::bus::{ListenerId, MessageFilter, MessageHandler, MessageInfo, PeerEvent, StatusListener};
use crate::config::CommConfig;
use crate::connection::PeerConnection;
use crate::context::CommContext;
use crate::delivery::{DeliveryCallback, DeliveryResult, ResultWaiter, RELIABLE_DEADLINE};
use crate::entities::{EntityMap, EntityResolver};
use crate::error::{CommError, Result};
use crate::fragment::FragmentReassembler;
use crate::id::PeerId;
use crate::message::{now_millis, ImcMessage};
use crate::peer::{Flag, Peer, PeerSnapshot, SystemKind};
use crate::registry::SystemRegistry;
use crate::scheduler::Scheduler;
use crate::transport::{InboundHandler, InboundInfo, Transport, TransportHint, TransportKind};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Inactivity monitor period.
const MONITOR_PERIOD_MS: i64 = 1_000;
const TASK_MONITOR: &str = "monitor";

/// Highest entity id handed out by [`MessageRouter::register_entity`].
const MAX_LOCAL_ENTITY: u8 = 254;

/// Point-in-time router counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub inbound: u64,
    /// Invalid or spoofed source ids
    pub dropped: u64,
    /// Unknown ids delivered to an already known peer
    pub redirected: u64,
    /// Peers created from unknown traffic
    pub bootstrapped: u64,
    /// Messages that reached only the generic bus
    pub posted: u64,
    /// Sends handed to a transport
    pub sent: u64,
    pub send_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    inbound: AtomicU64,
    dropped: AtomicU64,
    redirected: AtomicU64,
    bootstrapped: AtomicU64,
    posted: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RouterStats {
        RouterStats {
            inbound: self.inbound.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            redirected: self.redirected.load(Ordering::Relaxed),
            bootstrapped: self.bootstrapped.load(Ordering::Relaxed),
            posted: self.posted.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the public handle, transport callbacks and
/// scheduled tasks.
pub(crate) struct RouterInner {
    ctx: Arc<CommContext>,
    announce: Arc<AnnounceService>,
    unicast: Vec<Arc<dyn Transport>>,
    multicast: Option<Arc<dyn Transport>>,
    multicast_ports: Vec<u16>,
    connections: DashMap<PeerId, Arc<PeerConnection>>,
    /// Observed "ip" or "ip:port" -> peer id
    udp_on_ip: DashMap<String, PeerId>,
    static_ids: HashSet<PeerId>,
    fragments: Mutex<FragmentReassembler>,
    local_entities: RwLock<EntityMap>,
    local_collision: Mutex<Flag>,
    monitor: Scheduler,
    state: AtomicU8,
    stats: StatsCounters,
}

impl RouterInner {
    fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    fn transports(&self) -> impl Iterator<Item = &Arc<dyn Transport>> {
        self.unicast.iter().chain(self.multicast.iter())
    }

    /// Connection for `peer`, created on first use.
    fn ensure_connection(&self, peer: Arc<Peer>) -> Arc<PeerConnection> {
        let id = peer.id();
        Arc::clone(
            self.connections
                .entry(id)
                .or_insert_with(|| {
                    log::debug!("[Router] new connection for {} '{}'", id, peer.name());
                    Arc::new(PeerConnection::new(peer, Arc::clone(&self.ctx)))
                })
                .value(),
        )
    }

    fn register_static_peers(&mut self) {
        let statics = self.ctx.config.static_peers.clone();
        for sp in &statics {
            if !sp.id.is_valid_source() || sp.id == self.ctx.local_id() {
                log::warn!("[Router] ignoring static peer '{}' with id {}", sp.name, sp.id);
                continue;
            }
            let peer = self.ctx.registry.register(Peer::with_name(sp.id, &sp.name));
            peer.set_kind(SystemKind::from_type_str(&sp.kind));
            peer.update_endpoints(|ep| {
                if let Some(host) = &sp.host {
                    ep.host = host.clone();
                    ep.host_guessed = false;
                }
                if let Some(port) = sp.udp_port {
                    ep.udp_port = port;
                    ep.udp_enabled = true;
                }
                if let Some(port) = sp.tcp_port {
                    ep.tcp_port = port;
                    ep.tcp_enabled = true;
                }
            });
            self.static_ids.insert(sp.id);
            log::debug!("[Router] static peer {} '{}' ({})", sp.id, sp.name, sp.kind);
        }
    }

    fn is_static_vehicle(&self, id: PeerId) -> bool {
        self.static_ids.contains(&id)
            && self
                .ctx
                .registry
                .by_id(id)
                .is_some_and(|p| p.kind().is_vehicle())
    }

    /// Inactivity sweep and stale fragment eviction.
    fn monitor(&self) {
        let now = now_millis();
        for conn in self.connections.iter() {
            conn.check_inactivity(now);
        }
        let evicted = self.fragments.lock().evict_expired();
        if evicted > 0 {
            log::debug!("[Router] evicted {} stale fragment sets", evicted);
        }
    }

    fn local_collision(&self) -> bool {
        let mut flag = self.local_collision.lock();
        let clear_after = self.ctx.config.local_id_collision_clear_ms as i64;
        if flag.on && now_millis() - flag.since_millis > clear_after {
            log::info!("[Router] local id collision cleared");
            *flag = Flag {
                on: false,
                since_millis: now_millis(),
            };
        }
        flag.on
    }
}

/// Public handle to the router. Dropping it stops the router.
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

impl MessageRouter {
    pub fn builder(config: CommConfig) -> RouterBuilder {
        RouterBuilder::new(config)
    }

    /// Start transports, announce schedules and the inactivity monitor.
    ///
    /// A stopped router cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        match inner.state.compare_exchange(
            STATE_IDLE,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => return Ok(()),
            Err(_) => return Err(CommError::ManagerStopped),
        }

        let weak = Arc::downgrade(inner);
        let handler: InboundHandler = Arc::new(move |from: InboundInfo, msg: ImcMessage| {
            if let Some(inner) = weak.upgrade() {
                inner.process_inbound(MessageInfo::from_network(from.addr, from.kind), msg);
            }
        });
        for transport in inner.transports() {
            if let Err(e) = transport.start(Arc::clone(&handler)) {
                log::error!("[Router] {} transport failed to start: {}", transport.kind(), e);
                self.stop();
                return Err(e);
            }
        }

        let udp = inner
            .unicast
            .iter()
            .find(|t| t.kind() == TransportKind::Udp)
            .and_then(|t| t.local_port());
        let tcp = inner
            .unicast
            .iter()
            .find(|t| t.kind() == TransportKind::Tcp)
            .and_then(|t| t.local_port());
        inner.announce.set_bound_ports(udp, tcp);

        let sink: Weak<dyn AnnounceSink> = Arc::downgrade(inner) as Weak<RouterInner>;
        inner.announce.start(sink)?;

        let weak = Arc::downgrade(inner);
        inner
            .monitor
            .schedule_ms(TASK_MONITOR, MONITOR_PERIOD_MS as u64, MONITOR_PERIOD_MS, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.monitor();
                }
                Ok(())
            })?;

        log::info!(
            "[Router] started as {} '{}' (udp {:?}, tcp {:?}, multicast {:?})",
            inner.ctx.local_id(),
            inner.ctx.config.system_name,
            udp,
            tcp,
            inner.multicast.as_ref().map(|_| &inner.multicast_ports)
        );
        inner.ctx.status.emit(PeerEvent::RouterStarted);
        Ok(())
    }

    /// Cancel every schedule and release the transports. Idempotent.
    pub fn stop(&self) {
        let inner = &self.inner;
        let previous = inner.state.swap(STATE_STOPPED, Ordering::AcqRel);
        if previous == STATE_STOPPED {
            return;
        }
        inner.announce.stop();
        inner.monitor.stop_all();
        for transport in inner.transports() {
            transport.shutdown();
        }
        if previous == STATE_RUNNING {
            log::info!("[Router] stopped");
            inner.ctx.status.emit(PeerEvent::RouterStopped);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Feed one inbound message, as transports do.
    pub fn process_inbound(&self, info: MessageInfo, msg: ImcMessage) {
        self.inner.process_inbound(info, msg);
    }

    /// Deliver a locally produced message to the listeners of the global bus.
    pub fn post_internal(&self, msg: &ImcMessage) -> usize {
        self.inner.ctx.bus.post(&MessageInfo::local(), msg)
    }

    /// Send `msg` to `dest`.
    ///
    /// `Ok` means a transport accepted the message; `listener` then gets one
    /// callback per transport attempt. On `Err` the listener has already been
    /// told through an `Error` result.
    pub fn send(
        &self,
        msg: ImcMessage,
        dest: PeerId,
        hint: TransportHint,
        listener: Option<DeliveryCallback>,
    ) -> Result<()> {
        self.inner.send(msg, dest, hint, listener)
    }

    /// Send to the peer registered under `name` (case-insensitive).
    pub fn send_by_name(
        &self,
        msg: ImcMessage,
        name: &str,
        hint: TransportHint,
        listener: Option<DeliveryCallback>,
    ) -> Result<()> {
        match self.inner.ctx.registry.by_name(name) {
            Some(peer) => self.inner.send(msg, peer.id(), hint, listener),
            None => {
                log::debug!("[Router] no peer named '{}'", name);
                if let Some(listener) = listener {
                    listener(&msg, &DeliveryResult::Unreachable);
                }
                Err(CommError::UnknownPeer(name.to_string()))
            }
        }
    }

    /// Send a copy to every known CCU. Returns how many were accepted.
    pub fn broadcast_to_ccus(&self, msg: &ImcMessage) -> usize {
        self.inner
            .ctx
            .registry
            .by_type(SystemKind::Ccu, false)
            .into_iter()
            .filter(|p| {
                self.inner
                    .send(msg.clone(), p.id(), TransportHint::Auto, None)
                    .is_ok()
            })
            .count()
    }

    /// Send over TCP and hand back a waiter for the outcome.
    pub fn send_reliably(
        &self,
        msg: ImcMessage,
        dest: PeerId,
        listener: Option<DeliveryCallback>,
    ) -> ResultWaiter {
        let waiter = ResultWaiter::new(RELIABLE_DEADLINE);
        let slot = waiter.listener();
        let callback: DeliveryCallback = Arc::new(move |m, r| {
            slot(m, r);
            if let Some(user) = &listener {
                user(m, r);
            }
        });
        if let Err(e) = self.inner.send(msg, dest, TransportHint::Tcp, Some(callback)) {
            log::debug!("[Router] reliable send to {} refused: {}", dest, e);
        }
        waiter
    }

    /// Blocking reliable send. True only on `Success`.
    ///
    /// Must not be called from a transport or bus callback.
    pub fn send_reliably_blocking(&self, msg: ImcMessage, dest: PeerId) -> bool {
        self.send_reliably(msg, dest, None).wait() == DeliveryResult::Success
    }

    /// Listen on the global bus.
    pub fn register_listener(
        &self,
        handler: MessageHandler,
        filter: Option<MessageFilter>,
    ) -> ListenerId {
        self.inner.ctx.bus.register(handler, filter)
    }

    /// Listen to the messages of one peer. The peer is created if unknown.
    pub fn register_peer_listener(
        &self,
        id: PeerId,
        handler: MessageHandler,
        filter: Option<MessageFilter>,
    ) -> Result<ListenerId> {
        if !id.is_valid_source() {
            return Err(CommError::InvalidPeerId(id.to_pretty_string()));
        }
        let (peer, created) = self.inner.ctx.registry.get_or_create(id);
        if created {
            self.inner.ctx.status.emit(PeerEvent::Added(id));
        }
        Ok(self
            .inner
            .ensure_connection(peer)
            .register_listener(handler, filter))
    }

    /// Remove a global or per-peer listener.
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut removed = self.inner.ctx.bus.unregister(id);
        for conn in self.inner.connections.iter() {
            removed |= conn.unregister_listener(id);
        }
        removed
    }

    /// Status events for `peer`, or for everything with `None`.
    pub fn register_status_listener(
        &self,
        peer: Option<PeerId>,
        listener: StatusListener,
    ) -> ListenerId {
        self.inner.ctx.status.register(peer, listener)
    }

    pub fn unregister_status_listener(&self, id: ListenerId) -> bool {
        self.inner.ctx.status.unregister(id)
    }

    /// Entity id for a local producer, allocated on first call per label.
    /// `None` once every id is taken.
    pub fn register_entity(&self, label: &str) -> Option<u8> {
        let mut map = self.inner.local_entities.write();
        if let Some(id) = map.id_of(label) {
            return Some(id);
        }
        let id = (0..=MAX_LOCAL_ENTITY).find(|id| map.name_of(*id).is_none())?;
        map.insert(id, label);
        log::debug!("[Router] local entity '{}' = {}", label, id);
        Some(id)
    }

    pub fn local_entities(&self) -> EntityMap {
        self.inner.local_entities.read().clone()
    }

    pub fn local_id(&self) -> PeerId {
        self.inner.ctx.local_id()
    }

    pub fn config(&self) -> &CommConfig {
        &self.inner.ctx.config
    }

    pub fn registry(&self) -> &SystemRegistry {
        &self.inner.ctx.registry
    }

    pub fn entities(&self) -> &EntityResolver {
        &self.inner.ctx.entities
    }

    pub fn announce(&self) -> &AnnounceService {
        &self.inner.announce
    }

    pub fn peer(&self, id: PeerId) -> Option<PeerSnapshot> {
        self.inner.ctx.registry.by_id(id).map(|p| p.snapshot())
    }

    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.inner
            .ctx
            .registry
            .all()
            .iter()
            .map(|p| p.snapshot())
            .collect()
    }

    pub fn connection(&self, id: PeerId) -> Option<Arc<PeerConnection>> {
        self.inner.connections.get(&id).map(|c| Arc::clone(c.value()))
    }

    /// Another node is announcing our id.
    pub fn local_id_collision(&self) -> bool {
        self.inner.local_collision()
    }

    /// Global sent messages per second.
    pub fn sent_frequency(&self) -> f64 {
        self.inner.ctx.counters.sent.frequency()
    }

    pub fn stats(&self) -> RouterStats {
        self.inner.stats.snapshot()
    }
}

impl Drop for MessageRouter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::delivery::{DeliveryCallback, DeliveryResult};
    use crate::error::{CommError, Result};
    use crate::message::ImcMessage;
    use crate::reachability::Prober;
    use crate::transport::{InboundHandler, Transport, TransportKind};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::net::{IpAddr, SocketAddr};
    use std::time::Duration;

    /// Records every send and answers synchronously.
    pub struct RecordingTransport {
        pub kind: TransportKind,
        pub port: u16,
        pub outcome: Mutex<Option<DeliveryResult>>,
        pub refuse: Mutex<bool>,
        pub sent: Mutex<Vec<(SocketAddr, ImcMessage)>>,
    }

    impl RecordingTransport {
        pub fn new(kind: TransportKind, port: u16) -> Self {
            Self {
                kind,
                port,
                outcome: Mutex::new(Some(DeliveryResult::Success)),
                refuse: Mutex::new(false),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn sent_to(&self) -> Vec<SocketAddr> {
            self.sent.lock().iter().map(|(a, _)| *a).collect()
        }
    }

    impl Transport for RecordingTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn start(&self, _handler: InboundHandler) -> Result<()> {
            Ok(())
        }

        fn send(&self, dest: SocketAddr, msg: &ImcMessage, callback: DeliveryCallback) -> Result<()> {
            if *self.refuse.lock() {
                return Err(CommError::TransportRejected("refused".into()));
            }
            self.sent.lock().push((dest, msg.clone()));
            if let Some(result) = self.outcome.lock().clone() {
                callback(msg, &result);
            }
            Ok(())
        }

        fn local_port(&self) -> Option<u16> {
            Some(self.port)
        }

        fn shutdown(&self) {}
    }

    pub struct ScriptedProber(pub HashSet<IpAddr>);

    impl Prober for ScriptedProber {
        fn probe(&self, ip: IpAddr, _timeout: Duration) -> bool {
            self.0.contains(&ip)
        }
    }
}
