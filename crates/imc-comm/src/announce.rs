// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Announce emission, announce processing and periodic peer polling.
//!
//! The local announce advertises our name, kind, position and a services
//! list with our reachable endpoints and a per-process instance uid. It is
//! emitted on three independent schedules (multicast, broadcast, unicast to
//! silent peers). Two more schedules poll peers for entity lists, plan
//! database state, beacon configuration and acoustic capabilities, and keep
//! heartbeats flowing to peers we hold authority over.
//!
//! Sending goes through an [`AnnounceSink`], implemented by the router.

use crate::context::CommContext;
use crate::error::Result;
use crate::id::PeerId;
use crate::message::{
    now_millis, Announce, EntityList, EntityListOp, ImcMessage, LblConfig, LblConfigOp, Payload,
    PlanDb, PlanDbOp,
};
use crate::peer::{keys, Attitude, Authority, Endpoints, Location, Peer, SystemKind};
use crate::scheduler::Scheduler;
use crate::services::{self, SCHEME_INFO, SCHEME_NEPTUS, SCHEME_TCP, SCHEME_UDP};
use crate::transport::TransportHint;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Remote UDP port assumed when an announce does not give one.
pub const DEFAULT_UDP_PORT: u16 = 6002;

/// IMC protocol version advertised in `imc+info://`.
pub const IMC_VERSION: &str = "5.4.30";

/// Unchanged uid clears a uid mismatch only after this long.
pub const UID_COOLDOWN_MS: i64 = 3_000;

/// Plan database mirrors and beacon configs older than this are re-polled.
pub const POLL_MAX_AGE_MS: i64 = 20_000;

/// Announce processing slower than this is logged.
const SLOW_PROCESSING: Duration = Duration::from_secs(1);

/// Task names and start delays (ms).
pub const TASK_MULTICAST: &str = "announce-multicast";
pub const TASK_BROADCAST: &str = "announce-broadcast";
pub const TASK_UNICAST: &str = "announce-unicast";
pub const TASK_POLL: &str = "poll";
pub const TASK_HEARTBEAT: &str = "heartbeat";
const DELAY_MULTICAST_MS: u64 = 500;
const DELAY_BROADCAST_MS: u64 = 900;
const DELAY_UNICAST_MS: u64 = 700;
const DELAY_POLL_MS: u64 = 1_000;
const DELAY_HEARTBEAT_MS: u64 = 2_000;

/// How an announce leaves this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceRoute {
    Multicast,
    Broadcast,
    /// Straight to one host, on every announce port
    Unicast(IpAddr),
}

/// Outbound side the announce service drives.
pub trait AnnounceSink: Send + Sync {
    fn emit_announce(&self, route: AnnounceRoute, announce: ImcMessage);

    fn send_to_peer(&self, msg: ImcMessage, dest: PeerId, hint: TransportHint);
}

/// Result of [`AnnounceService::process_announce`].
#[derive(Debug, Clone)]
pub struct AnnounceOutcome {
    pub peer: Arc<Peer>,
    pub created: bool,
    /// An entity list query should follow
    pub request_entity_list: bool,
}

/// Endpoint chosen for one scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Selection {
    addr: Option<SocketAddr>,
    /// Confirmed reachable rather than assumed
    confirmed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct BoundPorts {
    udp: Option<u16>,
    tcp: Option<u16>,
}

pub struct AnnounceService {
    ctx: Arc<CommContext>,
    uid: String,
    ports: Mutex<BoundPorts>,
    scheduler: Scheduler,
    request_id: AtomicU16,
}

impl AnnounceService {
    pub fn new(ctx: Arc<CommContext>) -> Self {
        let uid = format!("{}{:03}", now_millis(), fastrand::u16(0..1000));
        let ports = BoundPorts {
            udp: ctx.config.udp_enabled.then_some(ctx.config.udp_port),
            tcp: ctx.config.tcp_enabled.then_some(ctx.config.tcp_port),
        };
        log::debug!("[Announce] instance uid {}", uid);
        Self {
            ctx,
            uid,
            ports: Mutex::new(ports),
            scheduler: Scheduler::new("imc-announce"),
            request_id: AtomicU16::new(fastrand::u16(..)),
        }
    }

    /// Per-process token carried in our services list.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Ports the transports actually bound.
    pub fn set_bound_ports(&self, udp: Option<u16>, tcp: Option<u16>) {
        *self.ports.lock() = BoundPorts { udp, tcp };
    }

    /// Our services list.
    pub fn services(&self) -> String {
        let mut out = format!(
            "{n}://0.0.0.0/uid/{uid}/;{n}://0.0.0.0/version/{v}/;{i}://0.0.0.0/version/{imc}/;",
            n = SCHEME_NEPTUS,
            i = SCHEME_INFO,
            uid = self.uid,
            v = env!("CARGO_PKG_VERSION"),
            imc = IMC_VERSION,
        );
        let ports = *self.ports.lock();
        let addrs = self.ctx.interfaces.announce_addresses();
        for ip in &addrs {
            if let Some(port) = ports.udp {
                out.push_str(&format!("{}://{}:{}/;", SCHEME_UDP, ip, port));
            }
            if let Some(port) = ports.tcp {
                out.push_str(&format!("{}://{}:{}/;", SCHEME_TCP, ip, port));
            }
        }
        for extra in &self.ctx.config.extra_services {
            if extra.contains("localhost") {
                for ip in &addrs {
                    out.push_str(&extra.replace("localhost", &ip.to_string()));
                    out.push(';');
                }
            } else {
                out.push_str(extra);
                out.push(';');
            }
        }
        out
    }

    /// Fresh announce, addressed to the announce pseudo-destination.
    pub fn build_announce(&self) -> ImcMessage {
        let cfg = &self.ctx.config;
        let mut msg = ImcMessage::new(Payload::Announce(Announce {
            sys_name: cfg.system_name.clone(),
            sys_type: cfg.system_type,
            owner: cfg.owner,
            lat: cfg.latitude_deg.to_radians(),
            lon: cfg.longitude_deg.to_radians(),
            height: cfg.height_m,
            services: self.services(),
        }));
        msg.header.src = cfg.local_id;
        msg.header.dst = PeerId::ANNOUNCE;
        msg.set_timestamp_millis(now_millis());
        msg
    }

    /// EntityList query for a peer.
    pub fn entity_list_request() -> ImcMessage {
        ImcMessage::new(Payload::EntityList(EntityList {
            op: EntityListOp::Query,
            list: String::new(),
        }))
    }

    fn next_request_id(&self) -> u16 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Learn a peer from its announce. `observed` is the address the
    /// announce arrived from.
    pub fn process_announce(
        &self,
        observed: IpAddr,
        msg: &ImcMessage,
        ann: &Announce,
    ) -> AnnounceOutcome {
        let started = Instant::now();
        let id = msg.src();
        let timeout = self.ctx.config.reachability_timeout();

        let udp_candidates = services::endpoints_for_scheme(&ann.services, SCHEME_UDP);
        let tcp_candidates = services::endpoints_for_scheme(&ann.services, SCHEME_TCP);
        let udp = self.select(observed, &udp_candidates, timeout);
        let tcp = self.select(observed, &tcp_candidates, timeout);
        log::debug!(
            "[Announce] {}@{} from {}: udp {:?} tcp {:?}",
            ann.sys_name,
            id,
            observed,
            udp,
            tcp
        );

        let (peer, created) = self.ctx.registry.get_or_create(id);
        let old_name = peer.name();

        peer.set_services(&ann.services);
        let now = now_millis();
        process_uid(&peer, &ann.services, now);
        if peer.id_collision().on {
            self.ctx.entities.clear_aliases(&old_name);
        }
        if !ann.sys_name.is_empty() {
            peer.set_name(&ann.sys_name);
        }
        peer.set_kind(SystemKind::from_system_type(ann.sys_type));

        let confirmed = [udp, tcp].into_iter().find(|s| s.confirmed);
        let current = peer.endpoints();
        let host = match confirmed.and_then(|s| s.addr) {
            Some(addr) => Some((addr.ip().to_string(), false)),
            None => {
                let all: Vec<SocketAddr> = udp_candidates
                    .iter()
                    .chain(tcp_candidates.iter())
                    .copied()
                    .collect();
                match longest_prefix_match(observed, &all) {
                    Some(ip) => Some((ip.to_string(), true)),
                    None if all.iter().any(|a| a.ip().to_string() == current.host) => None,
                    None => Some((observed.to_string(), true)),
                }
            }
        };

        peer.update_endpoints(|ep| {
            if let Some((host, guessed)) = host {
                ep.host = host;
                ep.host_guessed = guessed;
            }
            match udp.addr {
                Some(addr) => ep.udp_port = addr.port(),
                None if ep.udp_port == 0 => ep.udp_port = DEFAULT_UDP_PORT,
                None => {}
            }
            match tcp.addr {
                Some(addr) => {
                    ep.tcp_enabled = true;
                    ep.tcp_port = addr.port();
                }
                None if tcp_candidates.is_empty() => ep.tcp_enabled = false,
                None => {}
            }
            ep.udp_enabled = !(ep.tcp_enabled && udp_candidates.is_empty());
        });
        peer.set_announce_state_at(true, now);

        let t = msg.timestamp_millis();
        if ann.lat != 0.0 && ann.lon != 0.0 {
            let location = Location {
                height: f64::from(ann.height),
                ..Location::new(ann.lat.to_degrees(), ann.lon.to_degrees())
            };
            peer.set_location(location, t);
        }
        if let Some(heading) = services::heading_from_services(&ann.services) {
            if heading.is_finite() {
                peer.set_attitude(Attitude::heading(heading), t);
            }
        }

        let request_entity_list = created || !self.ctx.entities.has_entities(&peer.name());
        let elapsed = started.elapsed();
        if elapsed > SLOW_PROCESSING {
            log::warn!(
                "[Announce] processing announce of {} took {:?}; consider lowering reachability_timeout_ms ({})",
                id,
                elapsed,
                self.ctx.config.reachability_timeout_ms
            );
        }
        let Endpoints { host, udp_port, tcp_port, .. } = peer.endpoints();
        log::debug!(
            "[Announce] {} '{}' at {} udp {} tcp {}",
            id,
            peer.name(),
            host,
            udp_port,
            tcp_port
        );
        AnnounceOutcome {
            peer,
            created,
            request_entity_list,
        }
    }

    /// Three tiers: a reachable candidate on the observed address, then any
    /// reachable candidate, then the first candidate unconfirmed.
    fn select(&self, observed: IpAddr, candidates: &[SocketAddr], timeout: Duration) -> Selection {
        let reach = &self.ctx.reachability;
        let on_observed: Vec<SocketAddr> = candidates
            .iter()
            .filter(|a| a.ip() == observed)
            .copied()
            .collect();
        for cand in &on_observed {
            if reach.first_reachable_of(&[*cand], timeout).is_some() {
                return Selection {
                    addr: Some(*cand),
                    confirmed: true,
                };
            }
        }
        if let Some(addr) = reach.first_reachable_of(candidates, timeout) {
            return Selection {
                addr: Some(addr),
                confirmed: true,
            };
        }
        Selection {
            addr: candidates.first().copied(),
            confirmed: false,
        }
    }

    /// Start the emission and polling schedules. Disabled schedules
    /// (negative period) are skipped.
    pub fn start(self: &Arc<Self>, sink: Weak<dyn AnnounceSink>) -> Result<()> {
        let cfg = &self.ctx.config;
        if cfg.multicast_enabled {
            self.schedule(
                TASK_MULTICAST,
                DELAY_MULTICAST_MS,
                cfg.announce_multicast_period_ms,
                &sink,
                |svc, sink| sink.emit_announce(AnnounceRoute::Multicast, svc.build_announce()),
            )?;
            self.schedule(
                TASK_BROADCAST,
                DELAY_BROADCAST_MS,
                cfg.announce_broadcast_period_ms,
                &sink,
                |svc, sink| sink.emit_announce(AnnounceRoute::Broadcast, svc.build_announce()),
            )?;
        }
        if cfg.announce_unicast_enabled {
            self.schedule(
                TASK_UNICAST,
                DELAY_UNICAST_MS,
                cfg.announce_unicast_period_ms,
                &sink,
                |svc, sink| svc.announce_to_inactive(sink),
            )?;
        }
        self.schedule(TASK_POLL, DELAY_POLL_MS, cfg.poll_period_ms, &sink, |svc, sink| {
            svc.poll(sink)
        })?;
        self.schedule(
            TASK_HEARTBEAT,
            DELAY_HEARTBEAT_MS,
            cfg.heartbeat_period_ms,
            &sink,
            |svc, sink| svc.heartbeat(sink),
        )?;
        log::debug!("[Announce] tasks {:?}", self.scheduler.task_names());
        Ok(())
    }

    fn schedule<F>(
        self: &Arc<Self>,
        name: &str,
        delay_ms: u64,
        period_ms: i64,
        sink: &Weak<dyn AnnounceSink>,
        job: F,
    ) -> Result<bool>
    where
        F: Fn(&AnnounceService, &dyn AnnounceSink) + Send + 'static,
    {
        let svc = Arc::downgrade(self);
        let sink = Weak::clone(sink);
        self.scheduler.schedule_ms(name, delay_ms, period_ms, move || {
            if let (Some(svc), Some(sink)) = (svc.upgrade(), sink.upgrade()) {
                job(&svc, sink.as_ref());
            }
            Ok(())
        })
    }

    pub fn is_task_scheduled(&self, name: &str) -> bool {
        self.scheduler.is_scheduled(name)
    }

    /// Cancel every schedule.
    pub fn stop(&self) {
        self.scheduler.stop_all();
    }

    fn announce_to_inactive(&self, sink: &dyn AnnounceSink) {
        let announce = self.build_announce();
        for peer in self.ctx.registry.all() {
            if peer.is_active() {
                continue;
            }
            let host = peer.endpoints().host;
            match host.parse::<IpAddr>() {
                Ok(ip) => sink.emit_announce(AnnounceRoute::Unicast(ip), announce.clone()),
                Err(_) if host.is_empty() => {}
                Err(_) => log::trace!("[Announce] {} has no usable host '{}'", peer.id(), host),
            }
        }
    }

    /// One polling round over every known peer.
    pub fn poll(&self, sink: &dyn AnnounceSink) {
        let now = now_millis();
        for peer in self.ctx.registry.all() {
            let id = peer.id();
            if !self.ctx.entities.has_entities(&peer.name()) {
                log::debug!("[Announce] EntityList request to {}", id);
                sink.send_to_peer(Self::entity_list_request(), id, TransportHint::Auto);
            }

            if peer.plan_db().age_millis(now) >= POLL_MAX_AGE_MS {
                log::debug!("[Announce] PlanDB request to {}", id);
                let req = PlanDb::request(PlanDbOp::GetState, self.next_request_id());
                sink.send_to_peer(ImcMessage::new(Payload::PlanDb(req)), id, TransportHint::Auto);
            }

            if peer.kind().is_vehicle() {
                let fresh = peer
                    .data_time(keys::LBL_CONFIG)
                    .is_some_and(|t| now - t < POLL_MAX_AGE_MS);
                if !fresh {
                    log::debug!("[Announce] LblConfig request to {}", id);
                    let cfg = LblConfig {
                        op: LblConfigOp::GetCfg,
                        beacons: Vec::new(),
                    };
                    sink.send_to_peer(
                        ImcMessage::new(Payload::LblConfig(cfg)),
                        id,
                        TransportHint::Auto,
                    );
                }
            }

            if services::service_provided(&peer.services(), "*", "acoustic") {
                log::debug!("[Announce] AcousticSystemsQuery to {}", id);
                sink.send_to_peer(
                    ImcMessage::new(Payload::AcousticSystemsQuery),
                    id,
                    TransportHint::Auto,
                );
            }
        }
    }

    /// Heartbeat every peer we hold some authority over.
    pub fn heartbeat(&self, sink: &dyn AnnounceSink) {
        let cfg = &self.ctx.config;
        for peer in self.ctx.registry.all() {
            if matches!(peer.authority(), Authority::Off | Authority::None) {
                continue;
            }
            let ep = peer.endpoints();
            let mut msg = ImcMessage::new(Payload::Heartbeat);
            msg.set_timestamp_millis(now_millis());
            if ep.udp_enabled && cfg.udp_enabled {
                sink.send_to_peer(msg.clone(), peer.id(), TransportHint::Udp);
            }
            if ep.tcp_enabled && cfg.tcp_enabled {
                sink.send_to_peer(msg, peer.id(), TransportHint::Tcp);
            }
        }
    }
}

impl Drop for AnnounceService {
    fn drop(&mut self) {
        self.scheduler.stop_all();
    }
}

/// Track the instance uid a peer advertises. A different uid means another
/// process took over the id (or two share it).
fn process_uid(peer: &Peer, services: &str, now: i64) {
    let uid = services::uid_from_services(services).filter(|u| !u.is_empty());
    let last = peer.uid().map(|(u, _)| u).filter(|u| !u.is_empty());
    match (last, uid) {
        (None, uid) => {
            if let Some(uid) = uid {
                peer.set_uid(&uid, now);
            }
            if peer.id_collision().on {
                peer.set_id_collision(false);
            }
        }
        (Some(last), Some(uid)) if last.eq_ignore_ascii_case(&uid) => {
            let flag = peer.id_collision();
            if flag.on && now - flag.since_millis > UID_COOLDOWN_MS {
                peer.set_id_collision(false);
            }
        }
        (Some(last), uid) => {
            log::warn!(
                "[Announce] {} changed instance uid {} -> {}",
                peer.id(),
                last,
                uid.as_deref().unwrap_or("<none>")
            );
            peer.set_uid(uid.as_deref().unwrap_or(""), now);
            peer.set_id_collision(true);
        }
    }
}

/// Candidate sharing the most leading address bytes with `observed`.
/// Candidates sharing none are ignored; ties keep the first.
fn longest_prefix_match(observed: IpAddr, candidates: &[SocketAddr]) -> Option<IpAddr> {
    let observed = octets(observed);
    let mut best: Option<(usize, IpAddr)> = None;
    for cand in candidates {
        let bytes = octets(cand.ip());
        if bytes.len() != observed.len() {
            continue;
        }
        let common = bytes
            .iter()
            .zip(&observed)
            .take_while(|(a, b)| a == b)
            .count();
        if common > 0 && best.map_or(true, |(n, _)| common > n) {
            best = Some((common, cand.ip()));
        }
    }
    best.map(|(_, ip)| ip)
}

fn octets(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}
