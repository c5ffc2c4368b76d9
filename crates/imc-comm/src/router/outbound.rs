// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound path: stamping, unicast transport selection and multicast or
//! broadcast fan-out.

use super::{RouterInner, StatsCounters};
use crate::announce::{AnnounceRoute, AnnounceSink};
use crate::config::{TRANSPORT_TCP, TRANSPORT_UDP};
use crate::delivery::{DeliveryCallback, DeliveryResult, DeliveryTracker};
use crate::error::{CommError, Result};
use crate::id::PeerId;
use crate::message::{now_millis, ImcMessage};
use crate::peer::{Authority, Endpoints};
use crate::transport::{Transport, TransportHint, TransportKind};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;

impl RouterInner {
    pub(super) fn send(
        &self,
        mut msg: ImcMessage,
        dest: PeerId,
        hint: TransportHint,
        listener: Option<DeliveryCallback>,
    ) -> Result<()> {
        msg.header.src = self.ctx.local_id();
        if msg.header.dst == PeerId::NULL {
            msg.header.dst = dest;
        }
        msg.set_timestamp_millis(now_millis());

        let mut counters = vec![Arc::clone(&self.ctx.counters)];
        if let Some(conn) = self.connections.get(&dest) {
            counters.push(Arc::clone(conn.counters()));
        }
        let tracker = DeliveryTracker::new(listener, counters);

        match self.dispatch(&msg, dest, hint, &tracker) {
            Ok(()) => Ok(()),
            Err(e) => {
                StatsCounters::bump(&self.stats.send_failures);
                log::debug!("[Router] {} to {} failed: {}", msg.abbrev(), dest, e);
                tracker.complete(&msg, &DeliveryResult::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn dispatch(
        &self,
        msg: &ImcMessage,
        dest: PeerId,
        hint: TransportHint,
        tracker: &Arc<DeliveryTracker>,
    ) -> Result<()> {
        if !self.is_running() {
            return Err(CommError::ManagerStopped);
        }
        let peer = self.ctx.registry.by_id(dest);
        if peer.as_ref().is_some_and(|p| p.authority() == Authority::Off) {
            return Err(CommError::AuthorityOff(dest));
        }

        if hint.wants_multicast() || hint.wants_broadcast() {
            return self.fan_out(msg, dest, hint, tracker);
        }

        let Some(peer) = peer else {
            return Err(CommError::NoTransportAvailable(dest));
        };
        let endpoints = peer.endpoints();
        // one logical send, however many transports refuse it
        tracker.mark_attempt();
        for kind in self.transport_candidates(&endpoints, hint) {
            let Some(transport) = self.unicast.iter().find(|t| t.kind() == kind) else {
                continue;
            };
            let port = match kind {
                TransportKind::Tcp => endpoints.tcp_port,
                _ => endpoints.udp_port,
            };
            let Some(addr) = resolve(&endpoints.host, port) else {
                log::debug!(
                    "[Router] cannot resolve '{}' for {}",
                    endpoints.host,
                    dest
                );
                break;
            };
            match transport.send(addr, msg, tracker.callback()) {
                Ok(()) => {
                    StatsCounters::bump(&self.stats.sent);
                    log::trace!("[Router] {} to {} via {} {}", msg.abbrev(), dest, kind, addr);
                    return Ok(());
                }
                Err(e) => log::debug!("[Router] {} refused {} to {}: {}", kind, msg.abbrev(), addr, e),
            }
        }
        Err(CommError::NoTransportAvailable(dest))
    }

    /// Unicast transports to try, in order.
    pub(super) fn transport_candidates(
        &self,
        endpoints: &Endpoints,
        hint: TransportHint,
    ) -> Vec<TransportKind> {
        let mut order: Vec<TransportKind> = self
            .ctx
            .config
            .transports_preference
            .iter()
            .filter_map(|name| parse_transport_name(name))
            .collect();
        order.dedup();
        if let Some(wanted) = hint.unicast() {
            order.retain(|k| *k != wanted);
            order.insert(0, wanted);
        }
        order.retain(|k| match k {
            TransportKind::Udp => endpoints.udp_enabled,
            TransportKind::Tcp => endpoints.tcp_enabled,
            TransportKind::Multicast => false,
        });
        order
    }

    /// One independent attempt per multicast port and per broadcast address
    /// and port. Every attempt reports through the tracker; failures are
    /// uncertain rather than errors.
    fn fan_out(
        &self,
        msg: &ImcMessage,
        dest: PeerId,
        hint: TransportHint,
        tracker: &Arc<DeliveryTracker>,
    ) -> Result<()> {
        let Some(transport) = &self.multicast else {
            return Err(CommError::NoTransportAvailable(dest));
        };

        let mut targets: Vec<SocketAddr> = Vec::new();
        if hint.wants_multicast() {
            let group = IpAddr::V4(self.ctx.config.multicast_address);
            targets.extend(self.multicast_ports.iter().map(|p| SocketAddr::new(group, *p)));
        }
        if hint.wants_broadcast() {
            for bcast in self.ctx.interfaces.broadcast_addresses() {
                targets.extend(
                    self.multicast_ports
                        .iter()
                        .map(|p| SocketAddr::new(IpAddr::V4(bcast), *p)),
                );
            }
        }
        if targets.is_empty() {
            return Err(CommError::NoTransportAvailable(dest));
        }

        self.send_each(transport.as_ref(), msg, &targets, tracker);
        Ok(())
    }

    fn send_each(
        &self,
        transport: &dyn Transport,
        msg: &ImcMessage,
        targets: &[SocketAddr],
        tracker: &Arc<DeliveryTracker>,
    ) {
        for addr in targets {
            tracker.mark_attempt();
            let t = Arc::clone(tracker);
            let callback: DeliveryCallback = Arc::new(move |m, result| {
                t.complete(m, &as_uncertain(result));
            });
            match transport.send(*addr, msg, callback) {
                Ok(()) => StatsCounters::bump(&self.stats.sent),
                Err(e) => {
                    log::debug!("[Router] {} to {} not handed over: {}", msg.abbrev(), addr, e);
                    tracker.complete(msg, &DeliveryResult::Uncertain(e.to_string()));
                }
            }
        }
    }
}

impl AnnounceSink for RouterInner {
    fn emit_announce(&self, route: AnnounceRoute, announce: ImcMessage) {
        let hint = match route {
            AnnounceRoute::Multicast => TransportHint::Multicast,
            AnnounceRoute::Broadcast => TransportHint::Broadcast,
            AnnounceRoute::Unicast(ip) => {
                self.announce_unicast(ip, announce);
                return;
            }
        };
        if let Err(e) = self.send(announce, PeerId::ANNOUNCE, hint, None) {
            log::debug!("[Router] announce ({:?}) not sent: {}", route, e);
        }
    }

    fn send_to_peer(&self, msg: ImcMessage, dest: PeerId, hint: TransportHint) {
        if let Err(e) = self.send(msg, dest, hint, None) {
            log::trace!("[Router] periodic send to {} failed: {}", dest, e);
        }
    }
}

impl RouterInner {
    /// Announce straight to `ip` on every announce port.
    fn announce_unicast(&self, ip: IpAddr, mut announce: ImcMessage) {
        if !self.is_running() {
            return;
        }
        let transport = self
            .unicast
            .iter()
            .find(|t| t.kind() == TransportKind::Udp)
            .or(self.multicast.as_ref());
        let Some(transport) = transport else {
            return;
        };
        announce.set_timestamp_millis(now_millis());
        let targets: Vec<SocketAddr> = self
            .multicast_ports
            .iter()
            .map(|p| SocketAddr::new(ip, *p))
            .collect();
        let tracker = DeliveryTracker::new(None, vec![Arc::clone(&self.ctx.counters)]);
        self.send_each(transport.as_ref(), &announce, &targets, &tracker);
    }
}

fn parse_transport_name(name: &str) -> Option<TransportKind> {
    if name.eq_ignore_ascii_case(TRANSPORT_UDP) {
        Some(TransportKind::Udp)
    } else if name.eq_ignore_ascii_case(TRANSPORT_TCP) {
        Some(TransportKind::Tcp)
    } else {
        log::debug!("[Router] unknown transport '{}' in preference list", name);
        None
    }
}

fn as_uncertain(result: &DeliveryResult) -> DeliveryResult {
    match result {
        DeliveryResult::Success | DeliveryResult::Uncertain(_) => result.clone(),
        other => DeliveryResult::Uncertain(other.to_string()),
    }
}

/// Host text to a socket address. Port 0 never resolves.
fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    if host.is_empty() || port == 0 {
        return None;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, port));
    }
    (host, port).to_socket_addrs().ok()?.next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_endpoints(udp: bool, tcp: bool) -> Endpoints {
        Endpoints {
            host: "10.0.0.5".into(),
            host_guessed: false,
            udp_port: 6002,
            udp_enabled: udp,
            tcp_port: 6001,
            tcp_enabled: tcp,
        }
    }

    #[test]
    fn test_resolve_literal_and_invalid() {
        assert_eq!(
            resolve("10.0.0.5", 6002),
            Some("10.0.0.5:6002".parse().unwrap())
        );
        assert_eq!(resolve("", 6002), None);
        assert_eq!(resolve("10.0.0.5", 0), None);
    }

    #[test]
    fn test_failures_become_uncertain() {
        assert_eq!(as_uncertain(&DeliveryResult::Success), DeliveryResult::Success);
        assert!(matches!(
            as_uncertain(&DeliveryResult::Timeout),
            DeliveryResult::Uncertain(_)
        ));
        assert!(matches!(
            as_uncertain(&DeliveryResult::Error("io".into())),
            DeliveryResult::Uncertain(_)
        ));
    }

    #[test]
    fn test_transport_name_parsing() {
        assert_eq!(parse_transport_name("udp"), Some(TransportKind::Udp));
        assert_eq!(parse_transport_name("TCP"), Some(TransportKind::Tcp));
        assert_eq!(parse_transport_name("Iridium"), None);
    }

    #[test]
    fn test_candidates_follow_preference_and_hint() {
        use crate::router::test_support::{RecordingTransport, ScriptedProber};
        use crate::config::CommConfig;
        use crate::entities::EntityResolver;
        use crate::router::MessageRouter;
        use crate::transport::StaticInterfaces;
        use std::collections::HashSet;

        let router = MessageRouter::builder(CommConfig {
            multicast_enabled: false,
            ..CommConfig::default()
        })
        .transport(Arc::new(RecordingTransport::new(TransportKind::Udp, 6001)))
        .prober(Arc::new(ScriptedProber(HashSet::new())))
        .interfaces(Arc::new(StaticInterfaces::default()))
        .entities(EntityResolver::in_memory())
        .build()
        .unwrap();
        let inner = &router.inner;

        let both = make_endpoints(true, true);
        assert_eq!(
            inner.transport_candidates(&both, TransportHint::Auto),
            vec![TransportKind::Udp, TransportKind::Tcp]
        );
        assert_eq!(
            inner.transport_candidates(&both, TransportHint::Tcp),
            vec![TransportKind::Tcp, TransportKind::Udp]
        );
        assert_eq!(
            inner.transport_candidates(&make_endpoints(true, false), TransportHint::Tcp),
            vec![TransportKind::Udp]
        );
        assert!(inner
            .transport_candidates(&make_endpoints(false, false), TransportHint::Auto)
            .is_empty());
    }

    #[test]
    fn test_fallthrough_counts_one_send() {
        use crate::config::CommConfig;
        use crate::entities::EntityResolver;
        use crate::peer::Peer;
        use crate::router::test_support::{RecordingTransport, ScriptedProber};
        use crate::router::MessageRouter;
        use crate::transport::StaticInterfaces;
        use std::collections::HashSet;

        let udp = Arc::new(RecordingTransport::new(TransportKind::Udp, 6001));
        let tcp = Arc::new(RecordingTransport::new(TransportKind::Tcp, 6001));
        *udp.refuse.lock() = true;
        let router = MessageRouter::builder(CommConfig {
            multicast_enabled: false,
            poll_period_ms: -1,
            heartbeat_period_ms: -1,
            ..CommConfig::default()
        })
        .transport(udp.clone())
        .transport(tcp.clone())
        .prober(Arc::new(ScriptedProber(HashSet::new())))
        .interfaces(Arc::new(StaticInterfaces::default()))
        .entities(EntityResolver::in_memory())
        .build()
        .unwrap();
        router.start().unwrap();

        let dest = PeerId::new(0x0c05);
        let peer = router.registry().register(Peer::with_name(dest, "lauv-seacon-1"));
        peer.update_endpoints(|ep| *ep = make_endpoints(true, true));

        router
            .send(
                ImcMessage::new(crate::message::Payload::Heartbeat),
                dest,
                TransportHint::Auto,
                None,
            )
            .unwrap();

        assert!(udp.sent_to().is_empty());
        assert_eq!(tcp.sent_to(), vec!["10.0.0.5:6001".parse().unwrap()]);
        let counters = &router.inner.ctx.counters;
        assert_eq!(counters.to_send.total(), 1);
        assert_eq!(counters.sent.total(), 1);
    }
}
