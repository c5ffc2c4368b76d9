// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound dispatch.
//!
//! Order of evaluation for one message:
//!
//! 1. our own id on an announce: collision check, generic bus only
//! 2. reserved or our own id otherwise: dropped
//! 3. per-type pre-processing (announce, entity list/info, message parts,
//!    state reports), then delivery to the peer's connection
//! 4. unknown id: source address mapping, redirect to the first peer, or a
//!    new connection bootstrapped from the source address
//! 5. nothing matched: generic bus

use super::{RouterInner, StatsCounters};
use crate::announce::{AnnounceService, AnnounceSink};
use crate::bus::{MessageInfo, PeerEvent};
use crate::connection::PeerConnection;
use crate::id::PeerId;
use crate::message::{
    now_millis, Announce, EntityList, EntityListOp, ImcMessage, MessagePart, Payload,
};
use crate::peer::{Endpoints, Flag};
use crate::services;
use crate::state_report;
use crate::transport::{TransportHint, TransportKind};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Dispatch slower than this is logged.
const SLOW_DISPATCH: Duration = Duration::from_secs(1);

impl RouterInner {
    pub(super) fn process_inbound(&self, info: MessageInfo, msg: ImcMessage) {
        StatsCounters::bump(&self.stats.inbound);
        let id = msg.src();
        let local = self.ctx.local_id();

        if id == local {
            if let Payload::Announce(ann) = &msg.payload {
                self.check_local_collision(&info, ann);
                self.ctx.bus.post(&info, &msg);
                return;
            }
        }
        if !id.is_valid_source() || id == local {
            log::debug!(
                "[Router] dropping {} with source {} from {:?}",
                msg.abbrev(),
                id.to_pretty_string(),
                info.publisher
            );
            StatsCounters::bump(&self.stats.dropped);
            return;
        }

        let started = Instant::now();
        let mut conn = self.connection_of(id);
        let mut synthesized = Vec::new();
        match &msg.payload {
            Payload::Announce(ann) => conn = Some(self.process_peer_announce(&info, &msg, ann)),
            Payload::EntityList(list) => self.process_entity_list(&msg, list),
            Payload::EntityInfo(ent) => {
                self.ctx
                    .entities
                    .add_entity(&self.peer_name(id), ent.id, &ent.label);
            }
            Payload::MessagePart(part) => self.process_message_part(&info, id, part),
            Payload::StateReport(_)
            | Payload::ReportedState(_)
            | Payload::AssetReport(_)
            | Payload::RemoteSensorInfo(_) => {
                synthesized = state_report::process(&self.ctx, &msg);
            }
            _ => {}
        }

        if conn.is_none() && self.is_static_vehicle(id) {
            conn = self
                .ctx
                .registry
                .by_id(id)
                .map(|peer| self.ensure_connection(peer));
        }

        match conn {
            Some(conn) => deliver(&conn, &info, &msg, &synthesized),
            None => self.process_unknown(&info, &msg, &synthesized),
        }

        let elapsed = started.elapsed();
        if elapsed > SLOW_DISPATCH {
            log::warn!(
                "[Router] {} from {} took {} ms",
                msg.abbrev(),
                id,
                elapsed.as_millis()
            );
        }
    }

    fn connection_of(&self, id: PeerId) -> Option<Arc<PeerConnection>> {
        self.connections.get(&id).map(|c| Arc::clone(c.value()))
    }

    fn peer_name(&self, id: PeerId) -> String {
        self.ctx
            .registry
            .by_id(id)
            .map(|p| p.name())
            .unwrap_or_else(|| id.to_pretty_string())
    }

    fn check_local_collision(&self, info: &MessageInfo, ann: &Announce) {
        let theirs = services::uid_from_services(&ann.services);
        if theirs.as_deref() == Some(self.announce.uid()) {
            return;
        }
        let place = match info.publisher {
            Some(addr) if self.ctx.interfaces.is_local_address(addr.ip()) => "this computer",
            _ => "our network",
        };
        let mut flag = self.local_collision.lock();
        if !flag.on {
            log::warn!(
                "[Router] '{}' on {} is announcing our id {}",
                ann.sys_name,
                place,
                self.ctx.local_id()
            );
        }
        *flag = Flag {
            on: true,
            since_millis: now_millis(),
        };
    }

    fn process_peer_announce(
        &self,
        info: &MessageInfo,
        msg: &ImcMessage,
        ann: &Announce,
    ) -> Arc<PeerConnection> {
        let id = msg.src();
        let observed = info
            .publisher
            .map(|a| a.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let outcome = self.announce.process_announce(observed, msg, ann);
        if outcome.created {
            log::info!("[Router] discovered {} '{}'", id, ann.sys_name);
            self.ctx.status.emit(PeerEvent::Added(id));
        }
        self.learn_mapping(id, &outcome.peer.endpoints());
        let conn = self.ensure_connection(Arc::clone(&outcome.peer));
        if outcome.request_entity_list {
            log::debug!("[Router] EntityList request to {}", id);
            self.send_to_peer(
                AnnounceService::entity_list_request(),
                id,
                TransportHint::Auto,
            );
        }
        conn
    }

    fn process_entity_list(&self, msg: &ImcMessage, list: &EntityList) {
        match list.op {
            EntityListOp::Report => {
                self.ctx
                    .entities
                    .set_entities(&self.peer_name(msg.src()), &list.list);
            }
            EntityListOp::Query => {
                let dst = msg.dst();
                if dst != self.ctx.local_id() && dst != PeerId::BROADCAST {
                    return;
                }
                let reply = EntityList {
                    op: EntityListOp::Report,
                    list: self.local_entities.read().to_tuple_list(),
                };
                self.send_to_peer(
                    ImcMessage::new(Payload::EntityList(reply)),
                    msg.src(),
                    TransportHint::Auto,
                );
            }
        }
    }

    fn process_message_part(&self, info: &MessageInfo, src: PeerId, part: &MessagePart) {
        let complete = self.fragments.lock().insert(src, part);
        let Some(bytes) = complete else {
            return;
        };
        match self.ctx.codec.decode(&bytes) {
            Ok(whole) => {
                log::debug!(
                    "[Router] reassembled {} from {} ({} parts)",
                    whole.abbrev(),
                    src,
                    part.num_frags
                );
                self.process_inbound(info.clone(), whole);
            }
            Err(e) => log::debug!("[Router] reassembled message from {} undecodable: {}", src, e),
        }
    }

    fn process_unknown(&self, info: &MessageInfo, msg: &ImcMessage, synthesized: &[ImcMessage]) {
        let id = msg.src();

        if let Some(addr) = info.publisher {
            let mapped = self
                .udp_on_ip
                .get(&self.mapping_key(addr))
                .map(|e| *e.value());
            if let Some(conn) = mapped.and_then(|m| self.connection_of(m)) {
                log::debug!(
                    "[Router] {} from {} ({}) redirected to {}",
                    msg.abbrev(),
                    id,
                    addr,
                    conn.peer().id()
                );
                StatsCounters::bump(&self.stats.redirected);
                deliver(&conn, info, msg, synthesized);
                return;
            }
        }

        if self.ctx.config.redirect_unknown_to_first {
            let first = self
                .ctx
                .registry
                .all()
                .into_iter()
                .find_map(|p| self.connection_of(p.id()));
            if let Some(conn) = first {
                log::debug!("[Router] {} redirected to first peer {}", id, conn.peer().id());
                StatsCounters::bump(&self.stats.redirected);
                deliver(&conn, info, msg, synthesized);
                return;
            }
        }

        if let Some(addr) = info.publisher {
            let conn = self.bootstrap(id, addr, info.transport);
            deliver(&conn, info, msg, synthesized);
            return;
        }

        StatsCounters::bump(&self.stats.posted);
        self.ctx.bus.post(info, msg);
    }

    /// New connection for an unknown id, addressed at its source.
    fn bootstrap(
        &self,
        id: PeerId,
        addr: SocketAddr,
        transport: Option<TransportKind>,
    ) -> Arc<PeerConnection> {
        let (peer, created) = self.ctx.registry.get_or_create(id);
        peer.update_endpoints(|ep| {
            if ep.host.is_empty() {
                ep.host = addr.ip().to_string();
                ep.host_guessed = true;
            }
            if transport == Some(TransportKind::Udp) && !ep.udp_enabled {
                ep.udp_port = addr.port();
                ep.udp_enabled = true;
            }
        });
        let conn = self.ensure_connection(peer);
        conn.set_bootstrap_addr(addr);
        if self.ctx.config.change_id_by_source_ip {
            self.udp_on_ip.insert(self.mapping_key(addr), id);
        }
        StatsCounters::bump(&self.stats.bootstrapped);
        log::info!("[Router] bootstrapped {} from {}", id, addr);
        if created {
            self.ctx.status.emit(PeerEvent::Added(id));
        }
        conn
    }

    /// Remember which id talks from the peer's advertised UDP endpoint.
    fn learn_mapping(&self, id: PeerId, endpoints: &Endpoints) {
        if !self.ctx.config.change_id_by_source_ip || !endpoints.udp_enabled {
            return;
        }
        let Ok(ip) = endpoints.host.parse::<IpAddr>() else {
            return;
        };
        let key = self.mapping_key(SocketAddr::new(ip, endpoints.udp_port));
        if let Some(previous) = self.udp_on_ip.insert(key.clone(), id) {
            if previous != id {
                log::debug!("[Router] {} moved from {} to {}", key, previous, id);
            }
        }
    }

    fn mapping_key(&self, addr: SocketAddr) -> String {
        if self.ctx.config.filter_by_port {
            addr.to_string()
        } else {
            addr.ip().to_string()
        }
    }
}

/// Synthesized messages first, then the original.
fn deliver(conn: &PeerConnection, info: &MessageInfo, msg: &ImcMessage, synthesized: &[ImcMessage]) {
    for extra in synthesized {
        conn.on_message(info, extra);
    }
    conn.on_message(info, msg);
}
