// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-peer inbound processing.
//!
//! A [`PeerConnection`] decides when its peer is active, extracts derived
//! state from the message kinds the core understands and posts every
//! message to the peer's own bus and to the global bus.

use crate::bus::{EventBus, ListenerId, MessageFilter, MessageHandler, MessageInfo, PeerEvent};
use crate::context::CommContext;
use crate::delivery::{FrequencyCalculator, SendCounters};
use crate::geo;
use crate::message::{
    now_millis, EstimatedState, ImcMessage, LblConfigOp, Payload, PlanDb, PlanDbArg, PlanDbOp,
    PlanDbType, PlanState, DEFAULT_ENTITY_ID,
};
use crate::peer::{keys, Attitude, Authority, BlackboardValue, Location, Peer};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Arrivals needed inside [`ACTIVITY_WINDOW_MS`] to turn a peer active.
pub const ACTIVITY_ARRIVALS: usize = 3;
pub const ACTIVITY_WINDOW_MS: i64 = 3_000;

/// Silence after which a peer is marked inactive.
pub const INACTIVITY_TIMEOUT_MS: i64 = 10_000;

/// Named RPM entries are pruned at most this often.
const RPM_PRUNE_AFTER_MS: i64 = 2_000;

/// Last arrival times, oldest first.
#[derive(Debug, Default)]
struct ArrivalWindow {
    slots: [i64; ACTIVITY_ARRIVALS],
    filled: usize,
}

impl ArrivalWindow {
    fn push(&mut self, t: i64) {
        self.slots.rotate_left(1);
        self.slots[ACTIVITY_ARRIVALS - 1] = t;
        self.filled = (self.filled + 1).min(ACTIVITY_ARRIVALS);
    }

    fn is_dense(&self) -> bool {
        self.filled == ACTIVITY_ARRIVALS
            && self.slots[ACTIVITY_ARRIVALS - 1] - self.slots[0] <= ACTIVITY_WINDOW_MS
    }
}

pub struct PeerConnection {
    peer: Arc<Peer>,
    ctx: Arc<CommContext>,
    bus: EventBus,
    bootstrap: Mutex<Option<SocketAddr>>,
    counters: Arc<SendCounters>,
    received: FrequencyCalculator,
    window: Mutex<ArrivalWindow>,
    last_arrival: AtomicI64,
}

impl PeerConnection {
    pub fn new(peer: Arc<Peer>, ctx: Arc<CommContext>) -> Self {
        Self {
            bus: EventBus::new(Arc::clone(&ctx.pool)),
            peer,
            ctx,
            bootstrap: Mutex::new(None),
            counters: Arc::new(SendCounters::default()),
            received: FrequencyCalculator::default(),
            window: Mutex::new(ArrivalWindow::default()),
            last_arrival: AtomicI64::new(0),
        }
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    pub fn counters(&self) -> &Arc<SendCounters> {
        &self.counters
    }

    /// Inbound messages per second.
    pub fn received_frequency(&self) -> f64 {
        self.received.frequency()
    }

    /// Address the peer was first seen from, when it was created from
    /// unknown traffic.
    pub fn bootstrap_addr(&self) -> Option<SocketAddr> {
        *self.bootstrap.lock()
    }

    pub fn set_bootstrap_addr(&self, addr: SocketAddr) {
        *self.bootstrap.lock() = Some(addr);
    }

    pub fn register_listener(
        &self,
        handler: MessageHandler,
        filter: Option<MessageFilter>,
    ) -> ListenerId {
        self.bus.register(handler, filter)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.bus.unregister(id)
    }

    pub fn last_arrival_millis(&self) -> i64 {
        self.last_arrival.load(Ordering::Acquire)
    }

    /// Process one message from this peer.
    pub fn on_message(&self, info: &MessageInfo, msg: &ImcMessage) {
        if self.peer.authority() == Authority::Off {
            log::trace!("[Conn] {} is off, dropping {}", self.peer.id(), msg.abbrev());
            return;
        }
        self.received.mark();

        if !matches!(msg.payload, Payload::Announce(_) | Payload::EntityList(_)) {
            self.record_arrival(info.received_millis);
        }

        self.extract(msg);

        self.bus.post(info, msg);
        self.ctx.bus.post(info, msg);
    }

    fn record_arrival(&self, now: i64) {
        self.last_arrival.store(now, Ordering::Release);
        let dense = {
            let mut window = self.window.lock();
            window.push(now);
            window.is_dense()
        };
        if dense && self.peer.set_active(true) {
            log::debug!("[Conn] {} is active", self.peer.id());
            self.ctx.status.emit(PeerEvent::StatusChanged {
                id: self.peer.id(),
                active: true,
            });
        }
    }

    /// Mark inactive after [`INACTIVITY_TIMEOUT_MS`] of silence. Returns
    /// true if the peer just went inactive.
    pub fn check_inactivity(&self, now: i64) -> bool {
        if !self.peer.is_active() || now - self.last_arrival_millis() <= INACTIVITY_TIMEOUT_MS {
            return false;
        }
        if !self.peer.set_active(false) {
            return false;
        }
        *self.window.lock() = ArrivalWindow::default();
        log::debug!("[Conn] {} went silent", self.peer.id());
        self.ctx.status.emit(PeerEvent::StatusChanged {
            id: self.peer.id(),
            active: false,
        });
        true
    }

    fn extract(&self, msg: &ImcMessage) {
        let t = message_time(msg);
        let peer = &self.peer;
        match &msg.payload {
            Payload::VehicleState(vs) => peer.set_error(vs.error_count > 0, &vs.error_ents),
            Payload::PlanControlState(pcs) => {
                let active = (pcs.state == PlanState::Executing)
                    .then(|| format!("{}|Man:{}", pcs.plan_id, pcs.man_id));
                peer.set_plan_control(pcs.state, active);
            }
            Payload::EmergencyControlState(ecs) => peer.set_emergency(&ecs.plan_id, ecs.state),
            Payload::EstimatedState(es) => self.apply_estimated_state(es, t),
            Payload::SimulatedState(_) => self.store_message(keys::SIMULATED_STATE, msg, t),
            Payload::OperationalLimits(_) => self.store_message(keys::OPERATIONAL_LIMITS, msg, t),
            Payload::IndicatedSpeed(s) => {
                peer.store_data(keys::INDICATED_SPEED, BlackboardValue::Number(s.value), t, true);
            }
            Payload::TrueSpeed(s) => {
                peer.store_data(keys::TRUE_SPEED, BlackboardValue::Number(s.value), t, true);
            }
            Payload::FuelLevel(_) => self.store_message(keys::FUEL_LEVEL, msg, t),
            Payload::AcousticSystems(_) => self.store_message(keys::ACOUSTIC_SYSTEMS, msg, t),
            Payload::EntityParameters(ep) => {
                let key = format!("{}{}", keys::ENTITY_PARAMETERS_PREFIX, ep.name);
                self.store_message(&key, msg, t);
            }
            Payload::LblConfig(cfg) if cfg.op == LblConfigOp::CurCfg => {
                self.store_message(keys::LBL_CONFIG, msg, t);
            }
            Payload::PlanDb(db) => self.apply_plan_db(db, t),
            Payload::Rpm(rpm) => self.apply_rpm(msg.header.src_ent, rpm.value, t),
            _ => {}
        }
    }

    fn store_message(&self, key: &str, msg: &ImcMessage, t: i64) {
        self.peer
            .store_data(key, BlackboardValue::Message(Box::new(msg.clone())), t, true);
    }

    fn apply_estimated_state(&self, es: &EstimatedState, t: i64) {
        let (lat, lon) = geo::displace(
            es.lat.to_degrees(),
            es.lon.to_degrees(),
            f64::from(es.x),
            f64::from(es.y),
        );
        let location = Location {
            lat_deg: lat,
            lon_deg: lon,
            height: f64::from(es.height) - f64::from(es.z),
            depth: f64::from(es.depth),
        };
        let attitude = Attitude {
            roll_deg: f64::from(es.phi).to_degrees(),
            pitch_deg: f64::from(es.theta).to_degrees(),
            yaw_deg: f64::from(es.psi).to_degrees(),
        };
        let peer = &self.peer;
        peer.set_location(location, t);
        peer.set_attitude(attitude, t);

        let (vx, vy) = (f64::from(es.vx), f64::from(es.vy));
        let course = geo::normalize_deg_360(vy.atan2(vx).to_degrees());
        let values = [
            (keys::GROUND_SPEED, vx.hypot(vy)),
            (keys::COURSE_DEGS, course),
            (keys::HEADING_DEGS, geo::normalize_deg_360(attitude.yaw_deg)),
            (keys::VERTICAL_SPEED, f64::from(es.vz)),
        ];
        for (key, value) in values {
            peer.store_data(key, BlackboardValue::Number(value), t, true);
        }
    }

    fn apply_plan_db(&self, db: &PlanDb, t: i64) {
        if db.kind != PlanDbType::Success {
            return;
        }
        self.peer.update_plan_db(|mirror| {
            match (db.op, &db.arg) {
                (PlanDbOp::GetState, Some(PlanDbArg::State(state))) => {
                    mirror.plans = state
                        .plans_info
                        .iter()
                        .map(|info| (info.plan_id.clone(), info.clone()))
                        .collect();
                    mirror.state = Some(state.clone());
                }
                (PlanDbOp::Set, Some(PlanDbArg::Info(info))) => {
                    mirror.plans.insert(db.plan_id.clone(), info.clone());
                }
                (PlanDbOp::Del, _) => {
                    mirror.plans.remove(&db.plan_id);
                }
                (PlanDbOp::Clear, _) => {
                    mirror.plans.clear();
                    mirror.state = None;
                }
                _ => return,
            }
            mirror.last_update_millis = t;
        });
    }

    fn apply_rpm(&self, entity: u8, value: i16, t: i64) {
        let peer = &self.peer;
        if entity == DEFAULT_ENTITY_ID {
            peer.store_data(keys::RPM, BlackboardValue::Number(f64::from(value)), t, true);
            return;
        }
        let name = peer.name();
        let Some(label) = self.ctx.entities.resolve_name(&name, entity) else {
            return;
        };
        let mut map = match peer.retrieve_data(keys::RPM_BY_ENTITY) {
            Some(BlackboardValue::Map(m)) => m,
            _ => BTreeMap::new(),
        };
        let stale = peer
            .data_time(keys::RPM_BY_ENTITY)
            .map_or(false, |last| t - last > RPM_PRUNE_AFTER_MS);
        if stale {
            map.retain(|label, _| self.ctx.entities.resolve_id(&name, label).is_some());
        }
        map.insert(label, f64::from(value));
        peer.store_data(keys::RPM_BY_ENTITY, BlackboardValue::Map(map), t, false);
    }
}

/// Message time in millis, falling back to now for unstamped messages.
pub(crate) fn message_time(msg: &ImcMessage) -> i64 {
    match msg.timestamp_millis() {
        t if t > 0 => t,
        _ => now_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommConfig;
    use crate::entities::EntityResolver;
    use crate::id::PeerId;
    use crate::message::{
        EmergencyControlState, EmergencyState, JsonCodec, PlanControlState, PlanDbInformation,
        PlanDbStateArg, Rpm, VehicleState, OperationMode,
    };
    use crate::reachability::TcpEchoProber;
    use crate::transport::StaticInterfaces;
    use std::time::{Duration, Instant};

    fn make_ctx() -> Arc<CommContext> {
        Arc::new(
            CommContext::new(
                CommConfig::default(),
                EntityResolver::in_memory(),
                Arc::new(TcpEchoProber),
                Arc::new(StaticInterfaces::default()),
                Arc::new(JsonCodec),
            )
            .unwrap(),
        )
    }

    fn make_conn(ctx: &Arc<CommContext>) -> PeerConnection {
        let peer = ctx
            .registry
            .register(Peer::with_name(PeerId::new(0x4d15), "lauv-xplore-1"));
        PeerConnection::new(peer, Arc::clone(ctx))
    }

    fn make_msg(payload: Payload, t: i64) -> ImcMessage {
        let mut msg = ImcMessage::new(payload);
        msg.header.src = PeerId::new(0x4d15);
        msg.set_timestamp_millis(t);
        msg
    }

    fn info_at(t: i64) -> MessageInfo {
        MessageInfo {
            received_millis: t,
            ..MessageInfo::local()
        }
    }

    #[test]
    fn test_three_arrivals_within_window_activate() {
        let ctx = make_ctx();
        let conn = make_conn(&ctx);
        let msg = make_msg(Payload::Heartbeat, 1_000);
        conn.on_message(&info_at(10_000), &msg);
        conn.on_message(&info_at(11_000), &msg);
        assert!(!conn.peer().is_active());
        conn.on_message(&info_at(12_900), &msg);
        assert!(conn.peer().is_active());
    }

    #[test]
    fn test_sparse_arrivals_stay_inactive() {
        let ctx = make_ctx();
        let conn = make_conn(&ctx);
        let msg = make_msg(Payload::Heartbeat, 1_000);
        conn.on_message(&info_at(10_000), &msg);
        conn.on_message(&info_at(11_500), &msg);
        conn.on_message(&info_at(13_001), &msg);
        assert!(!conn.peer().is_active());
    }

    #[test]
    fn test_announce_does_not_count() {
        let ctx = make_ctx();
        let conn = make_conn(&ctx);
        let list = make_msg(
            Payload::EntityList(crate::message::EntityList {
                op: crate::message::EntityListOp::Report,
                list: "A=1".into(),
            }),
            1,
        );
        for t in [1_000, 1_100, 1_200] {
            conn.on_message(&info_at(t), &list);
        }
        assert!(!conn.peer().is_active());
    }

    #[test]
    fn test_inactivity_after_silence() {
        let ctx = make_ctx();
        let conn = make_conn(&ctx);
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        ctx.status.register(None, Arc::new(move |ev| e.lock().push(*ev)));

        let msg = make_msg(Payload::Heartbeat, 1);
        for t in [1_000, 1_500, 2_000] {
            conn.on_message(&info_at(t), &msg);
        }
        assert!(!conn.check_inactivity(2_000 + INACTIVITY_TIMEOUT_MS));
        assert!(conn.check_inactivity(2_001 + INACTIVITY_TIMEOUT_MS));
        assert!(!conn.peer().is_active());
        assert_eq!(
            *events.lock(),
            vec![
                PeerEvent::StatusChanged { id: PeerId::new(0x4d15), active: true },
                PeerEvent::StatusChanged { id: PeerId::new(0x4d15), active: false },
            ]
        );
    }

    #[test]
    fn test_authority_off_drops() {
        let ctx = make_ctx();
        let conn = make_conn(&ctx);
        conn.peer().set_authority(Authority::Off);
        let posted = Arc::new(Mutex::new(0));
        let p = Arc::clone(&posted);
        ctx.bus.register(Arc::new(move |_, _| *p.lock() += 1), None);
        for t in [1_000, 1_100, 1_200] {
            conn.on_message(&info_at(t), &make_msg(Payload::Heartbeat, t));
        }
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(*posted.lock(), 0);
        assert!(!conn.peer().is_active());
    }

    #[test]
    fn test_posts_to_peer_and_global_bus() {
        let ctx = make_ctx();
        let conn = make_conn(&ctx);
        let count = Arc::new(Mutex::new(0));
        let (a, b) = (Arc::clone(&count), Arc::clone(&count));
        ctx.bus.register(Arc::new(move |_, _| *a.lock() += 1), None);
        conn.register_listener(Arc::new(move |_, _| *b.lock() += 1), None);
        conn.on_message(&info_at(1), &make_msg(Payload::Heartbeat, 1));

        let deadline = Instant::now() + Duration::from_secs(2);
        while *count.lock() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn test_vehicle_and_plan_state_extraction() {
        let ctx = make_ctx();
        let conn = make_conn(&ctx);
        let vs = VehicleState {
            op_mode: OperationMode::Error,
            error_count: 2,
            error_ents: "Navigation, GPS".into(),
            maneuver_type: 0xFFFF,
            last_error: String::new(),
        };
        conn.on_message(&info_at(1), &make_msg(Payload::VehicleState(vs), 1));
        assert_eq!(conn.peer().error_summary().as_deref(), Some("Navigation, GPS"));

        let mut pcs = PlanControlState {
            state: PlanState::Executing,
            plan_id: "survey".into(),
            plan_eta: 100,
            plan_progress: 10.0,
            man_id: "goto1".into(),
            man_type: 450,
            man_eta: 5,
        };
        conn.on_message(&info_at(2), &make_msg(Payload::PlanControlState(pcs.clone()), 2));
        assert_eq!(conn.peer().active_plan_id().as_deref(), Some("survey|Man:goto1"));
        pcs.state = PlanState::Ready;
        conn.on_message(&info_at(3), &make_msg(Payload::PlanControlState(pcs), 3));
        assert_eq!(conn.peer().active_plan_id(), None);

        let ecs = EmergencyControlState {
            state: EmergencyState::Armed,
            plan_id: "dislodge".into(),
            comm_level: 0,
        };
        conn.on_message(&info_at(4), &make_msg(Payload::EmergencyControlState(ecs), 4));
        assert_eq!(conn.peer().emergency_plan_id().as_deref(), Some("dislodge"));
        assert_eq!(conn.peer().emergency_state(), Some(EmergencyState::Armed));
    }

    #[test]
    fn test_estimated_state_extraction() {
        let ctx = make_ctx();
        let conn = make_conn(&ctx);
        let es = EstimatedState {
            lat: 41.0f64.to_radians(),
            lon: (-8.0f64).to_radians(),
            height: 0.0,
            z: 2.0,
            depth: 2.0,
            psi: std::f32::consts::FRAC_PI_2,
            vx: 0.0,
            vy: 1.5,
            vz: 0.25,
            ..Default::default()
        };
        conn.on_message(&info_at(5_000), &make_msg(Payload::EstimatedState(es), 5_000));
        let peer = conn.peer();
        assert!((peer.location().lat_deg - 41.0).abs() < 1e-9);
        assert_eq!(peer.location().depth, 2.0);
        assert!((peer.attitude().yaw_deg - 90.0).abs() < 1e-4);
        let speed = peer.retrieve_data(keys::GROUND_SPEED).and_then(|v| v.as_number());
        assert!((speed.unwrap() - 1.5).abs() < 1e-9);
        let course = peer.retrieve_data(keys::COURSE_DEGS).and_then(|v| v.as_number());
        assert!((course.unwrap() - 90.0).abs() < 1e-6);
        assert_eq!(peer.location_time(), 5_000);

        // older sample is ignored
        let old = EstimatedState {
            lat: 10.0f64.to_radians(),
            ..Default::default()
        };
        conn.on_message(&info_at(5_100), &make_msg(Payload::EstimatedState(old), 4_000));
        assert!((peer.location().lat_deg - 41.0).abs() < 1e-9);
    }

    #[test]
    fn test_rpm_named_and_default_entity() {
        let ctx = make_ctx();
        ctx.entities.set_entities("lauv-xplore-1", "Motor=12;Thruster=13");
        let conn = make_conn(&ctx);

        let mut msg = make_msg(Payload::Rpm(Rpm { value: 900 }), 1_000);
        conn.on_message(&info_at(1_000), &msg);
        assert_eq!(
            conn.peer().retrieve_data(keys::RPM).and_then(|v| v.as_number()),
            Some(900.0)
        );

        msg.header.src_ent = 12;
        conn.on_message(&info_at(1_100), &msg);
        msg.header.src_ent = 13;
        msg.set_timestamp_millis(1_200);
        conn.on_message(&info_at(1_200), &msg);

        // Thruster disappears from the entity list; pruned on a later store
        ctx.entities.set_entities("lauv-xplore-1", "Motor=12");
        msg.header.src_ent = 12;
        msg.set_timestamp_millis(5_000);
        conn.on_message(&info_at(5_000), &msg);
        match conn.peer().retrieve_data(keys::RPM_BY_ENTITY) {
            Some(BlackboardValue::Map(m)) => {
                assert_eq!(m.keys().collect::<Vec<_>>(), vec!["Motor"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_plan_db_mirror() {
        let ctx = make_ctx();
        let conn = make_conn(&ctx);
        let info = |id: &str| PlanDbInformation {
            plan_id: id.into(),
            plan_size: 10,
            change_time: 0.0,
            change_sid: 0,
            change_sname: String::new(),
            md5: vec![],
        };
        let mut db = PlanDb::request(PlanDbOp::GetState, 1);
        conn.on_message(&info_at(1), &make_msg(Payload::PlanDb(db.clone()), 1));
        assert!(conn.peer().plan_db().state.is_none());

        db.kind = PlanDbType::Success;
        db.arg = Some(PlanDbArg::State(PlanDbStateArg {
            plan_count: 2,
            plans_info: vec![info("a"), info("b")],
            ..Default::default()
        }));
        conn.on_message(&info_at(2), &make_msg(Payload::PlanDb(db), 2_000));
        assert_eq!(conn.peer().plan_db().plans.len(), 2);
        assert_eq!(conn.peer().plan_db().last_update_millis, 2_000);

        let mut del = PlanDb::request(PlanDbOp::Del, 2);
        del.kind = PlanDbType::Success;
        del.plan_id = "a".into();
        conn.on_message(&info_at(3), &make_msg(Payload::PlanDb(del), 3_000));
        let plans = conn.peer().plan_db().plans;
        assert_eq!(plans.keys().collect::<Vec<_>>(), vec!["b"]);
    }
}
