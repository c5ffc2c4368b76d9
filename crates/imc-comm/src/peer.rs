// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote systems as seen by this node.
//!
//! A [`Peer`] is shared (`Arc<Peer>`) between the registry, its connection,
//! the announce service and upstream readers. Identity and derived state live
//! behind one `RwLock`; the blackboard and the plan database mirror each have
//! their own lock so slow readers of one never stall writers of the other.

use crate::id::PeerId;
use crate::message::{
    now_millis, EmergencyState, ImcMessage, PlanDbInformation, PlanDbStateArg, PlanState,
    SystemType,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// Announce freshness window.
pub const ANNOUNCE_FRESH_MS: i64 = 12_000;

/// A SimulatedState newer than this marks the peer as simulated.
pub const SIMULATED_MAX_AGE_MS: i64 = 60_000;

/// Blackboard keys written by the core.
pub mod keys {
    pub const GROUND_SPEED: &str = "ground_speed";
    pub const COURSE_DEGS: &str = "course_degs";
    pub const HEADING_DEGS: &str = "heading_degs";
    pub const VERTICAL_SPEED: &str = "vertical_speed";
    pub const FUEL_LEVEL: &str = "FuelLevel";
    pub const RPM: &str = "Rpm";
    pub const RPM_BY_ENTITY: &str = "Rpm.entities";
    pub const LBL_CONFIG: &str = "LblConfig";
    pub const OPERATIONAL_LIMITS: &str = "OperationalLimits";
    pub const SIMULATED_STATE: &str = "SimulatedState";
    pub const INDICATED_SPEED: &str = "IndicatedSpeed";
    pub const TRUE_SPEED: &str = "TrueSpeed";
    pub const ACOUSTIC_SYSTEMS: &str = "AcousticSystems";
    pub const ENTITY_PARAMETERS_PREFIX: &str = "EntityParameters.";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleKind {
    Uuv,
    Usv,
    Uav,
    Ugv,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemKind {
    Ccu,
    Vehicle(VehicleKind),
    MobileSensor,
    StaticSensor,
    Unknown,
}

impl SystemKind {
    /// Map announce/config type strings ("UUV", "AUV", "CCU", "WSN"...).
    pub fn from_type_str(text: &str) -> Self {
        match text.trim().to_ascii_uppercase().as_str() {
            "CCU" => Self::Ccu,
            "UUV" | "AUV" | "ROV" => Self::Vehicle(VehicleKind::Uuv),
            "USV" | "ASV" => Self::Vehicle(VehicleKind::Usv),
            "UAV" => Self::Vehicle(VehicleKind::Uav),
            "UGV" | "AGV" => Self::Vehicle(VehicleKind::Ugv),
            "HUMANSENSOR" | "MOBILESENSOR" => Self::MobileSensor,
            "STATICSENSOR" | "WSN" => Self::StaticSensor,
            _ => Self::Unknown,
        }
    }

    pub fn from_system_type(sys_type: SystemType) -> Self {
        Self::from_type_str(sys_type.as_str())
    }

    pub fn is_vehicle(self) -> bool {
        matches!(self, Self::Vehicle(_))
    }

    /// Coarse kind ignoring the vehicle sub-kind, for type lookups.
    pub fn same_class(self, other: SystemKind) -> bool {
        std::mem::discriminant(&self) == std::mem::discriminant(&other)
    }
}

impl std::fmt::Display for SystemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ccu => write!(f, "ccu"),
            Self::Vehicle(v) => write!(f, "vehicle/{:?}", v),
            Self::MobileSensor => write!(f, "mobile sensor"),
            Self::StaticSensor => write!(f, "static sensor"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Control ownership over a peer, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Authority {
    Off,
    None,
    PayloadMonitor,
    Payload,
    SystemMonitor,
    SystemFull,
}

/// Absolute position. `depth` is positive down; `height` is above the
/// ellipsoid.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Location {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub height: f64,
    pub depth: f64,
}

impl Location {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        Self {
            lat_deg,
            lon_deg,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Attitude {
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
}

impl Attitude {
    pub fn heading(yaw_deg: f64) -> Self {
        Self {
            yaw_deg,
            ..Default::default()
        }
    }
}

/// Where a peer can be reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub host: String,
    pub host_guessed: bool,
    pub udp_port: u16,
    pub udp_enabled: bool,
    pub tcp_port: u16,
    pub tcp_enabled: bool,
}

/// A boolean condition plus when it last changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flag {
    pub on: bool,
    pub since_millis: i64,
}

impl Flag {
    fn set(&mut self, on: bool, now: i64) {
        self.on = on;
        self.since_millis = now;
    }
}

/// Values stored on a peer's blackboard.
#[derive(Debug, Clone, PartialEq)]
pub enum BlackboardValue {
    Number(f64),
    Text(String),
    Message(Box<ImcMessage>),
    Map(BTreeMap<String, f64>),
}

impl BlackboardValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&ImcMessage> {
        match self {
            Self::Message(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Stamped {
    value: BlackboardValue,
    time_millis: i64,
}

/// Mirror of a peer's plan database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDbMirror {
    pub state: Option<PlanDbStateArg>,
    pub plans: BTreeMap<String, PlanDbInformation>,
    pub last_update_millis: i64,
}

impl PlanDbMirror {
    pub fn age_millis(&self, now: i64) -> i64 {
        now - self.last_update_millis
    }
}

#[derive(Debug, Clone)]
struct PeerState {
    name: String,
    kind: SystemKind,
    authority: Authority,
    location: Location,
    location_time: i64,
    attitude: Attitude,
    attitude_time: i64,
    error: Flag,
    error_text: String,
    id_collision: Flag,
    announce: Flag,
    services: String,
    endpoints: Endpoints,
    uid: Option<String>,
    uid_time: i64,
    plan_state: Option<PlanState>,
    active_plan: Option<String>,
    emergency_plan: Option<String>,
    emergency_state: Option<EmergencyState>,
}

/// Read-only copy of a peer for upstream consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub name: String,
    pub kind: SystemKind,
    pub authority: Authority,
    pub active: bool,
    pub location: Location,
    pub location_time: i64,
    pub attitude: Attitude,
    pub attitude_time: i64,
    pub error: Flag,
    pub error_text: String,
    pub id_collision: Flag,
    pub announce_fresh: bool,
    pub services: String,
    pub endpoints: Endpoints,
    pub active_plan: Option<String>,
    pub emergency_plan: Option<String>,
    pub emergency_state: Option<EmergencyState>,
}

/// A remote system.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    active: AtomicBool,
    state: RwLock<PeerState>,
    blackboard: Mutex<HashMap<String, Stamped>>,
    plan_db: Mutex<PlanDbMirror>,
}

impl Peer {
    pub fn new(id: PeerId) -> Self {
        Self::with_name(id, &id.to_pretty_string())
    }

    pub fn with_name(id: PeerId, name: &str) -> Self {
        Self {
            id,
            active: AtomicBool::new(false),
            state: RwLock::new(PeerState {
                name: name.to_string(),
                kind: SystemKind::Unknown,
                authority: Authority::None,
                location: Location::default(),
                location_time: i64::MIN,
                attitude: Attitude::default(),
                attitude_time: i64::MIN,
                error: Flag::default(),
                error_text: String::new(),
                id_collision: Flag::default(),
                announce: Flag::default(),
                services: String::new(),
                endpoints: Endpoints::default(),
                uid: None,
                uid_time: 0,
                plan_state: None,
                active_plan: None,
                emergency_plan: None,
                emergency_state: None,
            }),
            blackboard: Mutex::new(HashMap::new()),
            plan_db: Mutex::new(PlanDbMirror::default()),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    pub fn set_name(&self, name: &str) {
        self.state.write().name = name.to_string();
    }

    /// Name is still the placeholder derived from the id.
    pub fn has_default_name(&self) -> bool {
        self.state
            .read()
            .name
            .eq_ignore_ascii_case(&self.id.to_pretty_string())
    }

    pub fn kind(&self) -> SystemKind {
        self.state.read().kind
    }

    /// Set the kind. Leaving `Unknown` for a non-CCU kind grants full
    /// system authority.
    pub fn set_kind(&self, kind: SystemKind) {
        let mut st = self.state.write();
        if st.kind == SystemKind::Unknown && kind != SystemKind::Unknown && kind != SystemKind::Ccu
        {
            st.authority = Authority::SystemFull;
        }
        st.kind = kind;
    }

    pub fn authority(&self) -> Authority {
        self.state.read().authority
    }

    pub fn set_authority(&self, authority: Authority) {
        self.state.write().authority = authority;
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns true if the flag changed.
    pub fn set_active(&self, active: bool) -> bool {
        self.active.swap(active, Ordering::AcqRel) != active
    }

    pub fn location(&self) -> Location {
        self.state.read().location
    }

    pub fn location_time(&self) -> i64 {
        self.state.read().location_time
    }

    /// Apply unless `time_millis` is older than the stored location.
    pub fn set_location(&self, location: Location, time_millis: i64) -> bool {
        let mut st = self.state.write();
        if time_millis < st.location_time {
            return false;
        }
        st.location = location;
        st.location_time = time_millis;
        true
    }

    pub fn attitude(&self) -> Attitude {
        self.state.read().attitude
    }

    pub fn attitude_time(&self) -> i64 {
        self.state.read().attitude_time
    }

    /// Apply unless `time_millis` is older than the stored attitude.
    pub fn set_attitude(&self, attitude: Attitude, time_millis: i64) -> bool {
        let mut st = self.state.write();
        if time_millis < st.attitude_time {
            return false;
        }
        st.attitude = attitude;
        st.attitude_time = time_millis;
        true
    }

    pub fn error(&self) -> Flag {
        self.state.read().error
    }

    pub fn error_text(&self) -> String {
        self.state.read().error_text.clone()
    }

    /// Error text while the error flag is raised.
    pub fn error_summary(&self) -> Option<String> {
        let st = self.state.read();
        st.error.on.then(|| {
            if st.error_text.is_empty() {
                "error".to_string()
            } else {
                st.error_text.clone()
            }
        })
    }

    /// Yaw in [0, 360).
    pub fn heading_deg(&self) -> f64 {
        crate::geo::normalize_deg_360(self.state.read().attitude.yaw_deg)
    }

    pub fn set_error(&self, on: bool, text: &str) {
        let mut st = self.state.write();
        if st.error.on != on {
            st.error.set(on, now_millis());
        }
        st.error_text = text.to_string();
    }

    pub fn id_collision(&self) -> Flag {
        self.state.read().id_collision
    }

    pub fn set_id_collision(&self, on: bool) {
        self.state.write().id_collision.set(on, now_millis());
    }

    pub fn set_announce_state(&self, on: bool) {
        self.set_announce_state_at(on, now_millis());
    }

    pub fn set_announce_state_at(&self, on: bool, now: i64) {
        self.state.write().announce.set(on, now);
    }

    pub fn is_announce_fresh(&self) -> bool {
        self.is_announce_fresh_at(now_millis())
    }

    pub fn is_announce_fresh_at(&self, now: i64) -> bool {
        let st = self.state.read();
        st.announce.on && now - st.announce.since_millis <= ANNOUNCE_FRESH_MS
    }

    pub fn services(&self) -> String {
        self.state.read().services.clone()
    }

    pub fn set_services(&self, services: &str) {
        self.state.write().services = services.to_string();
    }

    pub fn endpoints(&self) -> Endpoints {
        self.state.read().endpoints.clone()
    }

    pub fn set_endpoints(&self, endpoints: Endpoints) {
        self.state.write().endpoints = endpoints;
    }

    /// Mutate endpoints in place.
    pub fn update_endpoints(&self, f: impl FnOnce(&mut Endpoints)) {
        f(&mut self.state.write().endpoints);
    }

    pub fn uid(&self) -> Option<(String, i64)> {
        let st = self.state.read();
        st.uid.clone().map(|u| (u, st.uid_time))
    }

    pub fn set_uid(&self, uid: &str, time_millis: i64) {
        let mut st = self.state.write();
        st.uid = Some(uid.to_string());
        st.uid_time = time_millis;
    }

    pub fn plan_state(&self) -> Option<PlanState> {
        self.state.read().plan_state
    }

    pub fn active_plan_id(&self) -> Option<String> {
        self.state.read().active_plan.clone()
    }

    pub fn set_plan_control(&self, state: PlanState, active_plan: Option<String>) {
        let mut st = self.state.write();
        st.plan_state = Some(state);
        st.active_plan = active_plan;
    }

    pub fn emergency_plan_id(&self) -> Option<String> {
        self.state.read().emergency_plan.clone()
    }

    pub fn emergency_state(&self) -> Option<EmergencyState> {
        self.state.read().emergency_state
    }

    pub fn set_emergency(&self, plan_id: &str, state: EmergencyState) {
        let mut st = self.state.write();
        st.emergency_plan = (!plan_id.is_empty()).then(|| plan_id.to_string());
        st.emergency_state = Some(state);
    }

    /// Store `value` at `time_millis`. With `keep_newest`, data older than
    /// what is stored is rejected.
    pub fn store_data(
        &self,
        key: &str,
        value: BlackboardValue,
        time_millis: i64,
        keep_newest: bool,
    ) -> bool {
        let mut board = self.blackboard.lock();
        if keep_newest {
            if let Some(existing) = board.get(key) {
                if time_millis < existing.time_millis {
                    return false;
                }
            }
        }
        board.insert(key.to_string(), Stamped { value, time_millis });
        true
    }

    pub fn retrieve_data(&self, key: &str) -> Option<BlackboardValue> {
        self.blackboard.lock().get(key).map(|s| s.value.clone())
    }

    /// Value only if it is at most `max_age_millis` old.
    pub fn retrieve_data_max_age(&self, key: &str, max_age_millis: i64) -> Option<BlackboardValue> {
        let now = now_millis();
        self.blackboard
            .lock()
            .get(key)
            .filter(|s| now - s.time_millis <= max_age_millis)
            .map(|s| s.value.clone())
    }

    pub fn data_time(&self, key: &str) -> Option<i64> {
        self.blackboard.lock().get(key).map(|s| s.time_millis)
    }

    pub fn data_keys(&self) -> Vec<String> {
        self.blackboard.lock().keys().cloned().collect()
    }

    pub fn is_simulated(&self) -> bool {
        self.data_time(keys::SIMULATED_STATE)
            .is_some_and(|t| now_millis() - t <= SIMULATED_MAX_AGE_MS)
    }

    pub fn plan_db(&self) -> PlanDbMirror {
        self.plan_db.lock().clone()
    }

    pub fn update_plan_db<R>(&self, f: impl FnOnce(&mut PlanDbMirror) -> R) -> R {
        f(&mut self.plan_db.lock())
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        let now = now_millis();
        let st = self.state.read();
        PeerSnapshot {
            id: self.id,
            name: st.name.clone(),
            kind: st.kind,
            authority: st.authority,
            active: self.is_active(),
            location: st.location,
            location_time: st.location_time,
            attitude: st.attitude,
            attitude_time: st.attitude_time,
            error: st.error,
            error_text: st.error_text.clone(),
            id_collision: st.id_collision,
            announce_fresh: st.announce.on && now - st.announce.since_millis <= ANNOUNCE_FRESH_MS,
            services: st.services.clone(),
            endpoints: st.endpoints.clone(),
            active_plan: st.active_plan.clone(),
            emergency_plan: st.emergency_plan.clone(),
            emergency_state: st.emergency_state,
        }
    }
}

/// A system reported by others (ReportedState, AssetReport,
/// RemoteSensorInfo) that does not talk to us directly.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSystem {
    pub name: String,
    pub kind: SystemKind,
    pub sensor_class: Option<String>,
    pub location: Location,
    pub location_time: i64,
    pub attitude: Attitude,
    pub attitude_time: i64,
}

impl ExternalSystem {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SystemKind::Unknown,
            sensor_class: None,
            location: Location::default(),
            location_time: i64::MIN,
            attitude: Attitude::default(),
            attitude_time: i64::MIN,
        }
    }

    pub fn set_location(&mut self, location: Location, time_millis: i64) -> bool {
        if time_millis < self.location_time {
            return false;
        }
        self.location = location;
        self.location_time = time_millis;
        true
    }

    pub fn set_attitude(&mut self, attitude: Attitude, time_millis: i64) -> bool {
        if time_millis < self.attitude_time {
            return false;
        }
        self.attitude = attitude;
        self.attitude_time = time_millis;
        true
    }
}
