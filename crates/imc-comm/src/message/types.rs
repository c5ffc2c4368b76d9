// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload structures for the message kinds consumed by the core.
//!
//! Only the fields the router, announce service and peer connections read
//! are modelled. Angles are radians unless the field name says otherwise.

use serde::{Deserialize, Serialize};

/// System type carried in an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemType {
    Ccu,
    HumanSensor,
    Uuv,
    Usv,
    Uav,
    Ugv,
    StaticSensor,
    MobileSensor,
    Wsn,
}

impl SystemType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ccu => "CCU",
            Self::HumanSensor => "HUMANSENSOR",
            Self::Uuv => "UUV",
            Self::Usv => "USV",
            Self::Uav => "UAV",
            Self::Ugv => "UGV",
            Self::StaticSensor => "STATICSENSOR",
            Self::MobileSensor => "MOBILESENSOR",
            Self::Wsn => "WSN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announce {
    pub sys_name: String,
    pub sys_type: SystemType,
    pub owner: u16,
    pub lat: f64,
    pub lon: f64,
    pub height: f32,
    pub services: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityListOp {
    Report,
    Query,
}

/// Entity list: `list` is a tuple list `Label=id;Label=id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityList {
    pub op: EntityListOp,
    pub list: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub id: u8,
    pub label: String,
    pub component: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEntityInfo {
    pub id: u8,
}

/// Fragment of a larger message; `data` is a slice of its encoded form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    pub uid: u8,
    pub frag_number: u8,
    pub num_frags: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationMode {
    Service,
    Calibration,
    Error,
    Maneuver,
    External,
    Boot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub op_mode: OperationMode,
    pub error_count: u8,
    pub error_ents: String,
    pub maneuver_type: u16,
    pub last_error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanState {
    Blocked,
    Ready,
    Initializing,
    Executing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanControlState {
    pub state: PlanState,
    pub plan_id: String,
    pub plan_eta: i32,
    pub plan_progress: f32,
    pub man_id: String,
    pub man_type: u16,
    pub man_eta: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmergencyState {
    NotConfigured,
    Disabled,
    Enabled,
    Armed,
    Active,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyControlState {
    pub state: EmergencyState,
    pub plan_id: String,
    pub comm_level: u8,
}

/// Navigation estimate. Position is `lat`/`lon`/`height` displaced by the
/// local NED offsets `x`/`y`/`z`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatedState {
    pub lat: f64,
    pub lon: f64,
    pub height: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub phi: f32,
    pub theta: f32,
    pub psi: f32,
    pub u: f32,
    pub v: f32,
    pub w: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub depth: f32,
    pub alt: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulatedState {
    pub lat: f64,
    pub lon: f64,
    pub height: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub phi: f32,
    pub theta: f32,
    pub psi: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalLimits {
    pub mask: u8,
    pub max_depth: f32,
    pub min_altitude: f32,
    pub max_altitude: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    pub max_vrate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedValue {
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanDbType {
    Request,
    Success,
    Failure,
    InProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanDbOp {
    Set,
    Del,
    Get,
    GetInfo,
    Clear,
    GetState,
    GetDstate,
    Boot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDbInformation {
    pub plan_id: String,
    pub plan_size: u16,
    pub change_time: f64,
    pub change_sid: u16,
    pub change_sname: String,
    pub md5: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDbStateArg {
    pub plan_count: u16,
    pub plan_size: u32,
    pub change_time: f64,
    pub change_sid: u16,
    pub change_sname: String,
    pub md5: Vec<u8>,
    pub plans_info: Vec<PlanDbInformation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanDbArg {
    State(PlanDbStateArg),
    Info(PlanDbInformation),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDb {
    #[serde(rename = "type")]
    pub kind: PlanDbType,
    pub op: PlanDbOp,
    pub request_id: u16,
    pub plan_id: String,
    pub arg: Option<PlanDbArg>,
    pub info: String,
}

impl PlanDb {
    /// A request with no argument.
    pub fn request(op: PlanDbOp, request_id: u16) -> Self {
        Self {
            kind: PlanDbType::Request,
            op,
            request_id,
            plan_id: String::new(),
            arg: None,
            info: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rpm {
    pub value: i16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelLevel {
    pub value: f32,
    pub confidence: f32,
    pub opmodes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LblConfigOp {
    SetCfg,
    GetCfg,
    CurCfg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LblBeacon {
    pub beacon: String,
    pub lat: f64,
    pub lon: f64,
    pub depth: f32,
    pub query_channel: u8,
    pub reply_channel: u8,
    pub transponder_delay: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LblConfig {
    pub op: LblConfigOp,
    pub beacons: Vec<LblBeacon>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcousticSystems {
    pub list: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityParameters {
    pub name: String,
    pub params: Vec<(String, String)>,
}

/// Compact state report relayed over low-bandwidth links. Latitude and
/// longitude are degrees; depth is decimetres, heading is scaled to u16,
/// speed is cm/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateReport {
    pub stime: u32,
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: u16,
    pub depth: u16,
    pub heading: u16,
    pub speed: i16,
    pub fuel: i8,
    pub exec_state: i8,
    pub plan_checksum: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedState {
    pub lat: f64,
    pub lon: f64,
    pub depth: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub rcp_time: f64,
    pub sid: String,
    pub s_type: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetMedium {
    Wifi,
    Satellite,
    Acoustic,
    Sms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReport {
    pub name: String,
    pub report_time: f64,
    pub medium: AssetMedium,
    pub lat: f64,
    pub lon: f64,
    pub depth: f64,
    pub alt: f64,
    pub sog: f64,
    pub cog: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSensorInfo {
    pub id: String,
    pub sensor_class: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub heading: f64,
    pub data: String,
}
