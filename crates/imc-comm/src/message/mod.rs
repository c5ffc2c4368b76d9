// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IMC message model.
//!
//! An [`ImcMessage`] is a [`Header`] plus a [`Payload`]. The payload enum
//! covers the kinds the core inspects; anything else travels as
//! [`Payload::Other`] with its encoded body untouched.

pub mod codec;
pub mod types;

pub use codec::{JsonCodec, WireCodec};
pub use types::*;

use crate::id::PeerId;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Numeric message ids.
pub mod ids {
    pub const ENTITY_INFO: u16 = 3;
    pub const QUERY_ENTITY_INFO: u16 = 4;
    pub const ENTITY_LIST: u16 = 5;
    pub const SIMULATED_STATE: u16 = 50;
    pub const HEARTBEAT: u16 = 150;
    pub const ANNOUNCE: u16 = 151;
    pub const LBL_CONFIG: u16 = 203;
    pub const ACOUSTIC_SYSTEMS_QUERY: u16 = 212;
    pub const ACOUSTIC_SYSTEMS: u16 = 213;
    pub const RPM: u16 = 250;
    pub const FUEL_LEVEL: u16 = 279;
    pub const ESTIMATED_STATE: u16 = 350;
    pub const INDICATED_SPEED: u16 = 270;
    pub const TRUE_SPEED: u16 = 271;
    pub const VEHICLE_STATE: u16 = 500;
    pub const OPERATIONAL_LIMITS: u16 = 504;
    pub const STATE_REPORT: u16 = 514;
    pub const ASSET_REPORT: u16 = 525;
    pub const EMERGENCY_CONTROL_STATE: u16 = 555;
    pub const PLAN_DB: u16 = 556;
    pub const PLAN_CONTROL_STATE: u16 = 560;
    pub const REPORTED_STATE: u16 = 600;
    pub const REMOTE_SENSOR_INFO: u16 = 601;
    pub const ENTITY_PARAMETERS: u16 = 802;
    pub const MESSAGE_PART: u16 = 877;
}

/// Entity id meaning "no particular entity".
pub const DEFAULT_ENTITY_ID: u8 = 0xFF;

/// Current time as IMC timestamp (seconds since the epoch).
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Current time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub mgid: u16,
    pub timestamp: f64,
    pub src: PeerId,
    pub src_ent: u8,
    pub dst: PeerId,
    pub dst_ent: u8,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            mgid: 0,
            timestamp: 0.0,
            src: PeerId::NULL,
            src_ent: DEFAULT_ENTITY_ID,
            dst: PeerId::NULL,
            dst_ent: DEFAULT_ENTITY_ID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Announce(Announce),
    Heartbeat,
    EntityList(EntityList),
    EntityInfo(EntityInfo),
    QueryEntityInfo(QueryEntityInfo),
    MessagePart(MessagePart),
    VehicleState(VehicleState),
    PlanControlState(PlanControlState),
    EmergencyControlState(EmergencyControlState),
    EstimatedState(EstimatedState),
    SimulatedState(SimulatedState),
    OperationalLimits(OperationalLimits),
    IndicatedSpeed(SpeedValue),
    TrueSpeed(SpeedValue),
    PlanDb(PlanDb),
    Rpm(Rpm),
    FuelLevel(FuelLevel),
    LblConfig(LblConfig),
    AcousticSystemsQuery,
    AcousticSystems(AcousticSystems),
    EntityParameters(EntityParameters),
    StateReport(StateReport),
    ReportedState(ReportedState),
    AssetReport(AssetReport),
    RemoteSensorInfo(RemoteSensorInfo),
    Other {
        mgid: u16,
        abbrev: String,
        data: Vec<u8>,
    },
}

impl Payload {
    pub fn mgid(&self) -> u16 {
        match self {
            Self::Announce(_) => ids::ANNOUNCE,
            Self::Heartbeat => ids::HEARTBEAT,
            Self::EntityList(_) => ids::ENTITY_LIST,
            Self::EntityInfo(_) => ids::ENTITY_INFO,
            Self::QueryEntityInfo(_) => ids::QUERY_ENTITY_INFO,
            Self::MessagePart(_) => ids::MESSAGE_PART,
            Self::VehicleState(_) => ids::VEHICLE_STATE,
            Self::PlanControlState(_) => ids::PLAN_CONTROL_STATE,
            Self::EmergencyControlState(_) => ids::EMERGENCY_CONTROL_STATE,
            Self::EstimatedState(_) => ids::ESTIMATED_STATE,
            Self::SimulatedState(_) => ids::SIMULATED_STATE,
            Self::OperationalLimits(_) => ids::OPERATIONAL_LIMITS,
            Self::IndicatedSpeed(_) => ids::INDICATED_SPEED,
            Self::TrueSpeed(_) => ids::TRUE_SPEED,
            Self::PlanDb(_) => ids::PLAN_DB,
            Self::Rpm(_) => ids::RPM,
            Self::FuelLevel(_) => ids::FUEL_LEVEL,
            Self::LblConfig(_) => ids::LBL_CONFIG,
            Self::AcousticSystemsQuery => ids::ACOUSTIC_SYSTEMS_QUERY,
            Self::AcousticSystems(_) => ids::ACOUSTIC_SYSTEMS,
            Self::EntityParameters(_) => ids::ENTITY_PARAMETERS,
            Self::StateReport(_) => ids::STATE_REPORT,
            Self::ReportedState(_) => ids::REPORTED_STATE,
            Self::AssetReport(_) => ids::ASSET_REPORT,
            Self::RemoteSensorInfo(_) => ids::REMOTE_SENSOR_INFO,
            Self::Other { mgid, .. } => *mgid,
        }
    }

    /// Short message name, as used in logs and blackboard keys.
    pub fn abbrev(&self) -> &str {
        match self {
            Self::Announce(_) => "Announce",
            Self::Heartbeat => "Heartbeat",
            Self::EntityList(_) => "EntityList",
            Self::EntityInfo(_) => "EntityInfo",
            Self::QueryEntityInfo(_) => "QueryEntityInfo",
            Self::MessagePart(_) => "MessagePart",
            Self::VehicleState(_) => "VehicleState",
            Self::PlanControlState(_) => "PlanControlState",
            Self::EmergencyControlState(_) => "EmergencyControlState",
            Self::EstimatedState(_) => "EstimatedState",
            Self::SimulatedState(_) => "SimulatedState",
            Self::OperationalLimits(_) => "OperationalLimits",
            Self::IndicatedSpeed(_) => "IndicatedSpeed",
            Self::TrueSpeed(_) => "TrueSpeed",
            Self::PlanDb(_) => "PlanDB",
            Self::Rpm(_) => "Rpm",
            Self::FuelLevel(_) => "FuelLevel",
            Self::LblConfig(_) => "LblConfig",
            Self::AcousticSystemsQuery => "AcousticSystemsQuery",
            Self::AcousticSystems(_) => "AcousticSystems",
            Self::EntityParameters(_) => "EntityParameters",
            Self::StateReport(_) => "StateReport",
            Self::ReportedState(_) => "ReportedState",
            Self::AssetReport(_) => "AssetReport",
            Self::RemoteSensorInfo(_) => "RemoteSensorInfo",
            Self::Other { abbrev, .. } => abbrev,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImcMessage {
    pub header: Header,
    pub payload: Payload,
}

impl ImcMessage {
    /// New unaddressed message; `mgid` follows the payload.
    pub fn new(payload: Payload) -> Self {
        let header = Header {
            mgid: payload.mgid(),
            ..Header::default()
        };
        Self { header, payload }
    }

    pub fn src(&self) -> PeerId {
        self.header.src
    }

    pub fn dst(&self) -> PeerId {
        self.header.dst
    }

    pub fn mgid(&self) -> u16 {
        self.payload.mgid()
    }

    pub fn abbrev(&self) -> &str {
        self.payload.abbrev()
    }

    pub fn timestamp_millis(&self) -> i64 {
        (self.header.timestamp * 1000.0) as i64
    }

    pub fn set_timestamp_millis(&mut self, millis: i64) {
        self.header.timestamp = millis as f64 / 1000.0;
    }

    pub fn is_announce(&self) -> bool {
        matches!(self.payload, Payload::Announce(_))
    }

    /// Copy addressing and time from `other`, keeping this payload.
    pub fn with_header_of(mut self, other: &ImcMessage) -> Self {
        self.header = Header {
            mgid: self.payload.mgid(),
            ..other.header.clone()
        };
        self
    }
}
