// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Position reports relayed on behalf of other systems.
//!
//! StateReport is compact telemetry sent by a vehicle over a low-bandwidth
//! link; it is expanded into the FuelLevel and PlanControlState the vehicle
//! would have sent directly. ReportedState, AssetReport and
//! RemoteSensorInfo describe a named system that may not talk to us at all;
//! when the name is not a known peer, an [`ExternalSystem`] record is
//! updated instead.

use crate::context::CommContext;
use crate::geo;
use crate::message::{
    AssetReport, FuelLevel, ImcMessage, Payload, PlanControlState, PlanState, RemoteSensorInfo,
    ReportedState, StateReport,
};
use crate::peer::{keys, Attitude, BlackboardValue, ExternalSystem, Location, Peer, SystemKind};
use std::sync::Arc;

/// AssetReport ground speed below which the course is not trusted as heading.
const MIN_SOG_FOR_HEADING: f64 = 0.2;

/// Depth value meaning "unknown" in a StateReport.
const STATE_REPORT_NO_DEPTH: u16 = 0xFFFF;

/// Apply a relayed report. Returns synthesized messages to forward ahead of
/// the original.
pub(crate) fn process(ctx: &CommContext, msg: &ImcMessage) -> Vec<ImcMessage> {
    match &msg.payload {
        Payload::StateReport(report) => process_state_report(ctx, msg, report),
        Payload::ReportedState(rs) => {
            process_reported_state(ctx, msg, rs);
            Vec::new()
        }
        Payload::AssetReport(ar) => {
            process_asset_report(ctx, ar);
            Vec::new()
        }
        Payload::RemoteSensorInfo(rsi) => {
            process_remote_sensor_info(ctx, msg, rsi);
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// Either a peer or an external record, whichever owns the name.
enum Target {
    Peer(Arc<Peer>),
    External(String),
}

impl Target {
    fn lookup(ctx: &CommContext, name: &str) -> Self {
        match ctx.registry.by_name(name) {
            Some(peer) => Self::Peer(peer),
            None => Self::External(name.to_string()),
        }
    }

    fn set_location(&self, ctx: &CommContext, location: Location, t: i64) {
        match self {
            Self::Peer(p) => {
                p.set_location(location, t);
            }
            Self::External(name) => {
                ctx.registry
                    .update_external(name, |e| e.set_location(location, t));
            }
        }
    }

    fn set_attitude(&self, ctx: &CommContext, attitude: Attitude, t: i64) {
        match self {
            Self::Peer(p) => {
                p.set_attitude(attitude, t);
            }
            Self::External(name) => {
                ctx.registry
                    .update_external(name, |e| e.set_attitude(attitude, t));
            }
        }
    }

    fn store_number(&self, key: &str, value: f64, t: i64) {
        if let Self::Peer(p) = self {
            p.store_data(key, BlackboardValue::Number(value), t, true);
        }
    }

    /// Touch the external record so it exists even without a position.
    fn ensure(&self, ctx: &CommContext, f: impl FnOnce(&mut ExternalSystem)) {
        if let Self::External(name) = self {
            ctx.registry.update_external(name, f);
        }
    }
}

fn process_state_report(
    ctx: &CommContext,
    msg: &ImcMessage,
    report: &StateReport,
) -> Vec<ImcMessage> {
    let Some(peer) = ctx.registry.by_id(msg.src()) else {
        log::debug!("[StateReport] no system known as {}", msg.src());
        return Vec::new();
    };
    log::trace!("[StateReport] report from {}", peer.name());
    let t = i64::from(report.stime) * 1000;

    let depth = if report.depth == STATE_REPORT_NO_DEPTH {
        -1.0
    } else {
        f64::from(report.depth) / 10.0
    };
    let heading = f64::from(report.heading) / 65535.0 * 360.0;
    let location = Location {
        depth,
        ..Location::new(f64::from(report.latitude), f64::from(report.longitude))
    };
    peer.set_location(location, t);
    peer.set_attitude(Attitude::heading(heading), t);

    let rounded = geo::normalize_deg_360(heading.round());
    let values = [
        (keys::GROUND_SPEED, f64::from(report.speed) / 100.0),
        (keys::COURSE_DEGS, rounded),
        (keys::HEADING_DEGS, rounded),
    ];
    for (key, value) in values {
        peer.store_data(key, BlackboardValue::Number(value), t, true);
    }

    let mut created = Vec::with_capacity(2);
    if report.fuel > 0 {
        let mut fuel = ImcMessage::new(Payload::FuelLevel(FuelLevel {
            value: f32::from(report.fuel),
            confidence: 0.0,
            opmodes: String::new(),
        }))
        .with_header_of(msg);
        fuel.set_timestamp_millis(t);
        peer.store_data(
            keys::FUEL_LEVEL,
            BlackboardValue::Message(Box::new(fuel.clone())),
            t,
            true,
        );
        created.push(fuel);
    }

    let exec = report.exec_state;
    let mut pcs = ImcMessage::new(Payload::PlanControlState(PlanControlState {
        state: plan_state_from_exec(exec),
        plan_id: String::new(),
        plan_eta: -1,
        plan_progress: if exec >= 0 { f32::from(exec) } else { -1.0 },
        man_id: String::new(),
        man_type: 0xFFFF,
        man_eta: -1,
    }))
    .with_header_of(msg);
    pcs.set_timestamp_millis(t);
    created.push(pcs);
    created
}

/// Negative exec states are plan states, positive values are progress.
fn plan_state_from_exec(exec: i8) -> PlanState {
    match exec {
        -1 => PlanState::Ready,
        -3 => PlanState::Initializing,
        e if e > 0 => PlanState::Executing,
        _ => PlanState::Blocked,
    }
}

fn process_reported_state(ctx: &CommContext, msg: &ImcMessage, rs: &ReportedState) {
    let target = Target::lookup(ctx, &rs.sid);
    target.ensure(ctx, |_| {});
    let t = if rs.rcp_time.is_finite() {
        (rs.rcp_time * 1000.0) as i64
    } else {
        msg.timestamp_millis()
    };

    if rs.lat.is_finite() && rs.lon.is_finite() {
        let mut location = Location::new(rs.lat.to_degrees(), rs.lon.to_degrees());
        if rs.depth.is_finite() {
            location.depth = rs.depth;
        }
        target.set_location(ctx, location, t);
    }

    if rs.roll.is_finite() || rs.pitch.is_finite() || rs.yaw.is_finite() {
        let deg = |a: f64| if a.is_finite() { a.to_degrees() } else { 0.0 };
        let attitude = Attitude {
            roll_deg: deg(rs.roll),
            pitch_deg: deg(rs.pitch),
            yaw_deg: deg(rs.yaw),
        };
        target.set_attitude(ctx, attitude, t);
    }
}

fn process_asset_report(ctx: &CommContext, ar: &AssetReport) {
    let target = Target::lookup(ctx, &ar.name);
    target.ensure(ctx, |_| {});
    let t = (ar.report_time * 1000.0) as i64;

    if ar.lat.is_finite() && ar.lon.is_finite() {
        let mut location = Location::new(
            geo::normalize_deg_180(ar.lat.to_degrees()),
            geo::normalize_deg_180(ar.lon.to_degrees()),
        );
        if ar.depth.is_finite() {
            location.depth = ar.depth;
        }
        target.set_location(ctx, location, t);
    }

    if ar.cog.is_finite() && ar.sog.is_finite() && ar.sog.abs() > MIN_SOG_FOR_HEADING {
        let signed = if ar.sog < 0.0 { -ar.cog } else { ar.cog };
        let heading = geo::normalize_deg_360(signed.to_degrees());
        target.set_attitude(ctx, Attitude::heading(heading), t);
        target.store_number(keys::HEADING_DEGS, heading.round() % 360.0, t);
    }

    if ar.sog.is_finite() {
        target.store_number(keys::GROUND_SPEED, ar.sog, t);
    }
    if ar.cog.is_finite() {
        let course = geo::normalize_deg_360(ar.cog.to_degrees().round());
        target.store_number(keys::COURSE_DEGS, course, t);
    }
}

fn process_remote_sensor_info(ctx: &CommContext, msg: &ImcMessage, rsi: &RemoteSensorInfo) {
    let target = Target::lookup(ctx, &rsi.id);
    let t = msg.timestamp_millis();

    if rsi.lat.is_finite() && rsi.lon.is_finite() {
        let mut location = Location::new(rsi.lat.to_degrees(), rsi.lon.to_degrees());
        if rsi.alt.is_finite() {
            location.depth = -rsi.alt;
        }
        target.set_location(ctx, location, t);
    }
    if rsi.heading.is_finite() {
        target.set_attitude(ctx, Attitude::heading(rsi.heading.to_degrees()), t);
    }

    let kind = SystemKind::from_type_str(&rsi.sensor_class);
    match &target {
        Target::Peer(p) => p.set_kind(kind),
        Target::External(_) => target.ensure(ctx, |e| {
            e.kind = kind;
            e.sensor_class = Some(rsi.sensor_class.clone());
        }),
    }
}
