// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::float_cmp)] // Test assertions with constants
#![allow(clippy::unreadable_literal)] // Ids and timestamps
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Announce ingestion, unknown senders and activity, end to end through the
//! router.

mod common;

use common::*;
use imc_comm::message::{Announce, StateReport, SystemType};
use imc_comm::{Authority, ImcMessage, Payload, PeerEvent, PeerId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const XPLORE: PeerId = PeerId::new(0x4d15);

fn make_announce(src: PeerId, name: &str, services: &str) -> ImcMessage {
    let mut msg = make_msg(
        src,
        Payload::Announce(Announce {
            sys_name: name.into(),
            sys_type: SystemType::Uuv,
            owner: 0xFFFF,
            lat: 0.7188,
            lon: -0.1527,
            height: 0.0,
            services: services.into(),
        }),
    );
    msg.header.dst = PeerId::ANNOUNCE;
    msg
}

#[test]
fn test_announce_from_unknown_peer() {
    let fx = make_fixture(make_config(), &["10.0.0.5"]);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    fx.router
        .register_status_listener(None, Arc::new(move |e| sink.lock().push(*e)));

    let ann = make_announce(
        XPLORE,
        "lauv-xplore-1",
        "imc+udp://10.0.0.5:6002/;imc+tcp://10.0.0.5:6001/",
    );
    fx.router.process_inbound(from_udp("10.0.0.5:30100"), ann);

    let peer = fx.router.peer(XPLORE).expect("peer registered");
    assert_eq!(peer.name, "lauv-xplore-1");
    assert_eq!(peer.endpoints.host, "10.0.0.5");
    assert!(!peer.endpoints.host_guessed);
    assert_eq!(peer.endpoints.udp_port, 6002);
    assert_eq!(peer.endpoints.tcp_port, 6001);
    assert!(peer.endpoints.udp_enabled);
    assert!(peer.endpoints.tcp_enabled);
    assert!(peer.announce_fresh);
    assert_eq!(peer.authority, Authority::SystemFull);
    assert!(fx.router.connection(XPLORE).is_some());
    assert!(events.lock().contains(&PeerEvent::Added(XPLORE)));

    // First sighting asks for the entity list over the preferred transport.
    let queries = fx.udp.sent_of("EntityList");
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].0, "10.0.0.5:6002".parse().unwrap());
}

#[test]
fn test_second_announce_updates_same_peer() {
    let fx = make_fixture(make_config(), &["10.0.0.6"]);
    fx.router.process_inbound(
        from_udp("10.0.0.5:30100"),
        make_announce(XPLORE, "lauv-xplore-1", "imc+udp://10.0.0.5:6002/;"),
    );
    fx.router.process_inbound(
        from_udp("10.0.0.6:30100"),
        make_announce(XPLORE, "lauv-xplore-1", "imc+udp://10.0.0.6:6002/;"),
    );

    assert_eq!(fx.router.registry().len(), 1);
    let peer = fx.router.peer(XPLORE).unwrap();
    assert_eq!(peer.endpoints.host, "10.0.0.6");
    assert!(!peer.endpoints.tcp_enabled);
}

#[test]
fn test_invalid_sources_never_reach_a_connection() {
    let fx = make_fixture(make_config(), &[]);
    for src in [PeerId::NULL, PeerId::BROADCAST, PeerId::ANNOUNCE] {
        fx.router
            .process_inbound(from_udp("10.0.0.5:6002"), make_msg(src, Payload::Heartbeat));
        assert!(fx.router.connection(src).is_none());
    }
    let stats = fx.router.stats();
    assert_eq!(stats.inbound, 3);
    assert_eq!(stats.dropped, 3);
    assert!(fx.router.registry().is_empty());
}

#[test]
fn test_activity_after_three_arrivals() {
    let fx = make_fixture(make_config(), &[]);
    let (tx, rx) = crossbeam::channel::unbounded();
    fx.router.register_status_listener(
        Some(XPLORE),
        Arc::new(move |e| {
            let _ = tx.send(*e);
        }),
    );

    for _ in 0..2 {
        fx.router
            .process_inbound(from_udp("10.0.0.5:6002"), make_msg(XPLORE, Payload::Heartbeat));
    }
    assert!(!fx.router.peer(XPLORE).unwrap().active);

    fx.router
        .process_inbound(from_udp("10.0.0.5:6002"), make_msg(XPLORE, Payload::Heartbeat));
    assert!(fx.router.peer(XPLORE).unwrap().active);

    let events: Vec<PeerEvent> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![
            PeerEvent::Added(XPLORE),
            PeerEvent::StatusChanged {
                id: XPLORE,
                active: true
            }
        ]
    );
}

#[test]
fn test_unknown_traffic_bootstraps_then_redirects() {
    let fx = make_fixture(make_config(), &[]);
    fx.router
        .process_inbound(from_udp("10.0.0.9:6002"), make_msg(XPLORE, Payload::Heartbeat));
    let other = PeerId::new(0x4d16);
    fx.router
        .process_inbound(from_udp("10.0.0.9:6002"), make_msg(other, Payload::Heartbeat));

    let stats = fx.router.stats();
    assert_eq!(stats.bootstrapped, 1);
    assert_eq!(stats.redirected, 1);
    assert!(fx.router.peer(other).is_none());
    assert_eq!(
        fx.router.connection(XPLORE).unwrap().bootstrap_addr(),
        Some("10.0.0.9:6002".parse().unwrap())
    );
}

#[test]
fn test_messages_reach_global_and_peer_listeners() {
    let fx = make_fixture(make_config(), &[]);
    let (global_tx, global_rx) = crossbeam::channel::unbounded();
    let (peer_tx, peer_rx) = crossbeam::channel::unbounded();
    fx.router.register_listener(
        Arc::new(move |_, m| {
            let _ = global_tx.send(m.abbrev().to_string());
        }),
        Some(Arc::new(|m: &ImcMessage| m.abbrev() == "Heartbeat")),
    );
    fx.router
        .register_peer_listener(
            XPLORE,
            Arc::new(move |info, _| {
                let _ = peer_tx.send(info.publisher);
            }),
            None,
        )
        .unwrap();

    fx.router
        .process_inbound(from_udp("10.0.0.5:6002"), make_msg(XPLORE, Payload::Heartbeat));

    let timeout = Duration::from_secs(2);
    assert_eq!(global_rx.recv_timeout(timeout).unwrap(), "Heartbeat");
    assert_eq!(
        peer_rx.recv_timeout(timeout).unwrap(),
        Some("10.0.0.5:6002".parse().unwrap())
    );
}

#[test]
fn test_state_report_synthesizes_fuel_and_plan_state() {
    let fx = make_fixture(make_config(), &["10.0.0.5"]);
    fx.router.process_inbound(
        from_udp("10.0.0.5:30100"),
        make_announce(XPLORE, "lauv-xplore-1", "imc+udp://10.0.0.5:6002/;"),
    );
    let (tx, rx) = crossbeam::channel::unbounded();
    fx.router.register_listener(
        Arc::new(move |_, m| {
            let _ = tx.send(m.abbrev().to_string());
        }),
        None,
    );

    // a second ahead of the announce position
    let stime = (imc_comm::message::now_millis() / 1000) as u32 + 1;
    let report = StateReport {
        stime,
        latitude: 41.18,
        longitude: -8.70,
        altitude: 0,
        depth: 25,
        heading: 16384,
        speed: 120,
        fuel: 80,
        exec_state: -1,
        plan_checksum: 0,
    };
    fx.router.process_inbound(
        from_udp("10.0.0.5:6002"),
        make_msg(XPLORE, Payload::StateReport(report)),
    );

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(rx.recv_timeout(Duration::from_secs(2)).unwrap());
    }
    seen.sort();
    assert_eq!(seen, vec!["FuelLevel", "PlanControlState", "StateReport"]);

    let peer = fx.router.peer(XPLORE).unwrap();
    assert!((peer.location.lat_deg - 41.18).abs() < 1e-4);
    assert!((peer.location.depth - 2.5).abs() < 1e-9);
    assert_eq!(peer.location_time, i64::from(stime) * 1000);
}
