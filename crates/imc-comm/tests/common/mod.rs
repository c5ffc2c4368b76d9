// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures: an in-memory transport and a scripted prober.

#![allow(dead_code)]

use imc_comm::transport::NetInterface;
use imc_comm::{
    CommConfig, CommError, DeliveryCallback, DeliveryResult, EntityResolver, ImcMessage,
    InboundHandler, MessageInfo, MessageRouter, PeerId, Prober, Result, StaticInterfaces,
    Transport, TransportKind,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Records every handoff and answers with a fixed outcome.
pub struct RecordingTransport {
    kind: TransportKind,
    port: u16,
    outcome: Mutex<Option<DeliveryResult>>,
    refuse: Mutex<bool>,
    sent: Mutex<Vec<(SocketAddr, ImcMessage)>>,
}

impl RecordingTransport {
    pub fn new(kind: TransportKind, port: u16) -> Arc<Self> {
        Arc::new(Self {
            kind,
            port,
            outcome: Mutex::new(Some(DeliveryResult::Success)),
            refuse: Mutex::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Outcome reported for later sends; `None` never answers.
    pub fn answer_with(&self, outcome: Option<DeliveryResult>) {
        *self.outcome.lock() = outcome;
    }

    pub fn refuse_all(&self, refuse: bool) {
        *self.refuse.lock() = refuse;
    }

    pub fn sent(&self) -> Vec<(SocketAddr, ImcMessage)> {
        self.sent.lock().clone()
    }

    pub fn destinations(&self) -> Vec<SocketAddr> {
        self.sent.lock().iter().map(|(a, _)| *a).collect()
    }

    pub fn sent_of(&self, abbrev: &str) -> Vec<(SocketAddr, ImcMessage)> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, m)| m.abbrev() == abbrev)
            .cloned()
            .collect()
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
            return Err(CommError::TransportRejected(format!("{} refused", self.kind)));
        }
        self.sent.lock().push((dest, msg.clone()));
        let outcome = self.outcome.lock().clone();
        if let Some(result) = outcome {
            callback(msg, &result);
        }
        Ok(())
    }

    fn local_port(&self) -> Option<u16> {
        Some(self.port)
    }

    fn shutdown(&self) {}
}

/// Reachable iff listed.
pub struct ScriptedProber(pub HashSet<IpAddr>);

impl ScriptedProber {
    pub fn reaching(ips: &[&str]) -> Arc<Self> {
        Arc::new(Self(ips.iter().filter_map(|ip| ip.parse().ok()).collect()))
    }
}

impl Prober for ScriptedProber {
    fn probe(&self, ip: IpAddr, _timeout: Duration) -> bool {
        self.0.contains(&ip)
    }
}

pub struct Fixture {
    pub router: MessageRouter,
    pub udp: Arc<RecordingTransport>,
    pub tcp: Arc<RecordingTransport>,
    pub multicast: Arc<RecordingTransport>,
}

/// Config with every periodic job disabled.
pub fn make_config() -> CommConfig {
    CommConfig {
        local_id: PeerId::new(0x4001),
        system_name: "ccu-test".into(),
        multicast_ports: "30100-30101".into(),
        announce_multicast_period_ms: -1,
        announce_broadcast_period_ms: -1,
        poll_period_ms: -1,
        heartbeat_period_ms: -1,
        ..CommConfig::default()
    }
}

pub fn make_interfaces() -> Arc<StaticInterfaces> {
    Arc::new(StaticInterfaces(vec![
        NetInterface {
            addr: Ipv4Addr::new(127, 0, 0, 1),
            broadcast: None,
        },
        NetInterface {
            addr: Ipv4Addr::new(10, 0, 0, 2),
            broadcast: Some(Ipv4Addr::new(10, 0, 0, 255)),
        },
    ]))
}

pub fn make_fixture(config: CommConfig, reachable: &[&str]) -> Fixture {
    make_fixture_with(config, reachable, EntityResolver::in_memory())
}

pub fn make_fixture_with(
    config: CommConfig,
    reachable: &[&str],
    entities: EntityResolver,
) -> Fixture {
    let udp = RecordingTransport::new(TransportKind::Udp, 6001);
    let tcp = RecordingTransport::new(TransportKind::Tcp, 6001);
    let multicast = RecordingTransport::new(TransportKind::Multicast, 30100);
    let router = MessageRouter::builder(config)
        .transport(udp.clone())
        .transport(tcp.clone())
        .transport(multicast.clone())
        .prober(ScriptedProber::reaching(reachable))
        .interfaces(make_interfaces())
        .entities(entities)
        .build()
        .unwrap();
    router.start().unwrap();
    Fixture {
        router,
        udp,
        tcp,
        multicast,
    }
}

pub fn make_msg(src: PeerId, payload: imc_comm::Payload) -> ImcMessage {
    let mut msg = ImcMessage::new(payload);
    msg.header.src = src;
    msg.set_timestamp_millis(imc_comm::message::now_millis());
    msg
}

pub fn from_udp(addr: &str) -> MessageInfo {
    MessageInfo::from_network(addr.parse().unwrap(), TransportKind::Udp)
}

/// Collects results handed to a delivery callback.
pub fn recording_listener() -> (DeliveryCallback, Arc<Mutex<Vec<DeliveryResult>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: DeliveryCallback = Arc::new(move |_, r| sink.lock().push(r.clone()));
    (callback, seen)
}
