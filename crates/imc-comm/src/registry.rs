// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Directory of known peers.
//!
//! Owned by the router and shared by reference with the components that
//! need lookups. One table lock guards the id map and its registration
//! order; `Arc<Peer>` handles are returned so callers never hold the lock
//! while touching a peer.

use crate::id::PeerId;
use crate::peer::{ExternalSystem, Peer, SystemKind, VehicleKind};
use crate::services;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct PeerTable {
    by_id: HashMap<PeerId, Arc<Peer>>,
    /// Registration order, used for "first match" lookups
    order: Vec<PeerId>,
}

impl PeerTable {
    fn iter(&self) -> impl Iterator<Item = &Arc<Peer>> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }
}

/// Registry of peers keyed by id, plus externally reported systems keyed by
/// name.
#[derive(Debug, Default)]
pub struct SystemRegistry {
    peers: RwLock<PeerTable>,
    externals: Mutex<HashMap<String, ExternalSystem>>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `peer`, or rename the peer already registered under its id.
    ///
    /// Returns the registered instance; there is never more than one
    /// `Peer` per id.
    pub fn register(&self, peer: Peer) -> Arc<Peer> {
        let mut table = self.peers.write();
        if let Some(existing) = table.by_id.get(&peer.id()) {
            if !peer.has_default_name() && existing.name() != peer.name() {
                log::debug!(
                    "[Registry] {} renamed '{}' -> '{}'",
                    peer.id(),
                    existing.name(),
                    peer.name()
                );
                existing.set_name(&peer.name());
            }
            return Arc::clone(existing);
        }
        let id = peer.id();
        let peer = Arc::new(peer);
        table.by_id.insert(id, Arc::clone(&peer));
        table.order.push(id);
        log::debug!("[Registry] registered {} as '{}'", id, peer.name());
        peer
    }

    /// Existing peer for `id`, or a new one. The flag tells which.
    pub fn get_or_create(&self, id: PeerId) -> (Arc<Peer>, bool) {
        if let Some(peer) = self.by_id(id) {
            return (peer, false);
        }
        let mut table = self.peers.write();
        if let Some(existing) = table.by_id.get(&id) {
            return (Arc::clone(existing), false);
        }
        let peer = Arc::new(Peer::new(id));
        table.by_id.insert(id, Arc::clone(&peer));
        table.order.push(id);
        log::debug!("[Registry] created {}", id);
        (peer, true)
    }

    pub fn by_id(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.peers.read().by_id.get(&id).cloned()
    }

    /// Case-insensitive; first registered match wins.
    pub fn by_name(&self, name: &str) -> Option<Arc<Peer>> {
        self.peers
            .read()
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Peers of `kind`. `Vehicle(Unknown)` matches every vehicle.
    pub fn by_type(&self, kind: SystemKind, active_only: bool) -> Vec<Arc<Peer>> {
        self.peers
            .read()
            .iter()
            .filter(|p| kind_matches(kind, p.kind()))
            .filter(|p| !active_only || p.is_active())
            .cloned()
            .collect()
    }

    /// Peers advertising service `name` (any scheme), optionally of a kind.
    pub fn by_service(
        &self,
        name: &str,
        kind: Option<SystemKind>,
        active_only: bool,
    ) -> Vec<Arc<Peer>> {
        self.peers
            .read()
            .iter()
            .filter(|p| kind.map_or(true, |k| kind_matches(k, p.kind())))
            .filter(|p| !active_only || p.is_active())
            .filter(|p| services::service_provided(&p.services(), "*", name))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Peer>> {
        self.peers.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutate (creating if needed) an external system record.
    pub fn update_external<R>(&self, name: &str, f: impl FnOnce(&mut ExternalSystem) -> R) -> R {
        let mut externals = self.externals.lock();
        let ext = externals
            .entry(name.to_string())
            .or_insert_with(|| ExternalSystem::new(name));
        f(ext)
    }

    pub fn external(&self, name: &str) -> Option<ExternalSystem> {
        self.externals.lock().get(name).cloned()
    }

    pub fn externals(&self) -> Vec<ExternalSystem> {
        self.externals.lock().values().cloned().collect()
    }
}

fn kind_matches(query: SystemKind, actual: SystemKind) -> bool {
    match query {
        SystemKind::Vehicle(VehicleKind::Unknown) => actual.is_vehicle(),
        other => other == actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn make_id(n: u16) -> PeerId {
        PeerId::new(0x4000 + n)
    }

    #[test]
    fn test_registry_new() {
        let reg = SystemRegistry::new();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_register_is_idempotent() {
        let reg = SystemRegistry::new();
        let a = reg.register(Peer::with_name(make_id(1), "alpha"));
        let b = reg.register(Peer::with_name(make_id(1), "alpha"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_register_renames_existing() {
        let reg = SystemRegistry::new();
        let first = reg.register(Peer::new(make_id(1)));
        reg.register(Peer::with_name(make_id(1), "lauv-seacon-1"));
        assert_eq!(first.name(), "lauv-seacon-1");
        // default names never overwrite a real one
        reg.register(Peer::new(make_id(1)));
        assert_eq!(first.name(), "lauv-seacon-1");
    }

    #[test]
    fn test_distinct_ids_never_alias() {
        let reg = SystemRegistry::new();
        let a = reg.register(Peer::with_name(make_id(1), "same"));
        let b = reg.register(Peer::with_name(make_id(2), "same"));
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(
            &reg.by_id(make_id(1)).unwrap(),
            &reg.by_id(make_id(2)).unwrap()
        ));
    }

    #[test]
    fn test_by_name_case_insensitive_first_match() {
        let reg = SystemRegistry::new();
        let first = reg.register(Peer::with_name(make_id(1), "Twin"));
        reg.register(Peer::with_name(make_id(2), "twin"));
        let found = reg.by_name("TWIN").unwrap();
        assert!(Arc::ptr_eq(&found, &first));
        assert!(reg.by_name("nobody").is_none());
    }

    #[test]
    fn test_by_type_and_active() {
        let reg = SystemRegistry::new();
        let auv = reg.register(Peer::with_name(make_id(1), "auv"));
        auv.set_kind(SystemKind::Vehicle(VehicleKind::Uuv));
        let usv = reg.register(Peer::with_name(make_id(2), "usv"));
        usv.set_kind(SystemKind::Vehicle(VehicleKind::Usv));
        let ccu = reg.register(Peer::with_name(make_id(3), "ccu"));
        ccu.set_kind(SystemKind::Ccu);

        assert_eq!(reg.by_type(SystemKind::Vehicle(VehicleKind::Unknown), false).len(), 2);
        assert_eq!(reg.by_type(SystemKind::Vehicle(VehicleKind::Usv), false).len(), 1);
        assert_eq!(reg.by_type(SystemKind::Ccu, false).len(), 1);
        assert!(reg.by_type(SystemKind::Ccu, true).is_empty());
        ccu.set_active(true);
        assert_eq!(reg.by_type(SystemKind::Ccu, true).len(), 1);
    }

    #[test]
    fn test_by_service() {
        let reg = SystemRegistry::new();
        let a = reg.register(Peer::with_name(make_id(1), "a"));
        a.set_services("imc+udp://10.0.0.5:6002/;http://10.0.0.5:8080/acoustic/");
        let b = reg.register(Peer::with_name(make_id(2), "b"));
        b.set_services("imc+udp://10.0.0.6:6002/");

        let found = reg.by_service("acoustic", None, false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), make_id(1));
        assert!(reg.by_service("acoustic", Some(SystemKind::Ccu), false).is_empty());
    }

    #[test]
    fn test_concurrent_get_or_create_single_instance() {
        let reg = Arc::new(SystemRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || reg.get_or_create(make_id(7)).0)
            })
            .collect();
        let peers: Vec<Arc<Peer>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(peers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_externals() {
        let reg = SystemRegistry::new();
        reg.update_external("buoy-1", |e| e.sensor_class = Some("buoy".into()));
        assert_eq!(
            reg.external("buoy-1").unwrap().sensor_class.as_deref(),
            Some("buoy")
        );
        assert_eq!(reg.externals().len(), 1);
    }
}
