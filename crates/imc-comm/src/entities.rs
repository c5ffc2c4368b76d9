// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-peer entity name <-> id aliases.
//!
//! Maps are keyed by peer *name* so they survive id changes and restarts.
//! Every change rewrites a small properties file:
//!
//! ```text
//! # entity aliases
//! lauv-xplore-1=Daemon\=0;Navigation\=5;Sidescan\=23
//! ```

use crate::error::{CommError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Bidirectional alias table for one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityMap {
    by_name: HashMap<String, u8>,
    by_id: BTreeMap<u8, String>,
}

impl EntityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `Label=id;Label=id` tuple list. Malformed pairs are skipped.
    pub fn from_tuple_list(list: &str) -> Self {
        let mut map = Self::new();
        for pair in list.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((label, id)) = pair.rsplit_once('=') else {
                continue;
            };
            let label = label.trim();
            match id.trim().parse::<u8>() {
                Ok(id) if !label.is_empty() => map.insert(id, label),
                _ => log::debug!("[Entities] skipping malformed pair '{}'", pair),
            }
        }
        map
    }

    /// Insert keeping both directions unique: any alias clashing on name or
    /// id is dropped first.
    pub fn insert(&mut self, id: u8, name: &str) {
        if let Some(old_id) = self.by_name.remove(name) {
            self.by_id.remove(&old_id);
        }
        if let Some(old_name) = self.by_id.remove(&id) {
            self.by_name.remove(&old_name);
        }
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, name.to_string());
    }

    pub fn id_of(&self, name: &str) -> Option<u8> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: u8) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// `Label=id;Label=id`, ordered by id.
    pub fn to_tuple_list(&self) -> String {
        self.by_id
            .iter()
            .map(|(id, name)| format!("{}={}", name, id))
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &str)> {
        self.by_id.iter().map(|(id, name)| (*id, name.as_str()))
    }
}

/// Alias tables for all peers, optionally persisted.
#[derive(Debug, Default)]
pub struct EntityResolver {
    maps: RwLock<HashMap<String, EntityMap>>,
    store: Option<PathBuf>,
    /// Held from snapshot to rename; one save at a time.
    save_lock: Mutex<()>,
}

impl EntityResolver {
    /// Resolver without persistence.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Resolver persisted at `path`; existing content is loaded.
    pub fn open(path: &Path) -> Result<Self> {
        let mut maps = HashMap::new();
        if path.exists() {
            let text = fs::read_to_string(path)
                .map_err(|e| CommError::Persistence(format!("{}: {}", path.display(), e)))?;
            for (key, value) in parse_properties(&text) {
                maps.insert(key, EntityMap::from_tuple_list(&value));
            }
            log::debug!(
                "[Entities] loaded {} peer alias tables from {}",
                maps.len(),
                path.display()
            );
        }
        Ok(Self {
            maps: RwLock::new(maps),
            store: Some(path.to_path_buf()),
            save_lock: Mutex::new(()),
        })
    }

    /// Replace the whole alias table of `peer` from a tuple list.
    pub fn set_entities(&self, peer: &str, list: &str) {
        self.set_entity_map(peer, EntityMap::from_tuple_list(list));
    }

    /// Replace the whole alias table of `peer`.
    pub fn set_entity_map(&self, peer: &str, map: EntityMap) {
        {
            let mut maps = self.maps.write();
            if maps.get(peer) == Some(&map) {
                return;
            }
            maps.insert(peer.to_string(), map);
        }
        self.persist();
    }

    /// Add one alias (from an EntityInfo).
    pub fn add_entity(&self, peer: &str, id: u8, name: &str) {
        {
            let mut maps = self.maps.write();
            let map = maps.entry(peer.to_string()).or_default();
            if map.name_of(id) == Some(name) {
                return;
            }
            map.insert(id, name);
        }
        self.persist();
    }

    pub fn resolve_id(&self, peer: &str, name: &str) -> Option<u8> {
        self.maps.read().get(peer).and_then(|m| m.id_of(name))
    }

    pub fn resolve_name(&self, peer: &str, id: u8) -> Option<String> {
        self.maps
            .read()
            .get(peer)
            .and_then(|m| m.name_of(id).map(str::to_string))
    }

    pub fn entities(&self, peer: &str) -> Option<EntityMap> {
        self.maps.read().get(peer).cloned()
    }

    pub fn has_entities(&self, peer: &str) -> bool {
        self.maps.read().get(peer).is_some_and(|m| !m.is_empty())
    }

    /// Forget the aliases cached for `peer`.
    pub fn clear_aliases(&self, peer: &str) {
        let removed = self.maps.write().remove(peer).is_some();
        if removed {
            log::debug!("[Entities] cleared aliases for '{}'", peer);
            self.persist();
        }
    }

    fn persist(&self) {
        let Some(path) = &self.store else {
            return;
        };
        let _save = self.save_lock.lock();
        let snapshot: BTreeMap<String, String> = self
            .maps
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.to_tuple_list()))
            .collect();
        if let Err(e) = write_properties(path, &snapshot) {
            log::warn!("[Entities] failed to persist {}: {}", path.display(), e);
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Split a properties line into key and value at the first unescaped
/// separator, unescaping both.
fn split_property(line: &str) -> Option<(String, String)> {
    let mut key = String::new();
    let mut value = String::new();
    let mut in_key = true;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        let target = if in_key { &mut key } else { &mut value };
        match c {
            '\\' => match chars.next() {
                Some('n') => target.push('\n'),
                Some(other) => target.push(other),
                None => {}
            },
            '=' | ':' if in_key => in_key = false,
            _ => target.push(c),
        }
    }
    let key = key.trim().to_string();
    (!in_key && !key.is_empty()).then(|| (key, value.trim().to_string()))
}

fn parse_properties(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('!'))
        .filter_map(split_property)
        .collect()
}

fn write_properties(path: &Path, entries: &BTreeMap<String, String>) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        writeln!(file, "# entity aliases")?;
        for (key, value) in entries {
            writeln!(file, "{}={}", escape(key), escape(value))?;
        }
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tuple_list() {
        let map = EntityMap::from_tuple_list("Daemon=0;Navigation=5; Sidescan = 23;bad;x=300");
        assert_eq!(map.len(), 3);
        assert_eq!(map.id_of("Sidescan"), Some(23));
        assert_eq!(map.name_of(5), Some("Navigation"));
        assert_eq!(map.to_tuple_list(), "Daemon=0;Navigation=5;Sidescan=23");
    }

    #[test]
    fn test_insert_keeps_both_directions_unique() {
        let mut map = EntityMap::new();
        map.insert(1, "A");
        map.insert(2, "A");
        assert_eq!(map.name_of(1), None);
        assert_eq!(map.id_of("A"), Some(2));
        map.insert(2, "B");
        assert_eq!(map.id_of("A"), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_resolve_roundtrip() {
        let resolver = EntityResolver::in_memory();
        resolver.set_entities("lauv-xplore-1", "Daemon=0;Navigation=5;Sidescan=23");
        for id in [0u8, 5, 23] {
            let name = resolver.resolve_name("lauv-xplore-1", id).unwrap();
            assert_eq!(resolver.resolve_id("lauv-xplore-1", &name), Some(id));
        }
        assert_eq!(resolver.resolve_name("lauv-xplore-1", 99), None);
        assert_eq!(resolver.resolve_id("other", "Daemon"), None);
    }

    #[test]
    fn test_replacement_is_wholesale() {
        let resolver = EntityResolver::in_memory();
        resolver.set_entities("p", "Old=1;Shared=2");
        resolver.set_entities("p", "New=3;Shared=4");
        assert_eq!(resolver.resolve_name("p", 1), None);
        assert_eq!(resolver.resolve_name("p", 2), None);
        assert_eq!(resolver.resolve_id("p", "Old"), None);
        assert_eq!(resolver.resolve_id("p", "Shared"), Some(4));
        assert_eq!(resolver.resolve_id("p", "New"), Some(3));
    }

    #[test]
    fn test_clear_aliases() {
        let resolver = EntityResolver::in_memory();
        resolver.set_entities("p", "A=1");
        assert!(resolver.has_entities("p"));
        resolver.clear_aliases("p");
        assert!(!resolver.has_entities("p"));
        assert_eq!(resolver.resolve_id("p", "A"), None);
    }

    #[test]
    fn test_persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("entities.properties");
        {
            let resolver = EntityResolver::open(&path).unwrap();
            resolver.set_entities("lauv-xplore-1", "Daemon=0;Path Control=12");
            resolver.add_entity("caravela", 4, "GPS");
        }
        let reopened = EntityResolver::open(&path).unwrap();
        assert_eq!(reopened.resolve_id("lauv-xplore-1", "Path Control"), Some(12));
        assert_eq!(reopened.resolve_name("caravela", 4).as_deref(), Some("GPS"));
    }

    #[test]
    fn test_properties_escaping() {
        let mut entries = BTreeMap::new();
        entries.insert("odd:name=x".to_string(), "A=1;B=2".to_string());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.properties");
        write_properties(&path, &entries).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let parsed = parse_properties(&text);
        assert_eq!(parsed, vec![("odd:name=x".to_string(), "A=1;B=2".to_string())]);
    }
}
