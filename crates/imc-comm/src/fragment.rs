// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reassembly of MessagePart fragments.
//!
//! Parts are buffered by (source, uid) until all `num_frags` pieces have
//! arrived, in any order. Incomplete sets expire after a timeout; when too
//! many sets are pending the least recently touched one is dropped.

use crate::id::PeerId;
use crate::message::MessagePart;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default timeout for incomplete sets.
pub const DEFAULT_FRAGMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on incomplete sets.
pub const DEFAULT_MAX_PENDING: usize = 64;

struct PartSet {
    parts: HashMap<u8, Vec<u8>>,
    num_frags: u8,
    first_seen: Instant,
    last_updated: Instant,
}

impl PartSet {
    fn assemble(&self) -> Vec<u8> {
        let size = self.parts.values().map(Vec::len).sum();
        let mut out = Vec::with_capacity(size);
        for n in 0..self.num_frags {
            if let Some(data) = self.parts.get(&n) {
                out.extend_from_slice(data);
            }
        }
        out
    }
}

/// Bounded MessagePart reassembler.
pub struct FragmentReassembler {
    pending: HashMap<(PeerId, u8), PartSet>,
    max_pending: usize,
    timeout: Duration,
}

impl Default for FragmentReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING, DEFAULT_FRAGMENT_TIMEOUT)
    }
}

impl FragmentReassembler {
    pub fn new(max_pending: usize, timeout: Duration) -> Self {
        Self {
            pending: HashMap::with_capacity(max_pending),
            max_pending: max_pending.max(1),
            timeout,
        }
    }

    /// Add one part. Returns the encoded original message once complete.
    pub fn insert(&mut self, src: PeerId, part: &MessagePart) -> Option<Vec<u8>> {
        if part.num_frags == 0 || part.frag_number >= part.num_frags {
            log::debug!(
                "[Frag] {} uid={} bad part {}/{}",
                src,
                part.uid,
                part.frag_number,
                part.num_frags
            );
            return None;
        }

        self.evict_expired();

        let key = (src, part.uid);
        let now = Instant::now();
        if !self.pending.contains_key(&key) && self.pending.len() >= self.max_pending {
            self.evict_lru();
        }
        let set = self.pending.entry(key).or_insert_with(|| PartSet {
            parts: HashMap::new(),
            num_frags: part.num_frags,
            first_seen: now,
            last_updated: now,
        });
        if set.num_frags != part.num_frags {
            // a new message reusing the uid
            log::debug!(
                "[Frag] {} uid={} restarted ({} -> {} parts)",
                src,
                part.uid,
                set.num_frags,
                part.num_frags
            );
            set.parts.clear();
            set.num_frags = part.num_frags;
            set.first_seen = now;
        }
        set.last_updated = now;
        set.parts.insert(part.frag_number, part.data.clone());

        if set.parts.len() < set.num_frags as usize {
            return None;
        }
        let set = self.pending.remove(&key)?;
        let data = set.assemble();
        log::debug!(
            "[Frag] {} uid={} reassembled {} bytes from {} parts",
            src,
            part.uid,
            data.len(),
            set.num_frags
        );
        Some(data)
    }

    /// Drop sets older than the timeout. Returns how many were dropped.
    pub fn evict_expired(&mut self) -> usize {
        let now = Instant::now();
        let timeout = self.timeout;
        let before = self.pending.len();
        self.pending.retain(|(src, uid), set| {
            let keep = now.duration_since(set.first_seen) <= timeout;
            if !keep {
                log::debug!(
                    "[Frag] {} uid={} expired with {}/{} parts",
                    src,
                    uid,
                    set.parts.len(),
                    set.num_frags
                );
            }
            keep
        });
        before - self.pending.len()
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, set)| set.last_updated)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            self.pending.remove(&key);
            log::debug!("[Frag] {} uid={} evicted (buffer full)", key.0, key.1);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_parts(uid: u8, payload: &[u8], chunk: usize) -> Vec<MessagePart> {
        let chunks: Vec<&[u8]> = payload.chunks(chunk).collect();
        chunks
            .iter()
            .enumerate()
            .map(|(i, c)| MessagePart {
                uid,
                frag_number: i as u8,
                num_frags: chunks.len() as u8,
                data: c.to_vec(),
            })
            .collect()
    }

    #[test]
    fn test_in_order_reassembly() {
        let mut buf = FragmentReassembler::default();
        let src = PeerId::new(0x22);
        let parts = make_parts(1, b"hello fragmented world", 5);
        let last = parts.len() - 1;
        for (i, p) in parts.iter().enumerate() {
            let out = buf.insert(src, p);
            if i < last {
                assert!(out.is_none());
            } else {
                assert_eq!(out.unwrap(), b"hello fragmented world");
            }
        }
        assert_eq!(buf.pending_count(), 0);
    }

    #[test]
    fn test_random_order_reassembly() {
        let payload: Vec<u8> = (0..200u8).collect();
        for _ in 0..20 {
            let mut buf = FragmentReassembler::default();
            let mut parts = make_parts(9, &payload, 16);
            fastrand::shuffle(&mut parts);
            let mut done = None;
            for p in &parts {
                if let Some(out) = buf.insert(PeerId::new(0x30), p) {
                    done = Some(out);
                }
            }
            assert_eq!(done.unwrap(), payload);
        }
    }

    #[test]
    fn test_sources_do_not_mix() {
        let mut buf = FragmentReassembler::default();
        let a = make_parts(1, b"aaaa", 2);
        let b = make_parts(1, b"bbbb", 2);
        assert!(buf.insert(PeerId::new(1), &a[0]).is_none());
        assert!(buf.insert(PeerId::new(2), &b[0]).is_none());
        assert_eq!(buf.insert(PeerId::new(2), &b[1]).unwrap(), b"bbbb");
        assert_eq!(buf.insert(PeerId::new(1), &a[1]).unwrap(), b"aaaa");
    }

    #[test]
    fn test_expired_sets_dropped() {
        let mut buf = FragmentReassembler::new(8, Duration::from_millis(20));
        let parts = make_parts(3, b"abcdef", 2);
        buf.insert(PeerId::new(1), &parts[0]);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(buf.evict_expired(), 1);
        assert!(buf.insert(PeerId::new(1), &parts[1]).is_none());
    }

    #[test]
    fn test_full_buffer_evicts_oldest() {
        let mut buf = FragmentReassembler::new(2, Duration::from_secs(10));
        let first = make_parts(1, b"xxyy", 2);
        buf.insert(PeerId::new(1), &first[0]);
        std::thread::sleep(Duration::from_millis(2));
        buf.insert(PeerId::new(2), &make_parts(1, b"xxyy", 2)[0]);
        std::thread::sleep(Duration::from_millis(2));
        buf.insert(PeerId::new(3), &make_parts(1, b"xxyy", 2)[0]);
        assert_eq!(buf.pending_count(), 2);
        // the set from source 1 is gone, so its last part starts a new set
        assert!(buf.insert(PeerId::new(1), &first[1]).is_none());
    }

    #[test]
    fn test_bad_part_rejected() {
        let mut buf = FragmentReassembler::default();
        let part = MessagePart {
            uid: 1,
            frag_number: 3,
            num_frags: 2,
            data: vec![1],
        };
        assert!(buf.insert(PeerId::new(1), &part).is_none());
        assert_eq!(buf.pending_count(), 0);
    }
}
