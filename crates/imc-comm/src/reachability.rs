// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cached host reachability with racing probes.
//!
//! Each address is probed at most once per TTL window (120s). A lookup over
//! several candidates starts one probe per uncached candidate on the worker
//! pool and returns the first confirmed-reachable candidate, or `None` once
//! the caller's timeout elapses. Probes still running at that point finish in
//! the background and populate the cache.

use crate::pool::WorkerPool;
use crossbeam::channel;
use lru::LruCache;
use parking_lot::Mutex;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a probe result stays valid.
pub const REACHABILITY_TTL: Duration = Duration::from_secs(120);

const CACHE_CAPACITY: usize = 1024;

/// Port probed by [`TcpEchoProber`].
const ECHO_PORT: u16 = 7;

/// Answers "does this host respond at the network level?".
pub trait Prober: Send + Sync {
    fn probe(&self, addr: IpAddr, timeout: Duration) -> bool;
}

/// Unprivileged probe: a TCP connect to the echo port. Both an accepted
/// connection and an explicit refusal mean the host is up.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpEchoProber;

impl Prober for TcpEchoProber {
    fn probe(&self, addr: IpAddr, timeout: Duration) -> bool {
        if addr.is_loopback() || addr.is_unspecified() {
            return true;
        }
        match TcpStream::connect_timeout(&SocketAddr::new(addr, ECHO_PORT), timeout) {
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => true,
            Err(e) => {
                log::trace!("[Reach] probe {} failed: {}", addr, e);
                false
            }
        }
    }
}

/// One cached probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachabilityRecord {
    pub reachable: bool,
    pub tested_at: Instant,
}

/// Probe/hit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReachabilityStats {
    pub probes: u64,
    pub cache_hits: u64,
}

struct Inner {
    cache: Mutex<LruCache<IpAddr, ReachabilityRecord>>,
    prober: Arc<dyn Prober>,
    ttl: Duration,
    probes: AtomicU64,
    cache_hits: AtomicU64,
}

impl Inner {
    fn cached(&self, addr: IpAddr) -> Option<bool> {
        let mut cache = self.cache.lock();
        match cache.get(&addr) {
            Some(rec) if rec.tested_at.elapsed() < self.ttl => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                Some(rec.reachable)
            }
            Some(_) => {
                cache.pop(&addr);
                None
            }
            None => None,
        }
    }

    fn probe_and_store(&self, addr: IpAddr, timeout: Duration) -> bool {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let reachable = self.prober.probe(addr, timeout);
        self.cache.lock().put(
            addr,
            ReachabilityRecord {
                reachable,
                tested_at: Instant::now(),
            },
        );
        log::debug!("[Reach] {} reachable={}", addr, reachable);
        reachable
    }
}

/// TTL cache of reachability probes.
pub struct ReachabilityCache {
    inner: Arc<Inner>,
    pool: Arc<WorkerPool>,
}

impl ReachabilityCache {
    pub fn new(prober: Arc<dyn Prober>, pool: Arc<WorkerPool>) -> Self {
        Self::with_ttl(prober, pool, REACHABILITY_TTL)
    }

    pub fn with_ttl(prober: Arc<dyn Prober>, pool: Arc<WorkerPool>, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Inner {
                cache: Mutex::new(LruCache::new(capacity)),
                prober,
                ttl,
                probes: AtomicU64::new(0),
                cache_hits: AtomicU64::new(0),
            }),
            pool,
        }
    }

    /// Reachability of `addr`, waiting at most `timeout` for a fresh probe.
    pub fn is_reachable(&self, addr: IpAddr, timeout: Duration) -> bool {
        let candidate = SocketAddr::new(addr, 0);
        self.first_reachable_of(&[candidate], timeout).is_some()
    }

    /// First candidate confirmed reachable within `timeout`, else `None`.
    ///
    /// Cached positives win immediately, in candidate order.
    pub fn first_reachable_of(
        &self,
        candidates: &[SocketAddr],
        timeout: Duration,
    ) -> Option<SocketAddr> {
        let mut pending = Vec::new();
        for cand in candidates {
            match self.inner.cached(cand.ip()) {
                Some(true) => return Some(*cand),
                Some(false) => {}
                None => pending.push(*cand),
            }
        }
        if pending.is_empty() {
            return None;
        }

        let deadline = Instant::now() + timeout;
        let (tx, rx) = channel::unbounded::<(SocketAddr, bool)>();
        let mut launched = 0usize;
        for cand in pending {
            let inner = Arc::clone(&self.inner);
            let tx = tx.clone();
            let job = move || {
                let ok = inner.probe_and_store(cand.ip(), timeout);
                let _ = tx.send((cand, ok));
            };
            match self.pool.execute(job) {
                Ok(()) => launched += 1,
                Err(e) => log::debug!("[Reach] probe for {} not scheduled: {}", cand, e),
            }
        }
        drop(tx);

        for _ in 0..launched {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match rx.recv_timeout(deadline - now) {
                Ok((cand, true)) => return Some(cand),
                Ok((_, false)) => continue,
                Err(_) => break,
            }
        }
        None
    }

    /// Cached record for `addr`, fresh or not.
    pub fn record(&self, addr: IpAddr) -> Option<ReachabilityRecord> {
        self.inner.cache.lock().peek(&addr).copied()
    }

    /// Drop every cached result.
    pub fn clear(&self) {
        self.inner.cache.lock().clear();
    }

    pub fn stats(&self) -> ReachabilityStats {
        ReachabilityStats {
            probes: self.inner.probes.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
        }
    }
}
