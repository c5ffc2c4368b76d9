// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-size worker pool for bus delivery and reachability probes.

use crate::error::{CommError, Result};
use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Default bound on queued jobs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// A pool of named threads draining a bounded job queue.
///
/// A panicking job is logged and the worker keeps running. Dropping the pool
/// (or calling [`WorkerPool::shutdown`]) lets queued jobs finish and joins the
/// workers.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        Self::with_capacity(name, threads, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(name: &str, threads: usize, capacity: usize) -> Result<Self> {
        let (tx, rx) = channel::bounded::<Job>(capacity);
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads.max(1) {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    for job in rx.iter() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            log::error!("[Pool] job panicked on {:?}", thread::current().name());
                        }
                    }
                })?;
            workers.push(handle);
        }
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue `job`. Fails if the queue is full or the pool is shut down.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(CommError::ManagerStopped);
        };
        match tx.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CommError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(CommError::ManagerStopped),
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stop accepting jobs, drain the queue and join the workers.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in workers {
            // a job may shut the pool down from inside a worker
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_jobs_run() {
        let pool = WorkerPool::new("test-pool", 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let c = Arc::clone(&counter);
            pool.execute(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let pool = WorkerPool::new("test-pool", 1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.execute(|| panic!("boom")).unwrap();
        let c = Arc::clone(&counter);
        pool.execute(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_execute_after_shutdown_fails() {
        let pool = WorkerPool::new("test-pool", 1).unwrap();
        pool.shutdown();
        assert!(!pool.is_running());
        assert!(matches!(pool.execute(|| {}), Err(CommError::ManagerStopped)));
    }
}
