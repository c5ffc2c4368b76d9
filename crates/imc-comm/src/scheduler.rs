// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named repeating tasks.
//!
//! Each task runs on its own thread at a fixed rate after an initial delay.
//! A task returning `Err` (or panicking) is logged and keeps its schedule.
//! Tasks are cancelled individually by name or all at once; cancellation
//! wakes a sleeping task immediately.

use crate::error::Result;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct TaskHandle {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    fn stop(self) {
        let _ = self.cancel.send(());
        if self.handle.thread().id() != thread::current().id() {
            let _ = self.handle.join();
        }
    }
}

/// Owner of a set of named periodic tasks.
pub struct Scheduler {
    prefix: String,
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

impl Scheduler {
    /// `prefix` is used to name the task threads (`<prefix>-<task>`).
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start `task` every `period` after `initial_delay`. A task already
    /// registered under `name` is cancelled first.
    pub fn schedule<F>(
        &self,
        name: &str,
        initial_delay: Duration,
        period: Duration,
        mut task: F,
    ) -> Result<()>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        self.cancel(name);

        let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
        let task_name = name.to_string();
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.prefix, name))
            .spawn(move || {
                let mut next = Instant::now() + initial_delay;
                loop {
                    let wait = next.saturating_duration_since(Instant::now());
                    match cancel_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    match panic::catch_unwind(AssertUnwindSafe(&mut task)) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => log::warn!("[Sched] task '{}' failed: {}", task_name, e),
                        Err(_) => log::error!("[Sched] task '{}' panicked", task_name),
                    }
                    next += period;
                    let now = Instant::now();
                    if next < now {
                        // overran: skip missed ticks instead of bursting
                        next = now;
                    }
                }
                log::debug!("[Sched] task '{}' stopped", task_name);
            })?;

        self.tasks.lock().insert(
            name.to_string(),
            TaskHandle {
                cancel: cancel_tx,
                handle,
            },
        );
        log::debug!(
            "[Sched] task '{}' scheduled (delay {:?}, period {:?})",
            name,
            initial_delay,
            period
        );
        Ok(())
    }

    /// Schedule only if `period_ms` is non-negative.
    pub fn schedule_ms<F>(&self, name: &str, delay_ms: u64, period_ms: i64, task: F) -> Result<bool>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        if period_ms < 0 {
            log::debug!("[Sched] task '{}' disabled", name);
            return Ok(false);
        }
        self.schedule(
            name,
            Duration::from_millis(delay_ms),
            Duration::from_millis(period_ms.max(1) as u64),
            task,
        )?;
        Ok(true)
    }

    /// Cancel one task. Returns false if no such task.
    pub fn cancel(&self, name: &str) -> bool {
        let handle = self.tasks.lock().remove(name);
        match handle {
            Some(h) => {
                h.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.tasks.lock().contains_key(name)
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancel every task.
    pub fn stop_all(&self) {
        let handles: Vec<TaskHandle> = self.tasks.lock().drain().map(|(_, h)| h).collect();
        for h in handles {
            h.stop();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}
