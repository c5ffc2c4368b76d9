// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery outcomes, send bookkeeping and result waiters.

use crate::message::ImcMessage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default deadline of [`ResultWaiter::wait`].
pub const RELIABLE_DEADLINE: Duration = Duration::from_millis(20_000);

/// Poll interval of the blocking helpers.
pub const RELIABLE_POLL: Duration = Duration::from_millis(100);

/// Terminal outcome of one transport attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Success,
    Timeout,
    Unreachable,
    Error(String),
    /// Handed to the medium with no way to confirm (multicast, broadcast)
    Uncertain(String),
}

impl DeliveryResult {
    /// Counts as "sent" for the frequency counters.
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Success | Self::Uncertain(_))
    }
}

impl fmt::Display for DeliveryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::Error(e) => write!(f, "error: {}", e),
            Self::Uncertain(e) => write!(f, "uncertain delivery: {}", e),
        }
    }
}

/// Called once per transport attempt with its terminal outcome.
pub type DeliveryCallback = Arc<dyn Fn(&ImcMessage, &DeliveryResult) + Send + Sync>;

/// Messages per second over a sliding window.
#[derive(Debug)]
pub struct FrequencyCalculator {
    window: Duration,
    marks: Mutex<VecDeque<Instant>>,
    total: AtomicU64,
}

impl Default for FrequencyCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl FrequencyCalculator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            marks: Mutex::new(VecDeque::new()),
            total: AtomicU64::new(0),
        }
    }

    pub fn mark(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut marks = self.marks.lock();
        marks.push_back(now);
        Self::expire(&mut marks, now, self.window);
    }

    pub fn frequency(&self) -> f64 {
        let mut marks = self.marks.lock();
        Self::expire(&mut marks, Instant::now(), self.window);
        marks.len() as f64 / self.window.as_secs_f64()
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn expire(marks: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while marks.front().is_some_and(|t| now.duration_since(*t) > window) {
            marks.pop_front();
        }
    }
}

/// Sent / to-send pair.
#[derive(Debug, Default)]
pub struct SendCounters {
    pub to_send: FrequencyCalculator,
    pub sent: FrequencyCalculator,
}

/// Wraps the caller's callback for one logical send: marks the counters on
/// every attempt and logs the message on the first terminal outcome only.
pub struct DeliveryTracker {
    user: Option<DeliveryCallback>,
    counters: Vec<Arc<SendCounters>>,
    logged: AtomicBool,
}

impl DeliveryTracker {
    pub fn new(user: Option<DeliveryCallback>, counters: Vec<Arc<SendCounters>>) -> Arc<Self> {
        Arc::new(Self {
            user,
            counters,
            logged: AtomicBool::new(false),
        })
    }

    /// Record that a transport attempt is about to be issued.
    pub fn mark_attempt(&self) {
        for c in &self.counters {
            c.to_send.mark();
        }
    }

    /// Terminal outcome of one attempt.
    pub fn complete(&self, msg: &ImcMessage, result: &DeliveryResult) {
        if result.is_sent() {
            for c in &self.counters {
                c.sent.mark();
            }
        }
        if !self.logged.swap(true, Ordering::AcqRel) {
            log::debug!(
                "[Router] {} to {}: {}",
                msg.abbrev(),
                msg.dst(),
                result
            );
        }
        if let Some(user) = &self.user {
            user(msg, result);
        }
    }

    /// Callback handed to transports.
    pub fn callback(self: &Arc<Self>) -> DeliveryCallback {
        let tracker = Arc::clone(self);
        Arc::new(move |msg, result| tracker.complete(msg, result))
    }

    pub fn was_logged(&self) -> bool {
        self.logged.load(Ordering::Acquire)
    }
}

/// Shared slot filled by the first terminal outcome.
#[derive(Clone)]
pub struct ResultWaiter {
    slot: Arc<Mutex<Option<DeliveryResult>>>,
    deadline: Instant,
}

impl ResultWaiter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            deadline: Instant::now() + timeout,
        }
    }

    /// Callback filling the slot; later outcomes are ignored.
    pub fn listener(&self) -> DeliveryCallback {
        let slot = Arc::clone(&self.slot);
        Arc::new(move |_, result| {
            let mut slot = slot.lock();
            if slot.is_none() {
                *slot = Some(result.clone());
            }
        })
    }

    /// Fill the slot directly (send refused before any attempt).
    pub fn resolve(&self, result: DeliveryResult) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(result);
        }
    }

    pub fn try_result(&self) -> Option<DeliveryResult> {
        self.slot.lock().clone()
    }

    pub fn is_done(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Poll until an outcome arrives or the deadline passes (`Timeout`).
    pub fn wait(&self) -> DeliveryResult {
        loop {
            if let Some(result) = self.try_result() {
                return result;
            }
            let now = Instant::now();
            if now >= self.deadline {
                return DeliveryResult::Timeout;
            }
            thread::sleep(RELIABLE_POLL.min(self.deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_frequency_window() {
        let freq = FrequencyCalculator::new(Duration::from_millis(50));
        for _ in 0..5 {
            freq.mark();
        }
        assert!(freq.frequency() > 0.0);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(freq.frequency(), 0.0);
        assert_eq!(freq.total(), 5);
    }

    #[test]
    fn test_tracker_marks_and_forwards() {
        let counters = Arc::new(SendCounters::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let tracker = DeliveryTracker::new(
            Some(Arc::new(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            })),
            vec![Arc::clone(&counters)],
        );
        let msg = ImcMessage::new(Payload::Heartbeat);
        let cb = tracker.callback();

        tracker.mark_attempt();
        tracker.mark_attempt();
        cb(&msg, &DeliveryResult::Uncertain("no ack".into()));
        cb(&msg, &DeliveryResult::Error("down".into()));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(counters.to_send.total(), 2);
        assert_eq!(counters.sent.total(), 1);
        assert!(tracker.was_logged());
    }

    #[test]
    fn test_waiter_keeps_first_result() {
        let waiter = ResultWaiter::new(Duration::from_secs(1));
        let cb = waiter.listener();
        let msg = ImcMessage::new(Payload::Heartbeat);
        cb(&msg, &DeliveryResult::Unreachable);
        cb(&msg, &DeliveryResult::Success);
        assert_eq!(waiter.wait(), DeliveryResult::Unreachable);
    }

    #[test]
    fn test_waiter_times_out() {
        let waiter = ResultWaiter::new(Duration::from_millis(30));
        let start = Instant::now();
        assert_eq!(waiter.wait(), DeliveryResult::Timeout);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_waiter_resolved_from_other_thread() {
        let waiter = ResultWaiter::new(Duration::from_secs(2));
        let cb = waiter.listener();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cb(&ImcMessage::new(Payload::Heartbeat), &DeliveryResult::Success);
        });
        assert_eq!(waiter.wait(), DeliveryResult::Success);
        handle.join().unwrap();
    }
}
