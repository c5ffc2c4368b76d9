// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local event bus.
//!
//! Message listeners are invoked asynchronously on the shared worker pool;
//! status listeners are invoked synchronously on the thread that raised the
//! event.

use crate::id::PeerId;
use crate::message::ImcMessage;
use crate::pool::WorkerPool;
use crate::transport::TransportKind;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Context of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    /// Observed sender address, if the message came from the network
    pub publisher: Option<SocketAddr>,
    pub transport: Option<TransportKind>,
    pub received_millis: i64,
}

impl MessageInfo {
    pub fn local() -> Self {
        Self {
            publisher: None,
            transport: None,
            received_millis: crate::message::now_millis(),
        }
    }

    pub fn from_network(publisher: SocketAddr, transport: TransportKind) -> Self {
        Self {
            publisher: Some(publisher),
            transport: Some(transport),
            received_millis: crate::message::now_millis(),
        }
    }
}

pub type MessageHandler = Arc<dyn Fn(&MessageInfo, &ImcMessage) + Send + Sync>;
pub type MessageFilter = Arc<dyn Fn(&ImcMessage) -> bool + Send + Sync>;

/// Handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct Registration {
    id: ListenerId,
    handler: MessageHandler,
    filter: Option<MessageFilter>,
}

/// Fan-out of inbound messages to registered listeners.
pub struct EventBus {
    listeners: RwLock<Vec<Registration>>,
    pool: Arc<WorkerPool>,
}

impl EventBus {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            pool,
        }
    }

    pub fn register(&self, handler: MessageHandler, filter: Option<MessageFilter>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.write().push(Registration {
            id,
            handler,
            filter,
        });
        id
    }

    /// Register under an id obtained elsewhere (same listener on several
    /// buses).
    pub fn register_with_id(
        &self,
        id: ListenerId,
        handler: MessageHandler,
        filter: Option<MessageFilter>,
    ) {
        let mut listeners = self.listeners.write();
        listeners.retain(|r| r.id != id);
        listeners.push(Registration {
            id,
            handler,
            filter,
        });
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Dispatch to every listener whose filter accepts the message.
    /// Returns the number of deliveries queued.
    pub fn post(&self, info: &MessageInfo, msg: &ImcMessage) -> usize {
        let targets: Vec<MessageHandler> = self
            .listeners
            .read()
            .iter()
            .filter(|r| r.filter.as_ref().map_or(true, |f| f(msg)))
            .map(|r| Arc::clone(&r.handler))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let shared = Arc::new((info.clone(), msg.clone()));
        let mut queued = 0;
        for handler in targets {
            let shared = Arc::clone(&shared);
            match self.pool.execute(move || handler(&shared.0, &shared.1)) {
                Ok(()) => queued += 1,
                Err(e) => log::warn!("[Bus] dropping {} delivery: {}", msg.abbrev(), e),
            }
        }
        queued
    }
}

/// Peer and router lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    Added(PeerId),
    Removed(PeerId),
    StatusChanged { id: PeerId, active: bool },
    RouterStarted,
    RouterStopped,
}

impl PeerEvent {
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Self::Added(id) | Self::Removed(id) | Self::StatusChanged { id, .. } => Some(*id),
            Self::RouterStarted | Self::RouterStopped => None,
        }
    }
}

pub type StatusListener = Arc<dyn Fn(&PeerEvent) + Send + Sync>;

/// Status listeners, optionally bound to one peer.
#[derive(Default)]
pub struct StatusBus {
    listeners: RwLock<Vec<(ListenerId, Option<PeerId>, StatusListener)>>,
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// `peer = None` receives every event.
    pub fn register(&self, peer: Option<PeerId>, listener: StatusListener) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.write().push((id, peer, listener));
        id
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _, _)| *lid != id);
        listeners.len() != before
    }

    pub fn emit(&self, event: PeerEvent) {
        let targets: Vec<StatusListener> = self
            .listeners
            .read()
            .iter()
            .filter(|(_, peer, _)| match (peer, event.peer()) {
                (None, _) => true,
                (Some(want), Some(got)) => *want == got,
                (Some(_), None) => false,
            })
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in targets {
            listener(&event);
        }
    }
}
