// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the communication core.

use crate::config::ConfigError;
use crate::id::PeerId;
use thiserror::Error;

/// Communication errors.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No transport available to reach {0}")]
    NoTransportAvailable(PeerId),

    #[error("Manager stopped")]
    ManagerStopped,

    #[error("{0} is with authority off")]
    AuthorityOff(PeerId),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Transport rejected message: {0}")]
    TransportRejected(String),

    #[error("Send queue full")]
    QueueFull,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CommError>;
