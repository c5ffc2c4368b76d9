// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Encoding seam between transports and the message model.
//!
//! The IMC binary format is provided by the integrator through
//! [`WireCodec`]. [`JsonCodec`] is a self-describing stand-in for loopback
//! tools and tests; it does not interoperate with other IMC nodes.

use super::ImcMessage;
use crate::error::{CommError, Result};

/// Converts messages to and from datagram/frame bytes.
pub trait WireCodec: Send + Sync {
    fn encode(&self, msg: &ImcMessage) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<ImcMessage>;
}

/// JSON encoding of the full message.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn encode(&self, msg: &ImcMessage) -> Result<Vec<u8>> {
        serde_json::to_vec(msg).map_err(|e| CommError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<ImcMessage> {
        serde_json::from_slice(bytes).map_err(|e| CommError::Codec(e.to_string()))
    }
}
