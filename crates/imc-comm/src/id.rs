// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! 16-bit peer identifiers.
//!
//! Textual forms accepted by [`PeerId::parse`]:
//!
//! ```text
//! 4d:15      (two hex bytes separated by ':')
//! 0x4d15     (0x prefix, up to 4 hex digits)
//! 19733      (plain decimal)
//! ```

use crate::error::{CommError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Address of a peer on the IMC network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u16);

impl PeerId {
    /// Null id (unset destination, unknown source).
    pub const NULL: PeerId = PeerId(0xFFFF);
    /// Broadcast destination.
    pub const BROADCAST: PeerId = PeerId(0xFFF0);
    /// Announce pseudo-destination.
    pub const ANNOUNCE: PeerId = PeerId(0x0000);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u16 {
        self.0
    }

    /// Reserved ids can never identify the sender of a message.
    pub fn is_valid_source(self) -> bool {
        self != Self::NULL && self != Self::BROADCAST && self != Self::ANNOUNCE
    }

    /// Parse "HH:HH", "0xHHHH" or decimal text.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = || CommError::InvalidPeerId(text.to_string());

        if let Some((hi, lo)) = text.split_once(':') {
            if hi.is_empty() || lo.is_empty() || hi.len() > 2 || lo.len() > 2 {
                return Err(invalid());
            }
            let hi = u8::from_str_radix(hi, 16).map_err(|_| invalid())?;
            let lo = u8::from_str_radix(lo, 16).map_err(|_| invalid())?;
            return Ok(Self(u16::from_be_bytes([hi, lo])));
        }

        if let Some(hex) = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
        {
            if hex.is_empty() || hex.len() > 4 {
                return Err(invalid());
            }
            return u16::from_str_radix(hex, 16).map(Self).map_err(|_| invalid());
        }

        text.parse::<u16>().map(Self).map_err(|_| invalid())
    }

    /// "0x4d15" form, used in logs.
    pub fn to_pretty_string(self) -> String {
        format!("0x{:04x}", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [hi, lo] = self.0.to_be_bytes();
        write!(f, "{:02x}:{:02x}", hi, lo)
    }
}

impl FromStr for PeerId {
    type Err = CommError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<u16> for PeerId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<PeerId> for u16 {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_pretty_string())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u16),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Num(n) => Ok(Self(n)),
            Repr::Text(s) => Self::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}
