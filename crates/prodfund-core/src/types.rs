//! Core type definitions for the production fund

use crate::error::{FundError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unix time in seconds
pub type Timestamp = i64;

/// Value in WAD units (10^18 = one unit)
pub type Amount = u128;

/// Length of a time span in seconds
pub type Seconds = u64;

/// ParticipantId - identity of a fund participant, admin or relayer
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ParticipantId {
    id: [u8; 32],
}

impl ParticipantId {
    /// Create a new ParticipantId from raw bytes
    pub const fn new(id: [u8; 32]) -> Self {
        Self { id }
    }

    /// Derive an identity from a human-readable label using BLAKE3
    pub fn from_label(label: &str) -> Self {
        Self {
            id: *blake3::hash(label.as_bytes()).as_bytes(),
        }
    }

    /// Parse a 64-character hex identity
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| FundError::InvalidIdentity(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Build from an exact 32-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let id: [u8; 32] = bytes.try_into().map_err(|_| {
            FundError::InvalidIdentity(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self { id })
    }

    /// Parse hex if the input looks like a full identity, otherwise hash it as a label
    pub fn resolve(input: &str) -> Self {
        Self::from_hex(input).unwrap_or_else(|_| Self::from_label(input))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.id
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.id)
    }

    /// Zero identity
    pub const ZERO: Self = Self { id: [0u8; 32] };
}

impl FromStr for ParticipantId {
    type Err = FundError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl From<[u8; 32]> for ParticipantId {
    fn from(id: [u8; 32]) -> Self {
        Self::new(id)
    }
}
