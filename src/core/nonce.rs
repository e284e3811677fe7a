//! Nonce type and nonce-space partitioning

use crate::core::address::WorkerId;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the nonce window assigned to each worker of a cohort.
///
/// Worker `w` iterates `[w * NONCE_PARTITION_SIZE, (w + 1) * NONCE_PARTITION_SIZE)`,
/// so sibling ranges never overlap.
pub const NONCE_PARTITION_SIZE: u64 = 1 << 30;

/// Represents a 64-bit nonce used in mining
///
/// The wire rendering is 16 lowercase hex characters, big-endian.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Nonce(pub u64);

impl Nonce {
    /// Create a new Nonce
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the inner value
    pub const fn value(self) -> u64 {
        self.0
    }

    /// First nonce of the given worker's partition
    pub const fn partition_start(worker: WorkerId) -> Self {
        Self(worker.value() as u64 * NONCE_PARTITION_SIZE)
    }

    /// One past the last nonce of the given worker's partition
    pub const fn partition_end(worker: WorkerId) -> Self {
        Self((worker.value() as u64 + 1) * NONCE_PARTITION_SIZE)
    }

    /// Increment the nonce by 1 and return the result
    pub fn incremented(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Wire rendering: 16 lowercase hex characters, big-endian
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    /// Parse a nonce from its 16-hex-character wire rendering
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 16 {
            return Err(Error::Validation(
                crate::error::ValidationError::InvalidNonce {
                    nonce: s.to_string(),
                    reason: format!("expected 16 hex characters, got {}", s.len()),
                },
            ));
        }
        let value = u64::from_str_radix(s, 16).map_err(|e| {
            Error::Validation(crate::error::ValidationError::InvalidNonce {
                nonce: s.to_string(),
                reason: e.to_string(),
            })
        })?;
        Ok(Self(value))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for Nonce {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Nonce> for u64 {
    fn from(nonce: Nonce) -> Self {
        nonce.0
    }
}
