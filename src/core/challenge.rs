//! Challenge records, observed challenge state, and frozen snapshots

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Network-published difficulty: exactly 8 hex characters (32 bits)
///
/// The value doubles as the bit mask of the second predicate check, see
/// [`crate::core::difficulty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Difficulty(u32);

impl Difficulty {
    /// Parse a difficulty from its 8-hex-character wire form
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 8 {
            return Err(Error::validation_invalid_difficulty(
                s,
                format!("expected 8 hex characters, got {}", s.len()),
            ));
        }
        let value = u32::from_str_radix(s, 16)
            .map_err(|e| Error::validation_invalid_difficulty(s, e.to_string()))?;
        Ok(Self(value))
    }

    /// The 32-bit big-endian unsigned value
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Number of leading zero bits required of a qualifying hash
    pub const fn leading_zero_bits(self) -> u32 {
        self.0.leading_zeros()
    }

    /// Wire rendering: 8 lowercase hex characters
    pub fn as_hex(self) -> String {
        format!("{:08x}", self.0)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl Serialize for Difficulty {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Difficulty::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// The active challenge as published by the network
///
/// Immutable per rotation except for the dynamic fields `latest_submission`,
/// `no_pre_mine_hour` and (rarely) `difficulty`, which the network mutates
/// within a rotation. Identity is `challenge_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Opaque rotation identifier
    pub challenge_id: String,
    /// Current difficulty target
    pub difficulty: Difficulty,
    /// Challenge-specific ROM seed
    pub no_pre_mine: String,
    /// Freshness hour counter, mutates within a rotation
    pub no_pre_mine_hour: u32,
    /// Hash of the most recent accepted submission, mutates within a rotation
    pub latest_submission: String,
}

/// Observed status of the mining window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeState {
    /// Mining window not yet open
    Before {
        /// Optional opening time advertised by the network
        starts_at: Option<String>,
    },
    /// Mining window open with the embedded challenge
    Active(Challenge),
    /// Mining window closed
    After,
}

impl ChallengeState {
    /// The embedded challenge, if the window is open
    pub fn active(&self) -> Option<&Challenge> {
        match self {
            ChallengeState::Active(c) => Some(c),
            _ => None,
        }
    }

    /// The active challenge id, if any
    pub fn challenge_id(&self) -> Option<&str> {
        self.active().map(|c| c.challenge_id.as_str())
    }
}

/// A frozen copy of every preimage input, captured at cohort start
///
/// Snapshots are logically immutable for the lifetime of a worker cohort;
/// the poller's live slot is a separate value and never aliases a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSnapshot {
    /// Rotation identifier at capture time
    pub challenge_id: String,
    /// Difficulty at capture time
    pub difficulty: Difficulty,
    /// ROM seed at capture time
    pub no_pre_mine: String,
    /// Hour counter at capture time
    pub no_pre_mine_hour: u32,
    /// Latest-submission hash at capture time
    pub latest_submission: String,
}

impl ChallengeSnapshot {
    /// Capture a snapshot of the given challenge
    pub fn capture(challenge: &Challenge) -> Self {
        Self {
            challenge_id: challenge.challenge_id.clone(),
            difficulty: challenge.difficulty,
            no_pre_mine: challenge.no_pre_mine.clone(),
            no_pre_mine_hour: challenge.no_pre_mine_hour,
            latest_submission: challenge.latest_submission.clone(),
        }
    }

    /// Whether any dynamic preimage input differs from the live challenge
    ///
    /// Rotation (a different `challenge_id`) is a separate, stronger
    /// condition and is checked before this one.
    pub fn drifted_from(&self, live: &Challenge) -> bool {
        self.latest_submission != live.latest_submission
            || self.no_pre_mine_hour != live.no_pre_mine_hour
            || self.no_pre_mine != live.no_pre_mine
    }

    /// Re-capture with the live dynamic fields, keeping the same identity
    pub fn refreshed(&self, live: &Challenge) -> Self {
        Self::capture(live)
    }
}

impl From<&Challenge> for ChallengeSnapshot {
    fn from(challenge: &Challenge) -> Self {
        Self::capture(challenge)
    }
}
