//! Core domain types and pure functions
//!
//! Everything in this module is independent of the network, the hash
//! engine, and the async runtime: challenge records, addresses, nonces,
//! preimage serialization, and the difficulty predicate.

pub mod address;
pub mod challenge;
pub mod difficulty;
pub mod nonce;
pub mod preimage;

pub use address::{Address, WalletAddress, WorkerId};
pub use challenge::{Challenge, ChallengeSnapshot, ChallengeState, Difficulty};
pub use difficulty::meets_difficulty;
pub use nonce::{Nonce, NONCE_PARTITION_SIZE};
pub use preimage::serialize_preimage;
