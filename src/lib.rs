//! # Challenge Mining Client
//!
//! A proof-of-work mining client for a challenge/response network. Derived
//! wallet addresses compete in parallel worker cohorts to find a nonce
//! whose preimage hash satisfies the network-published difficulty target;
//! qualifying solutions are submitted with freshness revalidation.
//!
//! ## Architecture
//!
//! The core is a single long-lived orchestrator: a poller keeps a live
//! challenge slot current, the coordinator runs sequential per-address
//! worker cohorts against frozen challenge snapshots, and a submission
//! gate serializes solution submission per (address, challenge) pair.
//! The hash engine, the upstream HTTP API, the dev-fee address source and
//! the durable receipt log all sit behind traits, so the orchestrator is
//! testable without any of the real collaborators.

#![warn(
    missing_docs,
    rust_2018_idioms,
    unused_lifetimes,
    unused_qualifications,
    clippy::all
)]
#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod events;
pub mod miner;
pub mod protocol;
pub mod store;
pub mod utils;

pub use crate::error::{Error, Result};
pub use config::Config;
pub use core::{Address, Challenge, ChallengeSnapshot, ChallengeState, Difficulty, Nonce};
pub use miner::MiningCoordinator;
pub use protocol::client::ApiClient;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        config::Config,
        core::{Address, Challenge, ChallengeSnapshot, ChallengeState, Difficulty, Nonce, WorkerId},
        engine::HashEngine,
        error::{Error, Result},
        events::{EventBus, MinerEvent},
        miner::{ChallengePoller, MinerPhase, MiningCoordinator},
        protocol::{ApiClient, ChallengeApi},
        store::{ReceiptStore, ReplayState},
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
