//! The mining orchestrator core
//!
//! Component layout mirrors the data flow: the poller feeds a live
//! challenge slot, the coordinator sequences per-address worker cohorts
//! against frozen snapshots, workers route candidates through the
//! submission gate, and accepted solutions land in the durable store.

pub mod coordinator;
pub mod devfee;
pub mod poller;
pub mod state;
pub mod submission;
pub mod worker;

pub use coordinator::{MinerPhase, MiningCoordinator};
pub use devfee::{DevFeePool, DevFeeSource, StaticDevFeeSource};
pub use poller::ChallengePoller;
pub use state::MinerState;
pub use submission::{SolutionCandidate, SubmissionGate, SubmissionVerdict};
pub use worker::{WorkerOutcome, WorkerState, WorkerStatus};
