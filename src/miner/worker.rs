//! Hashing worker
//!
//! A worker is a cooperative task bound to one (address, snapshot, id)
//! triple for its whole lifetime. It walks its private nonce partition in
//! batches, hands each batch to the hash engine, scans the results with
//! the dual difficulty predicate, and routes any candidate through the
//! submission gate. All barrier flags are re-checked after every
//! suspension point.

use crate::core::{
    meets_difficulty, serialize_preimage, Address, ChallengeSnapshot, ChallengeState, Nonce,
    WorkerId,
};
use crate::engine::HashEngine;
use crate::events::{EventBus, MinerEvent};
use crate::miner::state::MinerState;
use crate::miner::submission::{SolutionCandidate, SubmissionGate, SubmissionVerdict};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Delay before retrying a timed-out hash batch over the same nonce range
const RETRIABLE_BACKOFF: Duration = Duration::from_secs(2);

/// Delay before skipping past a non-retriable batch failure
const NON_RETRIABLE_BACKOFF: Duration = Duration::from_secs(1);

/// Polling interval while stopped or paused by the submission gate
const BARRIER_WAIT: Duration = Duration::from_millis(50);

/// Minimum interval between progress emissions per worker
const PROGRESS_THROTTLE: Duration = Duration::from_secs(1);

/// Worker lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Not yet mining
    Idle,
    /// Hashing batches
    Mining,
    /// Inside the submission gate
    Submitting,
    /// Finished (any outcome)
    Completed,
}

impl WorkerStatus {
    /// Status name for events
    pub fn name(self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Mining => "mining",
            WorkerStatus::Submitting => "submitting",
            WorkerStatus::Completed => "completed",
        }
    }
}

/// Mutable per-worker statistics
#[derive(Debug, Clone)]
pub struct WorkerState {
    /// Worker identity within the cohort
    pub id: WorkerId,
    /// Address the worker is bound to
    pub target_address: String,
    /// Hashes computed so far
    pub hashes_computed: u64,
    /// Smoothed hash rate in hashes per second
    pub hash_rate: f64,
    /// Accepted solutions found by this worker
    pub solutions_found: u32,
    /// Lifecycle status
    pub status: WorkerStatus,
    /// Challenge the worker is bound to
    pub current_challenge: Option<String>,
    /// Spawn time
    pub started_at: Instant,
}

impl WorkerState {
    fn new(id: WorkerId, address: &str, challenge_id: &str) -> Self {
        Self {
            id,
            target_address: address.to_string(),
            hashes_computed: 0,
            hash_rate: 0.0,
            solutions_found: 0,
            status: WorkerStatus::Idle,
            current_challenge: Some(challenge_id.to_string()),
            started_at: Instant::now(),
        }
    }

    fn update_rate(&mut self) {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.hash_rate = self.hashes_computed as f64 / elapsed;
        }
    }
}

/// Why a worker exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The address is solved for this challenge (by this worker or a sibling)
    Solved,
    /// The per-pair submission failure cap was reached
    CapReached,
    /// The challenge rotated away
    Rotated,
    /// Cancelled: stop, reset, or address hand-off
    Cancelled,
    /// The worker's nonce partition is exhausted
    Exhausted,
}

/// Everything a worker needs, fixed at spawn
pub struct WorkerContext {
    /// Worker identity, determines the nonce partition
    pub id: WorkerId,
    /// Address the cohort is mining
    pub address: Address,
    /// Frozen challenge snapshot
    pub snapshot: ChallengeSnapshot,
    /// Whether the cohort settles dev-fee debt
    pub is_dev_fee: bool,
    /// Preimages per hash-engine batch
    pub batch_size: usize,
    /// Submission failure cap per (address, challenge)
    pub max_failures: u32,
    /// Batch hashing service
    pub engine: Arc<dyn HashEngine>,
    /// Shared orchestrator state
    pub state: Arc<MinerState>,
    /// Submission gate
    pub gate: Arc<SubmissionGate>,
    /// Live challenge slot
    pub live: watch::Receiver<ChallengeState>,
    /// Event bus
    pub events: EventBus,
}

enum Barrier {
    Clear,
    Wait,
    Exit(WorkerOutcome),
}

impl WorkerContext {
    fn check_barriers(&self) -> Barrier {
        let address = self.address.identifier.as_str();
        let challenge_id = self.snapshot.challenge_id.as_str();

        if self.state.is_cancelled() || self.state.is_reset_requested() {
            return Barrier::Exit(WorkerOutcome::Cancelled);
        }
        if !self.state.is_current_address(address) {
            return Barrier::Exit(WorkerOutcome::Cancelled);
        }
        if self.state.is_solved(address, challenge_id) {
            return Barrier::Exit(WorkerOutcome::Solved);
        }
        if self.state.failure_count(address, challenge_id) >= self.max_failures {
            return Barrier::Exit(WorkerOutcome::CapReached);
        }
        if self.live.borrow().challenge_id() != Some(challenge_id) {
            return Barrier::Exit(WorkerOutcome::Rotated);
        }
        // A submission window stops hashing without ending the worker: the
        // gate clears these again if the submission fails.
        if self.state.is_worker_stopped(self.id) || self.state.is_paused(address, challenge_id) {
            return Barrier::Wait;
        }
        Barrier::Clear
    }
}

/// Run one worker to completion
pub async fn run_worker(ctx: WorkerContext) -> WorkerOutcome {
    let address = ctx.address.identifier.clone();
    let challenge_id = ctx.snapshot.challenge_id.clone();
    let mut ws = WorkerState::new(ctx.id, &address, &challenge_id);
    ws.status = WorkerStatus::Mining;

    let mut cursor = Nonce::partition_start(ctx.id);
    let partition_end = Nonce::partition_end(ctx.id);
    let mut last_progress = Instant::now();

    debug!(
        "{} mining {} on {} from nonce {}",
        ctx.id, address, challenge_id, cursor
    );

    let outcome = loop {
        match ctx.check_barriers() {
            Barrier::Exit(outcome) => break outcome,
            Barrier::Wait => {
                tokio::time::sleep(BARRIER_WAIT).await;
                continue;
            }
            Barrier::Clear => {}
        }

        if cursor.value() >= partition_end.value() {
            break WorkerOutcome::Exhausted;
        }

        // Build the batch from the cursor.
        let batch_len = (ctx.batch_size as u64).min(partition_end.value() - cursor.value());
        let mut nonces = Vec::with_capacity(batch_len as usize);
        let mut preimages = Vec::with_capacity(batch_len as usize);
        let mut nonce = cursor;
        for _ in 0..batch_len {
            nonces.push(nonce);
            preimages.push(serialize_preimage(nonce, &address, &ctx.snapshot));
            nonce = nonce.incremented();
        }
        let batch_end = nonce;

        let hashes = match ctx.engine.hash_batch(&preimages).await {
            Ok(hashes) => hashes,
            Err(e) if e.should_retry() => {
                warn!("{} hash batch timed out, retrying range: {}", ctx.id, e);
                tokio::time::sleep(RETRIABLE_BACKOFF).await;
                continue;
            }
            Err(e) => {
                debug!("{} hash batch failed, skipping range: {}", ctx.id, e);
                tokio::time::sleep(NON_RETRIABLE_BACKOFF).await;
                cursor = batch_end;
                continue;
            }
        };

        // Rotation guard: the batch is void if the challenge moved while
        // the engine was hashing.
        if ctx.live.borrow().challenge_id() != Some(challenge_id.as_str()) {
            break WorkerOutcome::Rotated;
        }

        ws.hashes_computed += hashes.len() as u64;
        ctx.state.add_hashes(hashes.len() as u64);
        ws.update_rate();

        // Scan for solutions.
        let mut solved = false;
        for (index, hash) in hashes.iter().enumerate() {
            if ctx.state.is_solved(&address, &challenge_id) {
                solved = true;
                break;
            }
            let qualifies = hex::decode(hash)
                .map(|bytes| meets_difficulty(&bytes, ctx.snapshot.difficulty))
                .unwrap_or(false);
            if !qualifies {
                continue;
            }

            ws.status = WorkerStatus::Submitting;
            emit_progress(&ctx, &ws);

            let candidate = SolutionCandidate {
                worker_id: ctx.id,
                address: ctx.address.clone(),
                snapshot: ctx.snapshot.clone(),
                nonce: nonces[index],
                preimage: preimages[index].clone(),
                hash: hash.clone(),
                is_dev_fee: ctx.is_dev_fee,
            };

            match ctx.gate.submit_candidate(&candidate).await {
                SubmissionVerdict::Accepted => {
                    ws.solutions_found += 1;
                    solved = true;
                    break;
                }
                SubmissionVerdict::AlreadySolved => {
                    solved = true;
                    break;
                }
                SubmissionVerdict::Failed { failures } => {
                    if failures >= ctx.max_failures {
                        ws.status = WorkerStatus::Completed;
                        emit_progress(&ctx, &ws);
                        return WorkerOutcome::CapReached;
                    }
                    ws.status = WorkerStatus::Mining;
                }
                SubmissionVerdict::Rotated => {
                    ws.status = WorkerStatus::Completed;
                    emit_progress(&ctx, &ws);
                    return WorkerOutcome::Rotated;
                }
                // Duplicate, Busy and Stale all mean: keep mining.
                _ => {
                    ws.status = WorkerStatus::Mining;
                }
            }
        }
        if solved {
            break WorkerOutcome::Solved;
        }

        cursor = batch_end;

        if last_progress.elapsed() >= PROGRESS_THROTTLE {
            emit_progress(&ctx, &ws);
            last_progress = Instant::now();
        }
    };

    ws.status = WorkerStatus::Completed;
    emit_progress(&ctx, &ws);
    debug!("{} exiting: {:?}", ctx.id, outcome);
    outcome
}

fn emit_progress(ctx: &WorkerContext, ws: &WorkerState) {
    ctx.events.emit(MinerEvent::WorkerUpdate {
        worker_id: ws.id.value(),
        address: ws.target_address.clone(),
        hashes: ws.hashes_computed,
        hash_rate: ws.hash_rate,
        status: ws.status.name().to_string(),
    });
    ctx.events.emit(MinerEvent::HashProgress {
        worker_id: ws.id.value(),
        hashes: ws.hashes_computed,
        hash_rate: ws.hash_rate,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_status_names() {
        assert_eq!(WorkerStatus::Idle.name(), "idle");
        assert_eq!(WorkerStatus::Mining.name(), "mining");
        assert_eq!(WorkerStatus::Submitting.name(), "submitting");
        assert_eq!(WorkerStatus::Completed.name(), "completed");
    }

    #[test]
    fn test_worker_state_rate() {
        let mut ws = WorkerState::new(WorkerId::new(0), "addr1", "ch-1");
        ws.hashes_computed = 1000;
        std::thread::sleep(Duration::from_millis(5));
        ws.update_rate();
        // Rate is positive once hashes accumulate.
        assert!(ws.hash_rate > 0.0);
        assert_eq!(ws.current_challenge.as_deref(), Some("ch-1"));
    }
}
