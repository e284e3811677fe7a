//! Shared orchestrator state
//!
//! One owned value holding every cross-task set and counter. Workers and
//! the submission gate reach it through an `Arc`; every method takes a lock
//! for at most a few instructions and nothing is held across an await.

use crate::core::WorkerId;
use crate::store::ReplayState;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Key for per-address-per-challenge bookkeeping
pub type AddressChallenge = (String, String);

/// Outcome of a submission-lock acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Lock taken; the candidate hash is now in the submitted set
    Acquired,
    /// The hash was already submitted; abandon the candidate
    DuplicateHash,
    /// Another submission for this (address, challenge) is in flight
    Busy,
}

/// Cross-task mining state owned by the coordinator
#[derive(Debug, Default)]
pub struct MinerState {
    cancelled: AtomicBool,
    reset_requested: AtomicBool,

    current_address: Mutex<Option<String>>,
    stopped_workers: Mutex<HashSet<WorkerId>>,
    paused: Mutex<HashSet<AddressChallenge>>,
    submitting: Mutex<HashSet<AddressChallenge>>,
    submitted_hashes: Mutex<HashSet<String>>,
    solved: Mutex<HashMap<String, HashSet<String>>>,
    failures: Mutex<HashMap<AddressChallenge, u32>>,

    accepted_solutions: AtomicU64,
    user_solutions: AtomicU64,
    dev_fee_solutions: AtomicU64,
    total_hashes: AtomicU64,
}

impl MinerState {
    /// Create empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the dedup/solved sets and counters from a log replay
    pub fn load_replay(&self, replay: ReplayState) {
        *self.submitted_hashes.lock() = replay.submitted_hashes;
        *self.solved.lock() = replay.solved;
        self.user_solutions
            .store(replay.user_solutions, Ordering::SeqCst);
        self.dev_fee_solutions
            .store(replay.dev_fee_solutions, Ordering::SeqCst);
        self.accepted_solutions.store(
            replay.user_solutions + replay.dev_fee_solutions,
            Ordering::SeqCst,
        );
    }

    // --- cancellation and reset ---

    /// Flip the process-wide cancellation token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the process-wide cancellation token is set
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Request an in-place reset (hourly timer)
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::SeqCst);
    }

    /// Whether a reset is pending
    pub fn is_reset_requested(&self) -> bool {
        self.reset_requested.load(Ordering::SeqCst)
    }

    /// Consume a pending reset request
    pub fn take_reset_request(&self) -> bool {
        self.reset_requested.swap(false, Ordering::SeqCst)
    }

    // --- current mining address ---

    /// Set the address the active cohort is bound to
    pub fn set_current_address(&self, address: Option<String>) {
        *self.current_address.lock() = address;
    }

    /// Whether the given address is still the active cohort target
    pub fn is_current_address(&self, address: &str) -> bool {
        self.current_address
            .lock()
            .as_deref()
            .map(|current| current == address)
            .unwrap_or(false)
    }

    // --- worker stop / address pause barriers ---

    /// Mark every cohort worker except `keep` as stopped
    pub fn stop_siblings(&self, keep: WorkerId, cohort_size: usize) {
        let mut stopped = self.stopped_workers.lock();
        for id in 0..cohort_size {
            if id != keep.value() {
                stopped.insert(WorkerId::new(id));
            }
        }
    }

    /// Whether the given worker is stopped
    pub fn is_worker_stopped(&self, id: WorkerId) -> bool {
        self.stopped_workers.lock().contains(&id)
    }

    /// Clear the stopped-worker set (siblings resume)
    pub fn clear_stopped_workers(&self) {
        self.stopped_workers.lock().clear();
    }

    /// Pause batch starts for an (address, challenge) pair
    pub fn pause(&self, address: &str, challenge_id: &str) {
        self.paused
            .lock()
            .insert((address.to_string(), challenge_id.to_string()));
    }

    /// Resume batch starts for an (address, challenge) pair
    pub fn resume(&self, address: &str, challenge_id: &str) {
        self.paused
            .lock()
            .remove(&(address.to_string(), challenge_id.to_string()));
    }

    /// Whether the (address, challenge) pair is paused
    pub fn is_paused(&self, address: &str, challenge_id: &str) -> bool {
        self.paused
            .lock()
            .contains(&(address.to_string(), challenge_id.to_string()))
    }

    /// Clear per-cohort barriers before spawning a fresh cohort
    pub fn clear_cohort_barriers(&self, address: &str, challenge_id: &str) {
        self.clear_stopped_workers();
        self.resume(address, challenge_id);
    }

    // --- submission lock and dedup ---

    /// Atomically deduplicate the hash and take the submission lock
    ///
    /// On success the hash is pre-inserted into the submitted set; a failed
    /// submission must roll it back with [`rollback_submitted_hash`].
    ///
    /// [`rollback_submitted_hash`]: MinerState::rollback_submitted_hash
    pub fn try_acquire_submission(
        &self,
        address: &str,
        challenge_id: &str,
        hash: &str,
    ) -> AcquireOutcome {
        let mut submitted = self.submitted_hashes.lock();
        if submitted.contains(hash) {
            return AcquireOutcome::DuplicateHash;
        }
        let mut submitting = self.submitting.lock();
        let key = (address.to_string(), challenge_id.to_string());
        if !submitting.insert(key) {
            return AcquireOutcome::Busy;
        }
        submitted.insert(hash.to_string());
        AcquireOutcome::Acquired
    }

    /// Release the submission lock
    pub fn release_submission(&self, address: &str, challenge_id: &str) {
        self.submitting
            .lock()
            .remove(&(address.to_string(), challenge_id.to_string()));
    }

    /// Record an additional submitted hash (freshness re-hash)
    pub fn record_submitted_hash(&self, hash: &str) {
        self.submitted_hashes.lock().insert(hash.to_string());
    }

    /// Remove a hash from the submitted set after a failed submission,
    /// so a different attempt may rediscover it
    pub fn rollback_submitted_hash(&self, hash: &str) {
        self.submitted_hashes.lock().remove(hash);
    }

    /// Number of submissions currently in flight
    pub fn submissions_in_flight(&self) -> usize {
        self.submitting.lock().len()
    }

    // --- solved set ---

    /// Mark an (address, challenge) pair solved
    pub fn mark_solved(&self, address: &str, challenge_id: &str) {
        self.solved
            .lock()
            .entry(address.to_string())
            .or_default()
            .insert(challenge_id.to_string());
    }

    /// Whether the address already solved the challenge
    pub fn is_solved(&self, address: &str, challenge_id: &str) -> bool {
        self.solved
            .lock()
            .get(address)
            .map(|set| set.contains(challenge_id))
            .unwrap_or(false)
    }

    // --- submission failure counters ---

    /// Increment and return the failure count for the pair
    pub fn record_failure(&self, address: &str, challenge_id: &str) -> u32 {
        let mut failures = self.failures.lock();
        let count = failures
            .entry((address.to_string(), challenge_id.to_string()))
            .or_insert(0);
        *count += 1;
        *count
    }

    /// Current failure count for the pair
    pub fn failure_count(&self, address: &str, challenge_id: &str) -> u32 {
        self.failures
            .lock()
            .get(&(address.to_string(), challenge_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Reset the failure counter after an accepted submission
    pub fn reset_failures(&self, address: &str, challenge_id: &str) {
        self.failures
            .lock()
            .remove(&(address.to_string(), challenge_id.to_string()));
    }

    // --- counters ---

    /// Record an accepted solution
    pub fn record_solution(&self, is_dev_fee: bool) {
        self.accepted_solutions.fetch_add(1, Ordering::SeqCst);
        if is_dev_fee {
            self.dev_fee_solutions.fetch_add(1, Ordering::SeqCst);
        } else {
            self.user_solutions.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Accepted non-dev-fee receipts
    pub fn user_solutions(&self) -> u64 {
        self.user_solutions.load(Ordering::SeqCst)
    }

    /// Accepted dev-fee receipts
    pub fn dev_fee_solutions(&self) -> u64 {
        self.dev_fee_solutions.load(Ordering::SeqCst)
    }

    /// Accepted receipts plus in-flight (pre-ack) submissions
    pub fn solutions_found(&self) -> u64 {
        self.accepted_solutions.load(Ordering::SeqCst) + self.submissions_in_flight() as u64
    }

    /// Add computed hashes to the aggregate counter
    pub fn add_hashes(&self, count: u64) {
        self.total_hashes.fetch_add(count, Ordering::Relaxed);
    }

    /// Aggregate computed hashes since start or last reset
    pub fn total_hashes(&self) -> u64 {
        self.total_hashes.load(Ordering::Relaxed)
    }

    // --- rotation and hourly housekeeping ---

    /// Drop pause/submitting/failure entries that belong to other challenges
    ///
    /// Called on rotation; in-flight work for the prior id is void.
    pub fn prune_for_challenge(&self, challenge_id: &str) {
        self.paused.lock().retain(|(_, cid)| cid == challenge_id);
        self.submitting.lock().retain(|(_, cid)| cid == challenge_id);
        self.failures.lock().retain(|(_, cid), _| cid == challenge_id);
        self.clear_stopped_workers();
    }

    /// Clear transient sets and stats for the hourly in-place reset
    ///
    /// Solved/submitted sets and solution counters persist; they mirror the
    /// durable log.
    pub fn reset_transient(&self) {
        self.clear_stopped_workers();
        self.paused.lock().clear();
        self.submitting.lock().clear();
        self.total_hashes.store(0, Ordering::SeqCst);
    }

    /// Whether all per-pair barrier sets are empty (post-reset invariant)
    pub fn barriers_clear(&self) -> bool {
        self.stopped_workers.lock().is_empty()
            && self.paused.lock().is_empty()
            && self.submitting.lock().is_empty()
    }
}
