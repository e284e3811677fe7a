//! Submission gate
//!
//! Serializes solution submission per (address, challenge) pair and
//! revalidates freshness against the live challenge immediately before the
//! network call. The network validator recomputes the preimage from the
//! nonce using its current challenge view; if `latest_submission` drifted,
//! the server's hash differs from the miner's and the submission would be
//! rejected. Re-hashing against the live snapshot predicts acceptance.

use crate::core::{
    meets_difficulty, serialize_preimage, Address, ChallengeSnapshot, Nonce, WorkerId,
};
use crate::engine::HashEngine;
use crate::events::{EventBus, MinerEvent};
use crate::miner::state::{AcquireOutcome, MinerState};
use crate::protocol::ChallengeApi;
use crate::store::{ErrorRecord, Receipt, ReceiptStore};
use crate::utils::current_timestamp;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::ChallengeState;
use crate::error::Error;

/// A candidate solution found by a worker
#[derive(Debug, Clone)]
pub struct SolutionCandidate {
    /// Worker that found the candidate
    pub worker_id: WorkerId,
    /// Address the cohort is mining
    pub address: Address,
    /// The frozen snapshot the preimage was serialized against
    pub snapshot: ChallengeSnapshot,
    /// The candidate nonce
    pub nonce: Nonce,
    /// The serialized preimage
    pub preimage: Vec<u8>,
    /// Lowercase hex hash of the preimage
    pub hash: String,
    /// Whether the cohort settles dev-fee debt
    pub is_dev_fee: bool,
}

/// Outcome of a gated submission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionVerdict {
    /// The network accepted the solution; the address is done for this
    /// challenge
    Accepted,
    /// Rejected or failed; siblings resume, `failures` is the updated
    /// per-pair counter
    Failed {
        /// Updated failure count for the (address, challenge) pair
        failures: u32,
    },
    /// The hash was already submitted; candidate abandoned
    Duplicate,
    /// The address already solved this challenge; candidate abandoned
    AlreadySolved,
    /// Another submission holds the lock for this pair
    Busy,
    /// Freshness revalidation disqualified the candidate; silent discard
    Stale,
    /// The challenge rotated away mid-submission
    Rotated,
}

/// Mutual-exclusion barrier around solution submission
pub struct SubmissionGate {
    api: Arc<dyn ChallengeApi>,
    engine: Arc<dyn HashEngine>,
    store: Arc<dyn ReceiptStore>,
    state: Arc<MinerState>,
    events: EventBus,
    live: watch::Receiver<ChallengeState>,
    cohort_size: usize,
}

impl SubmissionGate {
    /// Create a gate over the shared collaborators
    pub fn new(
        api: Arc<dyn ChallengeApi>,
        engine: Arc<dyn HashEngine>,
        store: Arc<dyn ReceiptStore>,
        state: Arc<MinerState>,
        events: EventBus,
        live: watch::Receiver<ChallengeState>,
        cohort_size: usize,
    ) -> Self {
        Self {
            api,
            engine,
            store,
            state,
            events,
            live,
            cohort_size,
        }
    }

    /// Run the full gated submission sequence for a candidate
    pub async fn submit_candidate(&self, candidate: &SolutionCandidate) -> SubmissionVerdict {
        let address = candidate.address.identifier.as_str();
        let challenge_id = candidate.snapshot.challenge_id.as_str();

        // Dedup and lock acquisition are one atomic step; the candidate
        // hash is pre-inserted and rolled back on any non-accepted outcome.
        match self
            .state
            .try_acquire_submission(address, challenge_id, &candidate.hash)
        {
            AcquireOutcome::DuplicateHash => {
                debug!("Candidate hash already submitted, abandoning");
                return SubmissionVerdict::Duplicate;
            }
            AcquireOutcome::Busy => {
                debug!("Submission already in flight for {}/{}", address, challenge_id);
                return SubmissionVerdict::Busy;
            }
            AcquireOutcome::Acquired => {}
        }

        // The previous lock holder may have just solved the address; the
        // check is race-free because mark_solved happens under the lock.
        if self.state.is_solved(address, challenge_id) {
            self.state.rollback_submitted_hash(&candidate.hash);
            self.state.release_submission(address, challenge_id);
            return SubmissionVerdict::AlreadySolved;
        }

        let verdict = self.submit_locked(candidate).await;
        self.state.release_submission(address, challenge_id);
        verdict
    }

    async fn submit_locked(&self, candidate: &SolutionCandidate) -> SubmissionVerdict {
        let address = candidate.address.identifier.as_str();
        let challenge_id = candidate.snapshot.challenge_id.as_str();

        // Free CPU while the network round-trip is in flight.
        self.state.stop_siblings(candidate.worker_id, self.cohort_size);
        self.state.pause(address, challenge_id);

        // Pre-submit freshness check against the live slot.
        let live = self.live.borrow().clone();
        let live_challenge = match live.active() {
            Some(c) if c.challenge_id == challenge_id => c.clone(),
            _ => {
                debug!("Challenge rotated away before submission, discarding candidate");
                self.state.rollback_submitted_hash(&candidate.hash);
                self.state.resume(address, challenge_id);
                self.state.clear_stopped_workers();
                return SubmissionVerdict::Rotated;
            }
        };

        let submit_hash = if candidate.snapshot.drifted_from(&live_challenge) {
            let fresh_snapshot = candidate.snapshot.refreshed(&live_challenge);
            let fresh_preimage =
                serialize_preimage(candidate.nonce, address, &fresh_snapshot);
            match self.rehash_single(&fresh_preimage).await {
                Some(fresh_hash) => {
                    let qualifies = hex::decode(&fresh_hash)
                        .map(|bytes| meets_difficulty(&bytes, live_challenge.difficulty))
                        .unwrap_or(false);
                    if !qualifies {
                        debug!(
                            "Re-hashed candidate no longer meets live difficulty, discarding"
                        );
                        self.state.rollback_submitted_hash(&candidate.hash);
                        self.state.resume(address, challenge_id);
                        self.state.clear_stopped_workers();
                        return SubmissionVerdict::Stale;
                    }
                    self.state.record_submitted_hash(&fresh_hash);
                    fresh_hash
                }
                None => {
                    // Cannot predict acceptance; discard rather than burn a
                    // submission attempt on a likely-stale candidate.
                    warn!("Freshness re-hash failed, discarding candidate");
                    self.state.rollback_submitted_hash(&candidate.hash);
                    self.state.resume(address, challenge_id);
                    self.state.clear_stopped_workers();
                    return SubmissionVerdict::Stale;
                }
            }
        } else {
            // Snapshot still fresh, but the difficulty itself may have
            // changed while mining.
            let qualifies = hex::decode(&candidate.hash)
                .map(|bytes| meets_difficulty(&bytes, live_challenge.difficulty))
                .unwrap_or(false);
            if !qualifies {
                debug!("Candidate no longer meets live difficulty, discarding");
                self.state.rollback_submitted_hash(&candidate.hash);
                self.state.resume(address, challenge_id);
                self.state.clear_stopped_workers();
                return SubmissionVerdict::Stale;
            }
            candidate.hash.clone()
        };

        self.events.emit(MinerEvent::SolutionSubmit {
            address: address.to_string(),
            challenge_id: challenge_id.to_string(),
            nonce: candidate.nonce.to_hex(),
            hash: submit_hash.clone(),
        });

        match self
            .api
            .submit_solution(address, challenge_id, candidate.nonce)
            .await
        {
            Ok(receipt) => {
                self.on_accept(candidate, &submit_hash, receipt.crypto_receipt);
                SubmissionVerdict::Accepted
            }
            Err(e) => {
                let failures = self.on_failure(candidate, &submit_hash, &e);
                SubmissionVerdict::Failed { failures }
            }
        }
    }

    async fn rehash_single(&self, preimage: &[u8]) -> Option<String> {
        let batch = [preimage.to_vec()];
        match self.engine.hash_batch(&batch).await {
            Ok(hashes) => hashes.into_iter().next(),
            Err(e) => {
                warn!("Single-preimage re-hash failed: {}", e);
                None
            }
        }
    }

    fn on_accept(
        &self,
        candidate: &SolutionCandidate,
        submit_hash: &str,
        crypto_receipt: Option<serde_json::Value>,
    ) {
        let address = candidate.address.identifier.as_str();
        let challenge_id = candidate.snapshot.challenge_id.as_str();

        info!(
            "Solution accepted: {}/{} nonce {}",
            address, challenge_id, candidate.nonce
        );

        // Solved-set update and receipt write happen before the lock is
        // released, so subsequent worker reads observe both together.
        self.state.mark_solved(address, challenge_id);
        self.state.record_solution(candidate.is_dev_fee);
        self.state.reset_failures(address, challenge_id);
        // Siblings stay stopped: the address is done for this challenge.
        self.state.resume(address, challenge_id);

        let receipt = Receipt {
            timestamp: current_timestamp(),
            address: address.to_string(),
            address_index: candidate.address.index,
            challenge_id: challenge_id.to_string(),
            nonce: candidate.nonce.to_hex(),
            hash: submit_hash.to_string(),
            is_dev_fee: candidate.is_dev_fee,
            crypto_receipt,
        };
        if let Err(e) = self.store.append_receipt(&receipt) {
            warn!("Failed to append receipt: {}", e);
        }

        self.events.emit(MinerEvent::Solution {
            address: address.to_string(),
            challenge_id: challenge_id.to_string(),
            nonce: receipt.nonce.clone(),
            hash: receipt.hash.clone(),
            is_dev_fee: receipt.is_dev_fee,
        });
        self.events.emit(MinerEvent::SolutionResult {
            address: address.to_string(),
            challenge_id: challenge_id.to_string(),
            accepted: true,
            error: None,
        });
    }

    fn on_failure(&self, candidate: &SolutionCandidate, submit_hash: &str, error: &Error) -> u32 {
        let address = candidate.address.identifier.as_str();
        let challenge_id = candidate.snapshot.challenge_id.as_str();

        warn!(
            "Submission failed for {}/{}: {}",
            address, challenge_id, error
        );

        let record = ErrorRecord::from_attempt(
            address,
            candidate.address.index,
            challenge_id,
            &candidate.nonce.to_hex(),
            submit_hash,
            candidate.is_dev_fee,
            error,
        );
        if let Err(e) = self.store.append_error(&record) {
            warn!("Failed to append error record: {}", e);
        }

        let failures = self.state.record_failure(address, challenge_id);

        // A different nonce may be tried; clear the barriers so siblings
        // resume mining.
        self.state.rollback_submitted_hash(&candidate.hash);
        if submit_hash != candidate.hash {
            self.state.rollback_submitted_hash(submit_hash);
        }
        self.state.clear_stopped_workers();
        self.state.resume(address, challenge_id);

        self.events.emit(MinerEvent::SolutionResult {
            address: address.to_string(),
            challenge_id: challenge_id.to_string(),
            accepted: false,
            error: Some(error.to_string()),
        });

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Challenge, Difficulty};
    use crate::error::Result;
    use crate::protocol::SubmitReceipt;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// API stub whose submission outcomes are scripted per call
    struct StubApi {
        outcomes: Mutex<Vec<Result<SubmitReceipt>>>,
        calls: Mutex<u32>,
    }

    impl StubApi {
        fn accepting() -> Self {
            Self {
                outcomes: Mutex::new(vec![]),
                calls: Mutex::new(0),
            }
        }

        fn scripted(mut outcomes: Vec<Result<SubmitReceipt>>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl ChallengeApi for StubApi {
        async fn fetch_challenge(&self) -> Result<ChallengeState> {
            Ok(ChallengeState::After)
        }

        async fn fetch_terms(&self) -> Result<String> {
            Ok("terms".to_string())
        }

        async fn register(&self, _: &Address, _: &str) -> Result<()> {
            Ok(())
        }

        async fn submit_solution(
            &self,
            _: &str,
            _: &str,
            _: Nonce,
        ) -> Result<SubmitReceipt> {
            *self.calls.lock() += 1;
            self.outcomes
                .lock()
                .pop()
                .unwrap_or(Ok(SubmitReceipt::default()))
        }
    }

    /// Engine stub with scripted hashes per preimage
    struct StubEngine {
        hashes: Mutex<HashMap<Vec<u8>, String>>,
        fallback: String,
    }

    impl StubEngine {
        fn with_fallback(fallback: &str) -> Self {
            Self {
                hashes: Mutex::new(HashMap::new()),
                fallback: fallback.to_string(),
            }
        }
    }

    #[async_trait]
    impl HashEngine for StubEngine {
        async fn init_rom(&self, _: &str) -> Result<()> {
            Ok(())
        }

        fn is_rom_ready(&self) -> bool {
            true
        }

        async fn hash_batch(&self, preimages: &[Vec<u8>]) -> Result<Vec<String>> {
            let hashes = self.hashes.lock();
            Ok(preimages
                .iter()
                .map(|p| hashes.get(p).cloned().unwrap_or_else(|| self.fallback.clone()))
                .collect())
        }

        fn kill_workers(&self) {}
    }

    /// Store stub capturing appended records in memory
    #[derive(Default)]
    struct MemoryStore {
        receipts: Mutex<Vec<Receipt>>,
        errors: Mutex<Vec<ErrorRecord>>,
    }

    impl ReceiptStore for MemoryStore {
        fn append_receipt(&self, receipt: &Receipt) -> Result<()> {
            self.receipts.lock().push(receipt.clone());
            Ok(())
        }

        fn append_error(&self, record: &ErrorRecord) -> Result<()> {
            self.errors.lock().push(record.clone());
            Ok(())
        }

        fn replay(&self) -> Result<crate::store::ReplayState> {
            let mut state = crate::store::ReplayState::default();
            for receipt in self.receipts.lock().iter() {
                state.absorb(receipt);
            }
            Ok(state)
        }
    }

    fn challenge(id: &str, difficulty: &str, latest: &str) -> Challenge {
        Challenge {
            challenge_id: id.to_string(),
            difficulty: Difficulty::from_hex(difficulty).unwrap(),
            no_pre_mine: "seed".to_string(),
            no_pre_mine_hour: 7,
            latest_submission: latest.to_string(),
        }
    }

    fn candidate(snapshot: &ChallengeSnapshot, hash: &str) -> SolutionCandidate {
        let address = Address {
            index: 0,
            identifier: "addr1".to_string(),
            public_key: vec![1],
            registered: true,
        };
        let nonce = Nonce::new(0x40000abc);
        SolutionCandidate {
            worker_id: WorkerId::new(1),
            preimage: serialize_preimage(nonce, &address.identifier, snapshot),
            address,
            snapshot: snapshot.clone(),
            nonce,
            hash: hash.to_string(),
            is_dev_fee: false,
        }
    }

    struct Fixture {
        api: Arc<StubApi>,
        store: Arc<MemoryStore>,
        state: Arc<MinerState>,
        live_tx: watch::Sender<ChallengeState>,
        gate: SubmissionGate,
    }

    fn fixture(api: StubApi, engine: StubEngine, live: Challenge) -> Fixture {
        let api = Arc::new(api);
        let engine = Arc::new(engine);
        let store = Arc::new(MemoryStore::default());
        let state = Arc::new(MinerState::new());
        let (live_tx, live_rx) = watch::channel(ChallengeState::Active(live));
        let gate = SubmissionGate::new(
            Arc::clone(&api) as Arc<dyn ChallengeApi>,
            engine as Arc<dyn HashEngine>,
            Arc::clone(&store) as Arc<dyn ReceiptStore>,
            Arc::clone(&state),
            EventBus::new(),
            live_rx,
            2,
        );
        Fixture {
            api,
            store,
            state,
            live_tx,
            gate,
        }
    }

    // A hash whose first four bytes are 0x0effffff qualifies for 0fffffff.
    const GOOD_HASH: &str =
        "0effffff00000000000000000000000000000000000000000000000000000000";
    // First four bytes 0x10000000: fails the mask check for 0fffffff.
    const BAD_HASH: &str =
        "1000000000000000000000000000000000000000000000000000000000000000";

    #[tokio::test]
    async fn test_clean_solve_is_accepted() {
        let live = challenge("ch-1", "0fffffff", "genesis");
        let snapshot = ChallengeSnapshot::capture(&live);
        let f = fixture(
            StubApi::accepting(),
            StubEngine::with_fallback(GOOD_HASH),
            live,
        );

        let cand = candidate(&snapshot, GOOD_HASH);
        let verdict = f.gate.submit_candidate(&cand).await;

        assert_eq!(verdict, SubmissionVerdict::Accepted);
        assert!(f.state.is_solved("addr1", "ch-1"));
        assert_eq!(f.state.user_solutions(), 1);
        assert_eq!(f.api.calls(), 1);

        let receipts = f.store.receipts.lock();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].nonce, "0000000040000abc");
        assert!(!receipts[0].is_dev_fee);

        // Siblings stay stopped after an accept; the address is done.
        assert!(f.state.is_worker_stopped(WorkerId::new(0)));
        assert!(!f.state.is_paused("addr1", "ch-1"));
    }

    #[tokio::test]
    async fn test_stale_candidate_is_discarded_without_submission() {
        // Snapshot was captured against "genesis", live has moved on, and
        // the re-hash against the live fields no longer qualifies.
        let old = challenge("ch-1", "0fffffff", "genesis");
        let snapshot = ChallengeSnapshot::capture(&old);
        let live = challenge("ch-1", "0fffffff", "submission-7");

        let engine = StubEngine::with_fallback(BAD_HASH);
        let f = fixture(StubApi::accepting(), engine, live);

        let cand = candidate(&snapshot, GOOD_HASH);
        let verdict = f.gate.submit_candidate(&cand).await;

        assert_eq!(verdict, SubmissionVerdict::Stale);
        // No network call, no receipt, no failure counted.
        assert_eq!(f.api.calls(), 0);
        assert!(f.store.receipts.lock().is_empty());
        assert!(f.store.errors.lock().is_empty());
        assert_eq!(f.state.failure_count("addr1", "ch-1"), 0);
        // Siblings resume.
        assert!(!f.state.is_worker_stopped(WorkerId::new(0)));
        assert!(!f.state.is_paused("addr1", "ch-1"));
    }

    #[tokio::test]
    async fn test_drifted_but_still_valid_is_submitted_with_fresh_hash() {
        let old = challenge("ch-1", "0fffffff", "genesis");
        let snapshot = ChallengeSnapshot::capture(&old);
        let live = challenge("ch-1", "0fffffff", "submission-7");

        let fresh_hash =
            "0e00000000000000000000000000000000000000000000000000000000000000";
        let engine = StubEngine::with_fallback(fresh_hash);
        let f = fixture(StubApi::accepting(), engine, live);

        let cand = candidate(&snapshot, GOOD_HASH);
        let verdict = f.gate.submit_candidate(&cand).await;

        assert_eq!(verdict, SubmissionVerdict::Accepted);
        let receipts = f.store.receipts.lock();
        assert_eq!(receipts[0].hash, fresh_hash);
    }

    #[tokio::test]
    async fn test_rotation_mid_submission_discards() {
        let old = challenge("ch-1", "0fffffff", "genesis");
        let snapshot = ChallengeSnapshot::capture(&old);
        // Live slot already rotated to ch-2.
        let live = challenge("ch-2", "0fffffff", "genesis");
        let f = fixture(
            StubApi::accepting(),
            StubEngine::with_fallback(GOOD_HASH),
            live,
        );

        let cand = candidate(&snapshot, GOOD_HASH);
        let verdict = f.gate.submit_candidate(&cand).await;

        assert_eq!(verdict, SubmissionVerdict::Rotated);
        assert_eq!(f.api.calls(), 0);
        assert_eq!(f.state.submissions_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failed_submission_rolls_back_and_counts() {
        let live = challenge("ch-1", "0fffffff", "genesis");
        let snapshot = ChallengeSnapshot::capture(&live);
        let api = StubApi::scripted(vec![Err(Error::submission_failed(
            "addr1", "ch-1", "503",
        ))]);
        let f = fixture(api, StubEngine::with_fallback(GOOD_HASH), live);

        let cand = candidate(&snapshot, GOOD_HASH);
        let verdict = f.gate.submit_candidate(&cand).await;

        assert_eq!(verdict, SubmissionVerdict::Failed { failures: 1 });
        assert_eq!(f.store.errors.lock().len(), 1);
        assert!(!f.state.is_solved("addr1", "ch-1"));
        // The hash may be rediscovered by a different attempt.
        assert_eq!(
            f.state.try_acquire_submission("addr1", "ch-1", GOOD_HASH),
            AcquireOutcome::Acquired
        );
    }

    #[tokio::test]
    async fn test_duplicate_hash_is_abandoned_before_lock() {
        let live = challenge("ch-1", "0fffffff", "genesis");
        let snapshot = ChallengeSnapshot::capture(&live);
        let f = fixture(
            StubApi::accepting(),
            StubEngine::with_fallback(GOOD_HASH),
            live,
        );

        f.state.record_submitted_hash(GOOD_HASH);
        let cand = candidate(&snapshot, GOOD_HASH);
        let verdict = f.gate.submit_candidate(&cand).await;

        assert_eq!(verdict, SubmissionVerdict::Duplicate);
        assert_eq!(f.api.calls(), 0);
    }

    #[tokio::test]
    async fn test_solved_address_is_not_resubmitted() {
        let live = challenge("ch-1", "0fffffff", "genesis");
        let snapshot = ChallengeSnapshot::capture(&live);
        let f = fixture(
            StubApi::accepting(),
            StubEngine::with_fallback(GOOD_HASH),
            live,
        );

        f.state.mark_solved("addr1", "ch-1");

        let cand = candidate(&snapshot, GOOD_HASH);
        let verdict = f.gate.submit_candidate(&cand).await;

        assert_eq!(verdict, SubmissionVerdict::AlreadySolved);
        assert_eq!(f.api.calls(), 0);
        assert_eq!(f.state.submissions_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_lock_contention_yields_busy() {
        let live = challenge("ch-1", "0fffffff", "genesis");
        let snapshot = ChallengeSnapshot::capture(&live);
        let f = fixture(
            StubApi::accepting(),
            StubEngine::with_fallback(GOOD_HASH),
            live,
        );

        // Simulate a sibling holding the lock.
        f.state.try_acquire_submission("addr1", "ch-1", "other-hash");

        let cand = candidate(&snapshot, GOOD_HASH);
        let verdict = f.gate.submit_candidate(&cand).await;
        assert_eq!(verdict, SubmissionVerdict::Busy);

        // Drop the simulated sibling; keep the live slot alive.
        drop(f.live_tx);
    }
}
