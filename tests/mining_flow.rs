//! Integration tests for the complete mining flow
//!
//! The coordinator runs against a scripted API and the in-process hash
//! engine; no network or real wallet is involved.

use async_trait::async_trait;
use challenge_mining_client::{
    config::MiningConfig,
    core::{Address, Challenge, ChallengeState, Difficulty, Nonce, WalletAddress},
    engine::{Blake2sEngine, HashEngine},
    error::{Error, Result},
    events::EventBus,
    miner::{ChallengePoller, DevFeePool, MiningCoordinator, StaticDevFeeSource},
    protocol::{ChallengeApi, SubmitReceipt},
    store::{JsonlStore, ReceiptStore},
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// How the scripted API answers solution submissions
#[derive(Debug, Clone, Copy)]
enum SubmitMode {
    Accept,
    Fail5xx,
}

/// Scripted upstream API for coordinator tests
struct TestApi {
    state: Mutex<ChallengeState>,
    mode: Mutex<SubmitMode>,
    accepted: Mutex<Vec<(String, String, String)>>,
    register_calls: Mutex<Vec<String>>,
}

impl TestApi {
    fn new(initial: ChallengeState) -> Self {
        Self {
            state: Mutex::new(initial),
            mode: Mutex::new(SubmitMode::Accept),
            accepted: Mutex::new(Vec::new()),
            register_calls: Mutex::new(Vec::new()),
        }
    }

    fn set_state(&self, state: ChallengeState) {
        *self.state.lock() = state;
    }

    fn set_mode(&self, mode: SubmitMode) {
        *self.mode.lock() = mode;
    }

    fn accepted_count(&self) -> usize {
        self.accepted.lock().len()
    }
}

#[async_trait]
impl ChallengeApi for TestApi {
    async fn fetch_challenge(&self) -> Result<ChallengeState> {
        Ok(self.state.lock().clone())
    }

    async fn fetch_terms(&self) -> Result<String> {
        Ok("terms of the challenge network".to_string())
    }

    async fn register(&self, address: &Address, _signature: &str) -> Result<()> {
        self.register_calls.lock().push(address.identifier.clone());
        Ok(())
    }

    async fn submit_solution(
        &self,
        address: &str,
        challenge_id: &str,
        nonce: Nonce,
    ) -> Result<SubmitReceipt> {
        match *self.mode.lock() {
            SubmitMode::Accept => {
                self.accepted.lock().push((
                    address.to_string(),
                    challenge_id.to_string(),
                    nonce.to_hex(),
                ));
                Ok(SubmitReceipt::default())
            }
            SubmitMode::Fail5xx => Err(Error::submission_failed(
                address,
                challenge_id,
                "503 Service Unavailable",
            )),
        }
    }
}

fn easy_challenge(id: &str) -> Challenge {
    Challenge {
        challenge_id: id.to_string(),
        // Every hash qualifies: Z = 0 and the mask covers all 32 bits.
        difficulty: Difficulty::from_hex("ffffffff").unwrap(),
        no_pre_mine: format!("seed-{}", id),
        no_pre_mine_hour: 1,
        latest_submission: "genesis".to_string(),
    }
}

fn wallet_address(index: u32, registered: bool) -> WalletAddress {
    WalletAddress {
        address: Address {
            index,
            identifier: format!("addr-{}", index),
            public_key: vec![index as u8, 0xab],
            registered,
        },
        signature: format!("sig-{}", index),
    }
}

fn test_mining_config(
    worker_threads: usize,
    dev_fee_enabled: bool,
    dev_fee_ratio: u32,
) -> MiningConfig {
    MiningConfig {
        worker_threads,
        batch_size: 50,
        poll_interval_ms: 20,
        max_submission_failures: 6,
        dev_fee_ratio,
        dev_fee_enabled,
    }
}

struct Harness {
    api: Arc<TestApi>,
    store: Arc<JsonlStore>,
    coordinator: Arc<MiningCoordinator>,
    _dir: tempfile::TempDir,
}

fn harness(config: MiningConfig, dev_fee_addresses: Vec<Address>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(TestApi::new(ChallengeState::Before { starts_at: None }));
    let engine: Arc<dyn HashEngine> = Arc::new(Blake2sEngine::new());
    let store = Arc::new(JsonlStore::new(
        dir.path().join("receipts.jsonl"),
        dir.path().join("errors.jsonl"),
    ));
    let events = EventBus::new();

    let (poller, live_rx) = ChallengePoller::new(
        Arc::clone(&api) as Arc<dyn ChallengeApi>,
        Duration::from_millis(10),
        events.clone(),
    );

    let coordinator = Arc::new(MiningCoordinator::new(
        Arc::clone(&api) as Arc<dyn ChallengeApi>,
        engine,
        Arc::clone(&store) as Arc<dyn ReceiptStore>,
        Arc::new(DevFeePool::new(Arc::new(StaticDevFeeSource::new(
            dev_fee_addresses,
        )))),
        config,
        events,
        live_rx,
    ));

    tokio::spawn(poller.run(coordinator.state()));

    Harness {
        api,
        store,
        coordinator,
        _dir: dir,
    }
}

/// Poll a condition until it holds or the deadline passes
async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Duration::from_secs(20);
    let result = tokio::time::timeout(deadline, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for: {}", what);
}

#[tokio::test]
async fn test_clean_solve_end_to_end() {
    let h = harness(test_mining_config(2, false, 17), vec![]);
    let run_coordinator = Arc::clone(&h.coordinator);
    let run = tokio::spawn(async move {
        run_coordinator
            .run(vec![wallet_address(0, true)])
            .await
            .unwrap();
    });

    h.api.set_state(ChallengeState::Active(easy_challenge("ch-1")));

    let state = h.coordinator.state();
    wait_until("address solved", || state.is_solved("addr-0", "ch-1")).await;

    // Window closes; the coordinator drains back to idle.
    h.api.set_state(ChallengeState::After);
    tokio::time::timeout(Duration::from_secs(20), run)
        .await
        .expect("coordinator did not drain after window close")
        .unwrap();

    assert_eq!(h.api.accepted_count(), 1);
    assert_eq!(state.user_solutions(), 1);
    assert_eq!(state.dev_fee_solutions(), 0);

    let replay = h.store.replay().unwrap();
    assert_eq!(replay.user_solutions, 1);
    assert!(replay.is_solved("addr-0", "ch-1"));
    assert_eq!(replay.submitted_hashes.len(), 1);
}

#[tokio::test]
async fn test_unregistered_addresses_are_registered_first() {
    let h = harness(test_mining_config(1, false, 17), vec![]);
    let run_coordinator = Arc::clone(&h.coordinator);
    let run = tokio::spawn(async move {
        run_coordinator
            .run(vec![wallet_address(0, false), wallet_address(1, true)])
            .await
            .unwrap();
    });

    h.api.set_state(ChallengeState::Active(easy_challenge("ch-1")));

    let state = h.coordinator.state();
    wait_until("both addresses solved", || {
        state.is_solved("addr-0", "ch-1") && state.is_solved("addr-1", "ch-1")
    })
    .await;

    h.api.set_state(ChallengeState::After);
    tokio::time::timeout(Duration::from_secs(20), run)
        .await
        .unwrap()
        .unwrap();

    // Only the unregistered address hit the registration endpoint.
    assert_eq!(*h.api.register_calls.lock(), vec!["addr-0".to_string()]);
    assert_eq!(state.user_solutions(), 2);
}

#[tokio::test]
async fn test_failure_cap_moves_on_without_solving() {
    let h = harness(test_mining_config(1, false, 17), vec![]);
    h.api.set_mode(SubmitMode::Fail5xx);

    let run_coordinator = Arc::clone(&h.coordinator);
    let run = tokio::spawn(async move {
        run_coordinator
            .run(vec![wallet_address(0, true)])
            .await
            .unwrap();
    });

    h.api.set_state(ChallengeState::Active(easy_challenge("ch-1")));

    let state = h.coordinator.state();
    wait_until("failure cap reached", || {
        state.failure_count("addr-0", "ch-1") >= 6
    })
    .await;

    h.api.set_state(ChallengeState::After);
    tokio::time::timeout(Duration::from_secs(20), run)
        .await
        .unwrap()
        .unwrap();

    assert!(!state.is_solved("addr-0", "ch-1"));
    assert_eq!(state.user_solutions(), 0);
    assert_eq!(state.failure_count("addr-0", "ch-1"), 6);
    assert_eq!(h.api.accepted_count(), 0);
}

#[tokio::test]
async fn test_dev_fee_obligation_after_user_solution() {
    let dev_address = Address {
        index: 900,
        identifier: "dev-addr-900".to_string(),
        public_key: vec![0x90],
        registered: true,
    };
    // Ratio 1: one dev-fee solution owed per user solution.
    let h = harness(test_mining_config(2, true, 1), vec![dev_address]);

    let run_coordinator = Arc::clone(&h.coordinator);
    let run = tokio::spawn(async move {
        run_coordinator
            .run(vec![wallet_address(0, true)])
            .await
            .unwrap();
    });

    h.api.set_state(ChallengeState::Active(easy_challenge("ch-1")));

    let state = h.coordinator.state();
    wait_until("dev-fee obligation settled", || {
        state.dev_fee_solutions() == 1
    })
    .await;

    h.api.set_state(ChallengeState::After);
    tokio::time::timeout(Duration::from_secs(20), run)
        .await
        .unwrap()
        .unwrap();

    // The dev-fee receipt does not count as a user solution.
    assert_eq!(state.user_solutions(), 1);
    assert_eq!(state.dev_fee_solutions(), 1);

    let replay = h.store.replay().unwrap();
    assert_eq!(replay.user_solutions, 1);
    assert_eq!(replay.dev_fee_solutions, 1);
    assert!(replay.is_solved("dev-addr-900", "ch-1"));
}

#[tokio::test]
async fn test_rotation_spawns_fresh_cohort_for_new_challenge() {
    let h = harness(test_mining_config(2, false, 17), vec![]);
    let run_coordinator = Arc::clone(&h.coordinator);
    let run = tokio::spawn(async move {
        run_coordinator
            .run(vec![wallet_address(0, true)])
            .await
            .unwrap();
    });

    h.api.set_state(ChallengeState::Active(easy_challenge("ch-1")));
    let state = h.coordinator.state();
    wait_until("first rotation solved", || state.is_solved("addr-0", "ch-1")).await;

    // Rotate: the same address must be mined again for the new id.
    h.api.set_state(ChallengeState::Active(easy_challenge("ch-2")));
    wait_until("second rotation solved", || state.is_solved("addr-0", "ch-2")).await;

    h.api.set_state(ChallengeState::After);
    tokio::time::timeout(Duration::from_secs(20), run)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(state.user_solutions(), 2);
    let replay = h.store.replay().unwrap();
    assert!(replay.is_solved("addr-0", "ch-1"));
    assert!(replay.is_solved("addr-0", "ch-2"));
}

#[tokio::test]
async fn test_already_solved_address_is_skipped_after_restart() {
    let h = harness(test_mining_config(1, false, 17), vec![]);

    // Simulate durable history: addr-0 already solved ch-1.
    let mut replay = challenge_mining_client::store::ReplayState::default();
    replay
        .solved
        .entry("addr-0".to_string())
        .or_default()
        .insert("ch-1".to_string());
    replay.user_solutions = 1;
    h.coordinator.state().load_replay(replay);

    let run_coordinator = Arc::clone(&h.coordinator);
    let run = tokio::spawn(async move {
        run_coordinator
            .run(vec![wallet_address(0, true), wallet_address(1, true)])
            .await
            .unwrap();
    });

    h.api.set_state(ChallengeState::Active(easy_challenge("ch-1")));

    let state = h.coordinator.state();
    wait_until("fresh address solved", || state.is_solved("addr-1", "ch-1")).await;

    h.api.set_state(ChallengeState::After);
    tokio::time::timeout(Duration::from_secs(20), run)
        .await
        .unwrap()
        .unwrap();

    // Exactly one network acceptance: the replayed address never re-mined.
    assert_eq!(h.api.accepted_count(), 1);
    assert_eq!(state.user_solutions(), 2);
}
