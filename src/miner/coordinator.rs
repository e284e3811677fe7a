//! Mining coordinator
//!
//! The long-lived state machine driving everything: registration, the
//! sequential per-address cohorts, rotation handling, the hourly in-place
//! reset, and the dev-fee obligation. The coordinator owns every shared
//! map; workers and the gate only see the [`MinerState`] handle.

use crate::config::MiningConfig;
use crate::core::{Address, Challenge, ChallengeSnapshot, ChallengeState, WalletAddress, WorkerId};
use crate::engine::HashEngine;
use crate::error::{EngineError, Error, Result};
use crate::events::{EventBus, MinerEvent};
use crate::miner::devfee::{DevFeePool, DEV_FEE_POOL_PREWARM};
use crate::miner::state::MinerState;
use crate::miner::submission::SubmissionGate;
use crate::miner::worker::{run_worker, WorkerContext, WorkerOutcome};
use crate::protocol::ChallengeApi;
use crate::store::ReceiptStore;
use crate::utils::until_next_hour;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// ROM initialization deadline per rotation
const ROM_INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll cadence while waiting for ROM readiness
const ROM_READY_POLL: Duration = Duration::from_millis(100);

/// Coordinator lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerPhase {
    /// Not mining
    Idle,
    /// Ensuring addresses are registered
    Registering,
    /// Mining cohorts
    Running,
    /// Draining workers before returning to idle
    Draining,
}

impl MinerPhase {
    /// Phase name for events and logs
    pub fn name(self) -> &'static str {
        match self {
            MinerPhase::Idle => "idle",
            MinerPhase::Registering => "registering",
            MinerPhase::Running => "running",
            MinerPhase::Draining => "draining",
        }
    }
}

/// The mining orchestrator
///
/// Constructed once at process start; operator surfaces share it through an
/// `Arc` and talk to it via [`stop`](MiningCoordinator::stop), the phase
/// accessor, and the event bus.
pub struct MiningCoordinator {
    api: Arc<dyn ChallengeApi>,
    engine: Arc<dyn HashEngine>,
    dev_fee_pool: Arc<DevFeePool>,
    config: MiningConfig,
    state: Arc<MinerState>,
    gate: Arc<SubmissionGate>,
    events: EventBus,
    live: watch::Receiver<ChallengeState>,
    phase: Mutex<MinerPhase>,
    started_at: Mutex<Option<Instant>>,
}

impl MiningCoordinator {
    /// Wire up a coordinator over its collaborators
    pub fn new(
        api: Arc<dyn ChallengeApi>,
        engine: Arc<dyn HashEngine>,
        store: Arc<dyn ReceiptStore>,
        dev_fee_pool: Arc<DevFeePool>,
        config: MiningConfig,
        events: EventBus,
        live: watch::Receiver<ChallengeState>,
    ) -> Self {
        let state = Arc::new(MinerState::new());
        let gate = Arc::new(SubmissionGate::new(
            Arc::clone(&api),
            Arc::clone(&engine),
            store,
            Arc::clone(&state),
            events.clone(),
            live.clone(),
            config.worker_threads,
        ));

        Self {
            api,
            engine,
            dev_fee_pool,
            config,
            state,
            gate,
            events,
            live,
            phase: Mutex::new(MinerPhase::Idle),
            started_at: Mutex::new(None),
        }
    }

    /// Shared state handle (for the poller and operator surfaces)
    pub fn state(&self) -> Arc<MinerState> {
        Arc::clone(&self.state)
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> MinerPhase {
        *self.phase.lock()
    }

    /// Event bus handle
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Stop mining: flips the cancellation token and kills outstanding
    /// hash batches
    pub fn stop(&self) {
        info!("Stop requested");
        self.state.cancel();
        self.engine.kill_workers();
    }

    fn set_phase(&self, phase: MinerPhase) {
        *self.phase.lock() = phase;
        self.events.emit(MinerEvent::Status {
            state: phase.name().to_string(),
        });
        info!("Coordinator phase: {}", phase.name());
    }

    /// Run the full lifecycle until the window closes or stop is requested
    pub async fn run(&self, wallet: Vec<WalletAddress>) -> Result<()> {
        *self.started_at.lock() = Some(Instant::now());

        self.set_phase(MinerPhase::Registering);
        let addresses = self.register_addresses(&wallet).await;
        if addresses.is_empty() {
            warn!("No registered addresses available; nothing to mine");
        }

        if self.config.dev_fee_enabled {
            self.dev_fee_pool.prewarm(DEV_FEE_POOL_PREWARM).await;
        }

        self.set_phase(MinerPhase::Running);

        // Hourly in-place reset: the timer only raises a flag; the mining
        // loop performs the reset between cohorts so no workers are live.
        let timer_state = Arc::clone(&self.state);
        let timer = tokio::spawn(async move {
            loop {
                tokio::time::sleep(until_next_hour()).await;
                if timer_state.is_cancelled() {
                    break;
                }
                info!("Hourly reset scheduled");
                timer_state.request_reset();
            }
        });

        if !addresses.is_empty() {
            self.mining_loop(&addresses).await;
        }

        self.set_phase(MinerPhase::Draining);
        self.engine.kill_workers();
        timer.abort();

        self.set_phase(MinerPhase::Idle);
        Ok(())
    }

    /// Ensure every wallet address is registered; returns the ready list
    async fn register_addresses(&self, wallet: &[WalletAddress]) -> Vec<Address> {
        match self.api.fetch_terms().await {
            Ok(terms) => debug!("Fetched terms message ({} bytes)", terms.len()),
            Err(e) => {
                warn!("Failed to fetch terms: {}", e);
                self.events.emit(MinerEvent::Error {
                    context: "registration".to_string(),
                    message: e.to_string(),
                });
            }
        }

        let total = wallet.len();
        let mut ready = Vec::with_capacity(total);

        for entry in wallet {
            if self.state.is_cancelled() {
                break;
            }

            let mut address = entry.address.clone();
            if !address.registered {
                match self.api.register(&address, &entry.signature).await {
                    Ok(()) => address.registered = true,
                    Err(e) => {
                        warn!("Registration failed for {}: {}", address.identifier, e);
                        self.events.emit(MinerEvent::Error {
                            context: "registration".to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            if address.registered {
                ready.push(address.clone());
            }

            self.events.emit(MinerEvent::RegistrationProgress {
                registered: ready.len(),
                total,
                address: address.identifier,
            });
        }

        ready
    }

    /// The rotation-scoped mining loop
    async fn mining_loop(&self, addresses: &[Address]) {
        'rotation: loop {
            if self.state.is_cancelled() {
                break;
            }

            let challenge = match self.wait_for_active().await {
                Some(challenge) => challenge,
                None => break,
            };
            let challenge_id = challenge.challenge_id.clone();

            if let Err(e) = self.prepare_rotation(&challenge).await {
                warn!("Rotation preparation failed: {}", e);
                self.events.emit(MinerEvent::Error {
                    context: "rotation".to_string(),
                    message: e.to_string(),
                });
                tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                continue 'rotation;
            }

            info!("Mining rotation {}", challenge_id);
            let mut failed_this_rotation: HashSet<String> = HashSet::new();

            for address in addresses {
                if self.state.is_cancelled() {
                    break 'rotation;
                }

                if self.state.take_reset_request() {
                    self.perform_reset(&challenge).await;
                }

                // Live window check before committing a cohort.
                let live_now = self.live.borrow().clone();
                match &live_now {
                    ChallengeState::After => break 'rotation,
                    ChallengeState::Before { .. } => continue 'rotation,
                    ChallengeState::Active(c) if c.challenge_id != challenge_id => {
                        continue 'rotation
                    }
                    ChallengeState::Active(_) => {}
                }

                if self.state.is_solved(&address.identifier, &challenge_id)
                    || failed_this_rotation.contains(&address.identifier)
                {
                    continue;
                }

                // Snapshot the freshest dynamic fields at mining start.
                let live_challenge = match self.live.borrow().active() {
                    Some(c) => c.clone(),
                    None => continue 'rotation,
                };

                let outcome = self.mine_for_address(address, &live_challenge, false).await;
                match outcome {
                    WorkerOutcome::Rotated => continue 'rotation,
                    WorkerOutcome::Cancelled if self.state.is_cancelled() => break 'rotation,
                    WorkerOutcome::Cancelled if self.state.is_reset_requested() => {
                        // Reset interrupted the cohort; the address gets a
                        // fresh cohort after the reset, not a failure mark.
                        if self.state.take_reset_request() {
                            self.perform_reset(&challenge).await;
                        }
                        continue 'rotation;
                    }
                    _ => {}
                }

                if !self.state.is_solved(&address.identifier, &challenge_id) {
                    debug!(
                        "Address {} not solved this rotation, moving on",
                        address.identifier
                    );
                    failed_this_rotation.insert(address.identifier.clone());
                }

                // Settle dev-fee debt promptly after every cohort.
                if self.config.dev_fee_enabled {
                    self.settle_dev_fee_debt(&challenge_id).await;
                }
            }

            // Address queue exhausted: full dev-fee obligation, then wait
            // for rotation, closure or reset.
            if self.config.dev_fee_enabled {
                self.settle_dev_fee_debt(&challenge_id).await;
            }

            if !self.wait_for_rotation(&challenge).await {
                break 'rotation;
            }
        }
    }

    /// Wait until the window is open; `None` on closure or cancellation
    async fn wait_for_active(&self) -> Option<Challenge> {
        let mut live = self.live.clone();
        loop {
            if self.state.is_cancelled() {
                return None;
            }

            match live.borrow_and_update().clone() {
                ChallengeState::Active(challenge) => return Some(challenge),
                ChallengeState::After => {
                    info!("Challenge window closed");
                    return None;
                }
                ChallengeState::Before { starts_at } => {
                    debug!("Mining window not open yet (starts_at: {:?})", starts_at);
                }
            }

            let tick = Duration::from_millis(self.config.poll_interval_ms);
            match tokio::time::timeout(tick, live.changed()).await {
                Ok(Err(_)) => tokio::time::sleep(tick).await,
                _ => {}
            }
        }
    }

    /// Block until the current rotation ends
    ///
    /// Returns `false` when mining should stop entirely (closure or
    /// cancellation); `true` when a new rotation should begin.
    async fn wait_for_rotation(&self, challenge: &Challenge) -> bool {
        let mut live = self.live.clone();
        loop {
            if self.state.is_cancelled() {
                return false;
            }

            if self.state.take_reset_request() {
                self.perform_reset(challenge).await;
            }

            match live.borrow_and_update().clone() {
                ChallengeState::After => return false,
                ChallengeState::Active(c) if c.challenge_id != challenge.challenge_id => {
                    return true;
                }
                _ => {}
            }

            let tick = Duration::from_millis(self.config.poll_interval_ms);
            match tokio::time::timeout(tick, live.changed()).await {
                Ok(Err(_)) => tokio::time::sleep(tick).await,
                _ => {}
            }
        }
    }

    /// Rotation entry: void stale work, rebuild per-challenge state,
    /// re-initialize the ROM
    async fn prepare_rotation(&self, challenge: &Challenge) -> Result<()> {
        self.engine.kill_workers();
        self.state.prune_for_challenge(&challenge.challenge_id);
        self.init_rom(challenge).await
    }

    /// Initialize the engine ROM with a readiness deadline
    async fn init_rom(&self, challenge: &Challenge) -> Result<()> {
        tokio::time::timeout(ROM_INIT_TIMEOUT, self.engine.init_rom(&challenge.no_pre_mine))
            .await
            .map_err(|_| {
                Error::Engine(EngineError::RomInitTimeout {
                    timeout: ROM_INIT_TIMEOUT,
                })
            })??;

        let deadline = Instant::now() + ROM_INIT_TIMEOUT;
        while !self.engine.is_rom_ready() {
            if Instant::now() >= deadline {
                return Err(Error::Engine(EngineError::RomInitTimeout {
                    timeout: ROM_INIT_TIMEOUT,
                }));
            }
            tokio::time::sleep(ROM_READY_POLL).await;
        }

        debug!("ROM ready for {}", challenge.challenge_id);
        Ok(())
    }

    /// Hourly in-place reset, performed between cohorts
    async fn perform_reset(&self, challenge: &Challenge) {
        info!("Performing hourly reset");
        self.engine.kill_workers();
        self.state.reset_transient();
        if let Err(e) = self.init_rom(challenge).await {
            warn!("ROM re-initialization after reset failed: {}", e);
            self.events.emit(MinerEvent::Error {
                context: "hourly-reset".to_string(),
                message: e.to_string(),
            });
        }
    }

    /// Run one cohort of workers for one address and join it
    async fn mine_for_address(
        &self,
        address: &Address,
        challenge: &Challenge,
        is_dev_fee: bool,
    ) -> WorkerOutcome {
        let snapshot = ChallengeSnapshot::capture(challenge);
        let identifier = address.identifier.clone();
        let challenge_id = snapshot.challenge_id.clone();

        self.state.set_current_address(Some(identifier.clone()));
        self.state.clear_cohort_barriers(&identifier, &challenge_id);

        self.events.emit(MinerEvent::MiningStart {
            address: identifier.clone(),
            challenge_id: challenge_id.clone(),
            workers: self.config.worker_threads,
            is_dev_fee,
        });

        let mut cohort: JoinSet<WorkerOutcome> = JoinSet::new();
        for id in 0..self.config.worker_threads {
            cohort.spawn(run_worker(WorkerContext {
                id: WorkerId::new(id),
                address: address.clone(),
                snapshot: snapshot.clone(),
                is_dev_fee,
                batch_size: self.config.batch_size,
                max_failures: self.config.max_submission_failures,
                engine: Arc::clone(&self.engine),
                state: Arc::clone(&self.state),
                gate: Arc::clone(&self.gate),
                live: self.live.clone(),
                events: self.events.clone(),
            }));
        }

        let mut outcomes = Vec::with_capacity(self.config.worker_threads);
        while let Some(joined) = cohort.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Worker task died: {}", e),
            }
        }

        self.state.set_current_address(None);
        self.emit_stats();

        reduce_outcomes(&outcomes)
    }

    /// Mine dev-fee cohorts until the obligation is settled or blocked
    ///
    /// `expected = floor(user_solutions / R)`; each missing unit draws a
    /// pool address, falls back to one refill on collision, and skips
    /// rather than block user mining.
    async fn settle_dev_fee_debt(&self, challenge_id: &str) {
        loop {
            if self.state.is_cancelled() {
                return;
            }

            let expected = self.state.user_solutions() / self.config.dev_fee_ratio as u64;
            let needed = expected.saturating_sub(self.state.dev_fee_solutions());
            if needed == 0 {
                return;
            }

            let live_challenge = match self.live.borrow().active() {
                Some(c) if c.challenge_id == challenge_id => c.clone(),
                _ => return,
            };

            let Some(drawn) = self.dev_fee_pool.draw() else {
                debug!("Dev-fee pool empty, deferring obligation");
                return;
            };

            let dev_address = if self.state.is_solved(&drawn.identifier, challenge_id) {
                match self.dev_fee_pool.refill().await {
                    Ok(fresh) if !self.state.is_solved(&fresh.identifier, challenge_id) => fresh,
                    _ => {
                        debug!("Dev-fee address collision, skipping unit");
                        return;
                    }
                }
            } else {
                drawn
            };

            info!(
                "Dev-fee obligation: {} unit(s) owed, mining {}",
                needed, dev_address.identifier
            );
            self.mine_for_address(&dev_address, &live_challenge, true)
                .await;

            if !self.state.is_solved(&dev_address.identifier, challenge_id) {
                // Didn't settle (rotation, cap, cancellation); retry after
                // the next cohort rather than spin here.
                return;
            }
        }
    }

    fn emit_stats(&self) {
        let started_at = *self.started_at.lock();
        let elapsed = started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let total_hashes = self.state.total_hashes();
        let hash_rate = if elapsed > 0.0 {
            total_hashes as f64 / elapsed
        } else {
            0.0
        };

        self.events.emit(MinerEvent::Stats {
            total_hashes,
            hash_rate,
            user_solutions: self.state.user_solutions(),
            dev_fee_solutions: self.state.dev_fee_solutions(),
        });
    }
}

/// Reduce a cohort's worker outcomes to the cohort outcome
fn reduce_outcomes(outcomes: &[WorkerOutcome]) -> WorkerOutcome {
    let priority = [
        WorkerOutcome::Solved,
        WorkerOutcome::Rotated,
        WorkerOutcome::CapReached,
        WorkerOutcome::Exhausted,
    ];
    for wanted in priority {
        if outcomes.contains(&wanted) {
            return wanted;
        }
    }
    WorkerOutcome::Cancelled
}
