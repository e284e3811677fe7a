//! Challenge poller
//!
//! Fetches the active challenge at a fixed cadence and publishes the latest
//! observed [`ChallengeState`] on a watch channel. The coordinator and the
//! submission gate read the slot; only the poller writes it.

use crate::core::ChallengeState;
use crate::events::{EventBus, MinerEvent};
use crate::miner::state::MinerState;
use crate::protocol::ChallengeApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Consecutive poll failures before a network-down error is surfaced
const NETWORK_DOWN_THRESHOLD: u32 = 5;

/// Periodic challenge poller
pub struct ChallengePoller {
    api: Arc<dyn ChallengeApi>,
    interval: Duration,
    events: EventBus,
    tx: watch::Sender<ChallengeState>,
}

impl ChallengePoller {
    /// Create a poller and the receiver half of its live slot
    pub fn new(
        api: Arc<dyn ChallengeApi>,
        interval: Duration,
        events: EventBus,
    ) -> (Self, watch::Receiver<ChallengeState>) {
        let (tx, rx) = watch::channel(ChallengeState::Before { starts_at: None });
        (
            Self {
                api,
                interval,
                events,
                tx,
            },
            rx,
        )
    }

    /// Run until the process-wide cancellation token flips
    ///
    /// Poll failures are warnings retried on the next tick; after
    /// `NETWORK_DOWN_THRESHOLD` consecutive failures an `error` event is
    /// surfaced, but polling continues. The poller never blocks the
    /// coordinator.
    pub async fn run(self, state: Arc<MinerState>) {
        let mut consecutive_failures = 0u32;

        while !state.is_cancelled() {
            match self.api.fetch_challenge().await {
                Ok(new_state) => {
                    consecutive_failures = 0;
                    self.publish(new_state);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        "Challenge poll failed ({} consecutive): {}",
                        consecutive_failures, e
                    );
                    if consecutive_failures == NETWORK_DOWN_THRESHOLD {
                        self.events.emit(MinerEvent::Error {
                            context: "poller".to_string(),
                            message: format!(
                                "network down: {} consecutive poll failures",
                                consecutive_failures
                            ),
                        });
                    }
                }
            }

            tokio::time::sleep(self.interval).await;
        }

        debug!("Challenge poller stopped");
    }

    /// Publish the freshly observed state, logging rotations and mutations
    fn publish(&self, new_state: ChallengeState) {
        let previous = self.tx.borrow().clone();

        match (previous.active(), new_state.active()) {
            (Some(old), Some(new)) if old.challenge_id != new.challenge_id => {
                info!(
                    "Challenge rotation: {} -> {}",
                    old.challenge_id, new.challenge_id
                );
            }
            (Some(old), Some(new)) if old != new => {
                debug!(
                    "Challenge {} mutated (latest_submission/hour/difficulty)",
                    new.challenge_id
                );
            }
            (None, Some(new)) => {
                info!("Challenge window open: {}", new.challenge_id);
            }
            (Some(old), None) => {
                info!("Challenge window no longer active (was {})", old.challenge_id);
            }
            _ => {}
        }

        self.tx.send_replace(new_state);
    }
}
