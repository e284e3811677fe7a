//! Typed event stream for operator surfaces
//!
//! The core publishes every externally observable transition on a
//! multi-subscriber broadcast channel. A subscriber that lags drops events
//! for itself only; the core never blocks on a consumer. Address masking
//! for display is the transport layer's concern, not the core's.

use serde::Serialize;
use tokio::sync::broadcast;

/// Default capacity of the broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the mining core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MinerEvent {
    /// Coordinator phase change
    Status {
        /// Phase name (idle, registering, running, draining)
        state: String,
    },
    /// Aggregate mining statistics
    Stats {
        /// Total hashes computed since start
        total_hashes: u64,
        /// Aggregate hash rate across the cohort
        hash_rate: f64,
        /// Accepted non-dev-fee receipts
        user_solutions: u64,
        /// Accepted dev-fee receipts
        dev_fee_solutions: u64,
    },
    /// One-time address registration progress
    RegistrationProgress {
        /// Addresses registered so far
        registered: usize,
        /// Total addresses requiring registration
        total: usize,
        /// Address just processed
        address: String,
    },
    /// A cohort started mining an address
    MiningStart {
        /// Target address
        address: String,
        /// Challenge being mined
        challenge_id: String,
        /// Cohort size
        workers: usize,
        /// Whether this is a dev-fee cohort
        is_dev_fee: bool,
    },
    /// Throttled per-worker hashing progress
    HashProgress {
        /// Worker reporting progress
        worker_id: usize,
        /// Hashes computed by this worker
        hashes: u64,
        /// Worker hash rate
        hash_rate: f64,
    },
    /// A candidate passed the gate and is being submitted
    SolutionSubmit {
        /// Submitting address
        address: String,
        /// Challenge submitted against
        challenge_id: String,
        /// Winning nonce (16 hex chars)
        nonce: String,
        /// Qualifying hash
        hash: String,
    },
    /// Outcome of a submission attempt
    SolutionResult {
        /// Submitting address
        address: String,
        /// Challenge submitted against
        challenge_id: String,
        /// Whether the network accepted the solution
        accepted: bool,
        /// Rejection or failure detail, if any
        error: Option<String>,
    },
    /// Per-worker state snapshot
    WorkerUpdate {
        /// Worker id
        worker_id: usize,
        /// Target address
        address: String,
        /// Hashes computed by this worker
        hashes: u64,
        /// Worker hash rate
        hash_rate: f64,
        /// Worker status (idle, mining, submitting, completed)
        status: String,
    },
    /// An accepted solution
    Solution {
        /// Solving address
        address: String,
        /// Challenge solved
        challenge_id: String,
        /// Winning nonce
        nonce: String,
        /// Qualifying hash
        hash: String,
        /// Whether the receipt is a dev-fee receipt
        is_dev_fee: bool,
    },
    /// A surfaced error
    Error {
        /// Where the error occurred
        context: String,
        /// Error detail
        message: String,
    },
}

/// Multi-subscriber broadcast bus for [`MinerEvent`]
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MinerEvent>,
}

impl EventBus {
    /// Create a new bus with the default capacity
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<MinerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    ///
    /// A send with no live subscribers is not an error; the event is simply
    /// dropped.
    pub fn emit(&self, event: MinerEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(MinerEvent::Status {
            state: "idle".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe();
        let mut rx_b = bus.subscribe();

        bus.emit(MinerEvent::MiningStart {
            address: "addr1".to_string(),
            challenge_id: "ch-0001".to_string(),
            workers: 2,
            is_dev_fee: false,
        });

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await.unwrap() {
                MinerEvent::MiningStart { address, workers, .. } => {
                    assert_eq!(address, "addr1");
                    assert_eq!(workers, 2);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_lagging_subscriber_drops_only_its_own_events() {
        let bus = EventBus::new();
        let mut lagging = bus.subscribe();

        for i in 0..(EVENT_CHANNEL_CAPACITY + 16) {
            bus.emit(MinerEvent::HashProgress {
                worker_id: i,
                hashes: i as u64,
                hash_rate: 0.0,
            });
        }

        // The lagging receiver observes a Lagged error, then catches up.
        match lagging.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
            other => panic!("expected lagged error, got {:?}", other),
        }
        assert!(lagging.recv().await.is_ok());
    }

    #[test]
    fn test_event_serialization_tags() {
        let event = MinerEvent::SolutionResult {
            address: "addr1".to_string(),
            challenge_id: "ch-0001".to_string(),
            accepted: true,
            error: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"solution_result\""));
        assert!(json.contains("\"accepted\":true"));
    }
}
