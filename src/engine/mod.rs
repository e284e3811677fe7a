//! Hash engine abstraction
//!
//! The orchestrator treats hashing as an opaque batch service: it hands the
//! engine preimage batches and receives equal-length vectors of lowercase
//! hex hashes. The engine owns challenge-specific precomputed state (the
//! ROM) which must be re-initialized on every rotation before mining.
//!
//! [`Blake2sEngine`] is the in-process reference implementation used by the
//! default binary wiring and by tests; production deployments plug their
//! own engine behind the same trait.

use crate::error::{EngineError, Error, Result};
use async_trait::async_trait;
use blake2::{Blake2s256, Digest};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task;

/// Opaque batch hashing service
#[async_trait]
pub trait HashEngine: Send + Sync {
    /// Initialize the challenge-specific ROM; idempotent per seed
    ///
    /// Must complete before mining starts for the challenge.
    async fn init_rom(&self, no_pre_mine: &str) -> Result<()>;

    /// Whether the ROM is ready for hashing
    fn is_rom_ready(&self) -> bool;

    /// Hash a batch of preimages
    ///
    /// Returns one lowercase hex hash per preimage, in order.
    async fn hash_batch(&self, preimages: &[Vec<u8>]) -> Result<Vec<String>>;

    /// Cancel outstanding batches
    ///
    /// Called on rotation and on stop; batches in flight fail with a
    /// non-retriable engine error.
    fn kill_workers(&self);
}

/// In-process reference engine backed by Blake2s-256
///
/// The ROM is the challenge seed mixed into every hash; a real external
/// engine precomputes far more, but the interface contract is identical.
pub struct Blake2sEngine {
    rom: RwLock<Option<String>>,
    generation: Arc<AtomicU64>,
}

impl Blake2sEngine {
    /// Create an engine with no ROM loaded
    pub fn new() -> Self {
        Self {
            rom: RwLock::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for Blake2sEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HashEngine for Blake2sEngine {
    async fn init_rom(&self, no_pre_mine: &str) -> Result<()> {
        {
            let rom = self.rom.read();
            if rom.as_deref() == Some(no_pre_mine) {
                return Ok(());
            }
        }
        *self.rom.write() = Some(no_pre_mine.to_string());
        Ok(())
    }

    fn is_rom_ready(&self) -> bool {
        self.rom.read().is_some()
    }

    async fn hash_batch(&self, preimages: &[Vec<u8>]) -> Result<Vec<String>> {
        let seed = self
            .rom
            .read()
            .clone()
            .ok_or_else(|| Error::Engine(EngineError::RomNotReady {
                challenge_id: "<unset>".to_string(),
            }))?;

        let generation = Arc::clone(&self.generation);
        let started_at = generation.load(Ordering::SeqCst);
        let batch: Vec<Vec<u8>> = preimages.to_vec();

        let hashes = task::spawn_blocking(move || {
            batch
                .iter()
                .map(|preimage| {
                    let mut hasher = Blake2s256::new();
                    hasher.update(seed.as_bytes());
                    hasher.update(preimage);
                    hex::encode(hasher.finalize())
                })
                .collect::<Vec<String>>()
        })
        .await
        .map_err(|e| Error::engine_batch_failed(format!("hash task panicked: {}", e)))?;

        if generation.load(Ordering::SeqCst) != started_at {
            return Err(Error::engine_batch_failed("batch cancelled"));
        }

        if hashes.len() != preimages.len() {
            return Err(Error::Engine(EngineError::BatchLengthMismatch {
                sent: preimages.len(),
                received: hashes.len(),
            }));
        }

        Ok(hashes)
    }

    fn kill_workers(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
