//! Durable receipt and error logs
//!
//! Append-only JSON-lines files. At startup the coordinator replays the
//! receipt log to reconstruct the dedup and solved sets plus the solution
//! counters, so a restart never repeats work the network already accepted.

use crate::error::{Error, Result};
use crate::utils::current_timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// An accepted solution, immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// RFC 3339 acceptance time
    pub timestamp: String,
    /// Solving address
    pub address: String,
    /// Wallet derivation index of the address
    pub address_index: u32,
    /// Challenge the solution was accepted for
    pub challenge_id: String,
    /// Winning nonce, 16 hex chars
    pub nonce: String,
    /// Qualifying hash
    pub hash: String,
    /// Whether this receipt settles dev-fee debt
    pub is_dev_fee: bool,
    /// Opaque network receipt, when issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_receipt: Option<serde_json::Value>,
}

/// A failed or rejected submission, mirror of [`Receipt`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// RFC 3339 failure time
    pub timestamp: String,
    /// Submitting address
    pub address: String,
    /// Wallet derivation index of the address
    pub address_index: u32,
    /// Challenge the submission targeted
    pub challenge_id: String,
    /// Submitted nonce
    pub nonce: String,
    /// Submitted hash
    pub hash: String,
    /// Whether the attempt was a dev-fee submission
    pub is_dev_fee: bool,
    /// Error detail
    pub error: String,
    /// Raw response body, when one was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

impl ErrorRecord {
    /// Build an error record mirroring a would-be receipt
    pub fn from_attempt(
        address: &str,
        address_index: u32,
        challenge_id: &str,
        nonce: &str,
        hash: &str,
        is_dev_fee: bool,
        error: &Error,
    ) -> Self {
        Self {
            timestamp: current_timestamp(),
            address: address.to_string(),
            address_index,
            challenge_id: challenge_id.to_string(),
            nonce: nonce.to_string(),
            hash: hash.to_string(),
            is_dev_fee,
            error: error.to_string(),
            response: None,
        }
    }
}

/// In-memory state reconstructed from the receipt log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayState {
    /// Every hash ever submitted (dedup guard)
    pub submitted_hashes: HashSet<String>,
    /// Map from address to the set of challenge ids it has solved
    pub solved: HashMap<String, HashSet<String>>,
    /// Count of non-dev-fee receipts
    pub user_solutions: u64,
    /// Count of dev-fee receipts
    pub dev_fee_solutions: u64,
}

impl ReplayState {
    /// Fold one receipt into the state
    pub fn absorb(&mut self, receipt: &Receipt) {
        self.submitted_hashes.insert(receipt.hash.clone());
        self.solved
            .entry(receipt.address.clone())
            .or_default()
            .insert(receipt.challenge_id.clone());
        if receipt.is_dev_fee {
            self.dev_fee_solutions += 1;
        } else {
            self.user_solutions += 1;
        }
    }

    /// Whether the given address already solved the given challenge
    pub fn is_solved(&self, address: &str, challenge_id: &str) -> bool {
        self.solved
            .get(address)
            .map(|set| set.contains(challenge_id))
            .unwrap_or(false)
    }
}

/// Append-only store for receipts and error records
pub trait ReceiptStore: Send + Sync {
    /// Append an accepted-solution receipt
    fn append_receipt(&self, receipt: &Receipt) -> Result<()>;

    /// Append a failed-submission record
    fn append_error(&self, record: &ErrorRecord) -> Result<()>;

    /// Replay the receipt log into in-memory state
    ///
    /// Replay is idempotent: replaying the same log twice yields the same
    /// state. A missing log file is an empty history, not an error.
    fn replay(&self) -> Result<ReplayState>;
}

/// JSON-lines file store, one serialized record per line
pub struct JsonlStore {
    receipt_path: PathBuf,
    error_path: PathBuf,
    // Serializes writers so concurrent appends cannot interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlStore {
    /// Create a store over the given log paths
    pub fn new(receipt_path: impl Into<PathBuf>, error_path: impl Into<PathBuf>) -> Self {
        Self {
            receipt_path: receipt_path.into(),
            error_path: error_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn append_line(&self, path: &Path, line: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl ReceiptStore for JsonlStore {
    fn append_receipt(&self, receipt: &Receipt) -> Result<()> {
        let line = serde_json::to_string(receipt)?;
        self.append_line(&self.receipt_path, &line)
    }

    fn append_error(&self, record: &ErrorRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        self.append_line(&self.error_path, &line)
    }

    fn replay(&self) -> Result<ReplayState> {
        let mut state = ReplayState::default();

        let file = match std::fs::File::open(&self.receipt_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(state),
            Err(e) => return Err(e.into()),
        };

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Receipt>(&line) {
                Ok(receipt) => state.absorb(&receipt),
                Err(e) => {
                    warn!(
                        "Skipping malformed receipt at {}:{}: {}",
                        self.receipt_path.display(),
                        line_no + 1,
                        e
                    );
                }
            }
        }

        Ok(state)
    }
}
