//! Dev-fee address pool
//!
//! The pool is pre-warmed from an external source at start and drawn from
//! round-robin. When a drawn address has already solved the current
//! challenge, the coordinator asks for a fresh one; a second collision
//! skips the unit so user mining is never blocked.

use crate::core::Address;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Number of addresses pre-warmed into the pool at start
pub const DEV_FEE_POOL_PREWARM: usize = 10;

/// External source of dev-fee addresses, one candidate per call
#[async_trait]
pub trait DevFeeSource: Send + Sync {
    /// Fetch the next candidate dev-fee address
    async fn next_address(&self) -> Result<Address>;
}

/// Round-robin source over a fixed address list
pub struct StaticDevFeeSource {
    addresses: Vec<Address>,
    cursor: AtomicUsize,
}

impl StaticDevFeeSource {
    /// Create a source cycling the given addresses
    pub fn new(addresses: Vec<Address>) -> Self {
        Self {
            addresses,
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DevFeeSource for StaticDevFeeSource {
    async fn next_address(&self) -> Result<Address> {
        if self.addresses.is_empty() {
            return Err(crate::error::Error::other(
                "dev-fee",
                "no dev-fee addresses configured",
            ));
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.addresses.len();
        Ok(self.addresses[index].clone())
    }
}

/// Pre-warmed round-robin pool over a [`DevFeeSource`]
pub struct DevFeePool {
    source: Arc<dyn DevFeeSource>,
    queue: Mutex<VecDeque<Address>>,
}

impl DevFeePool {
    /// Create an empty pool over the given source
    pub fn new(source: Arc<dyn DevFeeSource>) -> Self {
        Self {
            source,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Fill the pool with up to `count` addresses; fetch failures are
    /// logged and skipped
    pub async fn prewarm(&self, count: usize) {
        for _ in 0..count {
            match self.source.next_address().await {
                Ok(address) => self.queue.lock().push_back(address),
                Err(e) => warn!("Dev-fee pool prewarm fetch failed: {}", e),
            }
        }
    }

    /// Draw the next address round-robin, if the pool has any
    pub fn draw(&self) -> Option<Address> {
        let mut queue = self.queue.lock();
        let address = queue.pop_front()?;
        queue.push_back(address.clone());
        Some(address)
    }

    /// Request a fresh address from the refill source and add it to the pool
    pub async fn refill(&self) -> Result<Address> {
        let address = self.source.next_address().await?;
        self.queue.lock().push_back(address.clone());
        Ok(address)
    }

    /// Number of addresses currently pooled
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
