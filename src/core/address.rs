//! Wallet address and worker identity types

use serde::{Deserialize, Serialize};
use std::fmt;

/// A derived wallet identity that can mine and submit solutions
///
/// Addresses are produced by the external wallet store; the orchestrator
/// only sees ready, signing-capable identities. Identity is `identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Derivation index within the wallet
    pub index: u32,
    /// Network-facing address string
    pub identifier: String,
    /// Raw public key bytes
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    /// Whether the address has completed one-time registration
    #[serde(default)]
    pub registered: bool,
}

impl Address {
    /// Public key rendered as lowercase hex (registration wire form)
    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier)
    }
}

/// An address together with its detached registration signature
///
/// Signing happens in the wallet store; the orchestrator only forwards the
/// signature to the registration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletAddress {
    /// The address itself
    #[serde(flatten)]
    pub address: Address,
    /// Signature over the network's terms message
    pub signature: String,
}

/// Identity of a worker within a cohort, in `[0, worker_threads)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl WorkerId {
    /// Create a new worker id
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    /// Get the inner value
    pub const fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
