//! Upstream challenge network protocol
//!
//! HTTP client for the challenge/registration/solution endpoints and the
//! retry policy shared by the idempotent calls.

pub mod client;
pub mod retry;

pub use client::{ApiClient, ApiClientConfig, ChallengeApi, SubmitReceipt};
pub use retry::{retry_http, RetryPolicy};
