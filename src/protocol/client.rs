//! Challenge network communication protocol

use crate::core::{Address, Challenge, ChallengeState, Nonce};
use crate::error::{Error, Result};
use crate::protocol::retry::retry_http;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Timeout applied to a single solution submission
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// API client configuration
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Node URL (e.g., "challenge.example.net")
    pub node_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Whether to use TLS
    pub use_tls: bool,
    /// Allow insecure TLS connections (self-signed certificates)
    pub insecure: bool,
}

/// Challenge status wire response
#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    code: String,
    #[serde(default)]
    starts_at: Option<String>,
    #[serde(default)]
    challenge: Option<Challenge>,
}

/// Terms-and-conditions wire response
#[derive(Debug, Deserialize)]
struct TermsResponse {
    message: String,
}

/// Rejection body returned with a 4xx
#[derive(Debug, Deserialize)]
struct RejectBody {
    #[serde(default)]
    message: String,
}

/// Body of an accepted submission
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitReceipt {
    /// Opaque cryptographic receipt, when the network issues one
    #[serde(default)]
    pub crypto_receipt: Option<serde_json::Value>,
}

/// The upstream API surface the orchestrator depends on
///
/// The concrete [`ApiClient`] talks HTTPS; tests script this trait instead.
#[async_trait]
pub trait ChallengeApi: Send + Sync {
    /// Fetch the current challenge state (single attempt; the poller owns
    /// the retry cadence)
    async fn fetch_challenge(&self) -> Result<ChallengeState>;

    /// Fetch the terms message that registration signatures cover
    async fn fetch_terms(&self) -> Result<String>;

    /// Register an address (one-time precondition for mining)
    async fn register(&self, address: &Address, signature: &str) -> Result<()>;

    /// Submit a solution nonce
    ///
    /// Returns the receipt on 2xx. A 4xx maps to
    /// [`SubmissionError::Rejected`](crate::error::SubmissionError::Rejected),
    /// 5xx and transport failures to
    /// [`SubmissionError::Failed`](crate::error::SubmissionError::Failed).
    async fn submit_solution(
        &self,
        address: &str,
        challenge_id: &str,
        nonce: Nonce,
    ) -> Result<SubmitReceipt>;
}

/// HTTP client for the challenge network
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: ApiClientConfig,
    client: Client,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure)
            .build()?;

        info!(
            "Created challenge API client for {} (insecure: {})",
            config.node_url, config.insecure
        );

        Ok(Self { config, client })
    }

    /// Get the base URL for the node
    fn base_url(&self) -> String {
        let scheme = if self.config.use_tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.config.node_url)
    }

    async fn fetch_terms_once(&self) -> Result<String> {
        let url = format!("{}/TandC", self.base_url());

        debug!("Fetching terms from: {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::network_http_error(
                url,
                response.status().as_u16(),
                "terms request failed",
            ));
        }

        let terms = response.json::<TermsResponse>().await?;
        Ok(terms.message)
    }

    async fn register_once(&self, address: &Address, signature: &str) -> Result<()> {
        let url = format!(
            "{}/register/{}/{}/{}",
            self.base_url(),
            address.identifier,
            signature,
            address.public_key_hex()
        );

        debug!("Registering address {} at: {}", address.identifier, url);

        let response = self.client.post(&url).send().await?;

        let status = response.status();
        if status.is_success() {
            info!("Registered address {}", address.identifier);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            // Retriable through the retry policy.
            return Err(Error::network_http_error(url, status.as_u16(), body));
        }
        Err(Error::protocol_registration_failed(
            address.identifier.clone(),
            format!("{}: {}", status, body),
        ))
    }
}

#[async_trait]
impl ChallengeApi for ApiClient {
    async fn fetch_challenge(&self) -> Result<ChallengeState> {
        let url = format!("{}/challenge", self.base_url());

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::network_http_error(
                url,
                response.status().as_u16(),
                "challenge request failed",
            ));
        }

        let body = response.json::<ChallengeResponse>().await?;

        match body.code.as_str() {
            "before" => Ok(ChallengeState::Before {
                starts_at: body.starts_at,
            }),
            "active" => {
                let challenge = body.challenge.ok_or_else(|| {
                    Error::protocol("active challenge response without challenge body")
                })?;
                Ok(ChallengeState::Active(challenge))
            }
            "after" => Ok(ChallengeState::After),
            other => Err(Error::protocol(format!(
                "unknown challenge state code: {}",
                other
            ))),
        }
    }

    async fn fetch_terms(&self) -> Result<String> {
        retry_http(|| self.fetch_terms_once()).await
    }

    async fn register(&self, address: &Address, signature: &str) -> Result<()> {
        retry_http(|| self.register_once(address, signature)).await
    }

    async fn submit_solution(
        &self,
        address: &str,
        challenge_id: &str,
        nonce: Nonce,
    ) -> Result<SubmitReceipt> {
        let url = format!(
            "{}/solution/{}/{}/{}",
            self.base_url(),
            address,
            challenge_id,
            nonce.to_hex()
        );

        debug!("Submitting solution to: {}", url);

        // Single attempt with its own timeout; the submission gate owns the
        // failure policy, so no generic retry wrapper here.
        let response = self
            .client
            .post(&url)
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                Error::submission_failed(address, challenge_id, format!("transport: {}", e))
            })?;

        let status = response.status();
        if status.is_success() {
            let receipt = response.json::<SubmitReceipt>().await.unwrap_or_default();
            info!("Solution accepted for {}/{}", address, challenge_id);
            return Ok(receipt);
        }

        let message = match response.json::<RejectBody>().await {
            Ok(body) if !body.message.is_empty() => body.message,
            _ => status.to_string(),
        };

        if status.is_client_error() {
            Err(Error::submission_rejected(address, challenge_id, message))
        } else {
            Err(Error::submission_failed(
                address,
                challenge_id,
                format!("{}: {}", status, message),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(use_tls: bool) -> ApiClientConfig {
        ApiClientConfig {
            node_url: "challenge.example.net".to_string(),
            timeout: Duration::from_secs(30),
            use_tls,
            insecure: false,
        }
    }

    #[test]
    fn test_base_url() {
        let client = ApiClient::new(test_config(true)).unwrap();
        assert_eq!(client.base_url(), "https://challenge.example.net");

        let client = ApiClient::new(test_config(false)).unwrap();
        assert_eq!(client.base_url(), "http://challenge.example.net");
    }

    #[test]
    fn test_challenge_response_deserialization() {
        let json = r#"{
            "code": "active",
            "challenge": {
                "challenge_id": "ch-0001",
                "difficulty": "0fffffff",
                "no_pre_mine": "a1b2c3d4",
                "no_pre_mine_hour": 7,
                "latest_submission": "00ff00ff"
            }
        }"#;

        let response: ChallengeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.code, "active");
        let challenge = response.challenge.unwrap();
        assert_eq!(challenge.challenge_id, "ch-0001");
        assert_eq!(challenge.difficulty.leading_zero_bits(), 4);
        assert_eq!(challenge.no_pre_mine_hour, 7);
    }

    #[test]
    fn test_before_response_deserialization() {
        let json = r#"{ "code": "before", "starts_at": "2025-01-01T00:00:00Z" }"#;
        let response: ChallengeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.code, "before");
        assert_eq!(response.starts_at.as_deref(), Some("2025-01-01T00:00:00Z"));
        assert!(response.challenge.is_none());
    }

    #[test]
    fn test_submit_receipt_deserialization() {
        let receipt: SubmitReceipt = serde_json::from_str("{}").unwrap();
        assert!(receipt.crypto_receipt.is_none());

        let receipt: SubmitReceipt =
            serde_json::from_str(r#"{ "crypto_receipt": { "sig": "ab" } }"#).unwrap();
        assert!(receipt.crypto_receipt.is_some());
    }
}
