//! Error types for the mining client
//!
//! This module provides the error handling system using `thiserror`
//! for automatic error trait implementations with granular error categorization.

use std::time::Duration;
use thiserror::Error;

/// Configuration error subtypes
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} (expected: {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Parse error in {file}: {message}")]
    ParseError { file: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationError { message: String },
}

/// Network error subtypes with connection context
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum NetworkError {
    #[error("Connection failed to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Request timeout after {timeout:?} to {url}")]
    Timeout { url: String, timeout: Duration },

    #[error("HTTP error {status} from {url}: {message}")]
    HttpError {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Network unreachable: {message}")]
    NetworkUnreachable { message: String },
}

/// Protocol error subtypes for the upstream challenge API
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ProtocolError {
    #[error("Invalid message format: {message}")]
    InvalidFormat { message: String },

    #[error("Response parse error: {field} - {message}")]
    ResponseParseError { field: String, message: String },

    #[error("Registration failed for {address}: {reason}")]
    RegistrationFailed { address: String, reason: String },

    #[error("Challenge endpoint not available: {endpoint}")]
    EndpointUnavailable { endpoint: String },
}

/// Hash engine error subtypes
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum EngineError {
    #[error("ROM initialization timed out after {timeout:?}")]
    RomInitTimeout { timeout: Duration },

    #[error("ROM not ready for challenge {challenge_id}")]
    RomNotReady { challenge_id: String },

    #[error("Hash batch timed out: {reason}")]
    BatchTimeout { reason: String },

    #[error("Hash batch failed: {reason}")]
    BatchFailed { reason: String },

    #[error("Batch length mismatch: sent {sent} preimages, received {received} hashes")]
    BatchLengthMismatch { sent: usize, received: usize },
}

/// Submission error subtypes
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum SubmissionError {
    #[error("Solution rejected for {address}/{challenge_id}: {message}")]
    Rejected {
        address: String,
        challenge_id: String,
        message: String,
    },

    #[error("Submission failed for {address}/{challenge_id}: {message}")]
    Failed {
        address: String,
        challenge_id: String,
        message: String,
    },

    #[error("Submission failure cap reached for {address}/{challenge_id}: {failures}")]
    CapReached {
        address: String,
        challenge_id: String,
        failures: u32,
    },
}

/// Data validation error subtypes
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ValidationError {
    #[error("Invalid difficulty: {value} - {reason}")]
    InvalidDifficulty { value: String, reason: String },

    #[error("Invalid hash: {hash} - {reason}")]
    InvalidHash { hash: String, reason: String },

    #[error("Invalid nonce: {nonce} - {reason}")]
    InvalidNonce { nonce: String, reason: String },

    #[error("Range validation failed: {field} - value {value} outside range [{min}, {max}]")]
    RangeValidation {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },
}

/// Main error type for the mining client with granular error hierarchy
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Configuration errors with detailed context
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Network errors with connection details
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol errors for the upstream challenge API
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Hash engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Submission gate errors
    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors (kept for automatic conversion)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Timeout errors with context
    #[error("Operation timed out after {timeout:?}: {operation}")]
    Timeout { operation: String, timeout: Duration },

    /// Generic errors with context
    #[error("Error in {context}: {message}")]
    Other { context: String, message: String },
}

/// Result type alias for the mining client
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a missing field configuration error
    pub fn config_missing_field(field: impl Into<String>) -> Self {
        Self::Config(ConfigError::MissingField {
            field: field.into(),
        })
    }

    /// Create an invalid value configuration error
    pub fn config_invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::Config(ConfigError::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        })
    }

    /// Create a parse error configuration error
    pub fn config_parse_error(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config(ConfigError::ParseError {
            file: file.into(),
            message: message.into(),
        })
    }

    /// Create a generic configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::ValidationError {
            message: msg.into(),
        })
    }

    /// Create a timeout network error
    pub fn network_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        Self::Network(NetworkError::Timeout {
            url: url.into(),
            timeout,
        })
    }

    /// Create an HTTP error with detailed context
    pub fn network_http_error(
        url: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::Network(NetworkError::HttpError {
            url: url.into(),
            status,
            message: message.into(),
        })
    }

    /// Create a generic network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(NetworkError::NetworkUnreachable {
            message: msg.into(),
        })
    }

    /// Create an invalid format protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::InvalidFormat {
            message: msg.into(),
        })
    }

    /// Create a registration failed protocol error
    pub fn protocol_registration_failed(
        address: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Protocol(ProtocolError::RegistrationFailed {
            address: address.into(),
            reason: reason.into(),
        })
    }

    /// Create a retriable hash batch timeout error
    pub fn engine_batch_timeout(reason: impl Into<String>) -> Self {
        Self::Engine(EngineError::BatchTimeout {
            reason: reason.into(),
        })
    }

    /// Create a non-retriable hash batch error
    pub fn engine_batch_failed(reason: impl Into<String>) -> Self {
        Self::Engine(EngineError::BatchFailed {
            reason: reason.into(),
        })
    }

    /// Create a solution rejected submission error (4xx)
    pub fn submission_rejected(
        address: impl Into<String>,
        challenge_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Submission(SubmissionError::Rejected {
            address: address.into(),
            challenge_id: challenge_id.into(),
            message: message.into(),
        })
    }

    /// Create a retriable submission failure error (5xx / transport)
    pub fn submission_failed(
        address: impl Into<String>,
        challenge_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Submission(SubmissionError::Failed {
            address: address.into(),
            challenge_id: challenge_id.into(),
            message: message.into(),
        })
    }

    /// Create an invalid difficulty validation error
    pub fn validation_invalid_difficulty(
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation(ValidationError::InvalidDifficulty {
            value: value.into(),
            reason: reason.into(),
        })
    }

    /// Create an invalid hash validation error
    pub fn validation_invalid_hash(hash: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation(ValidationError::InvalidHash {
            hash: hash.into(),
            reason: reason.into(),
        })
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a generic error
    pub fn other(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::Engine(EngineError::BatchTimeout { .. })
                | Error::Submission(SubmissionError::Failed { .. })
                | Error::Timeout { .. }
        )
    }

    /// Check if this error should trigger a retry
    pub fn should_retry(&self) -> bool {
        match self {
            Error::Network(NetworkError::Timeout { .. })
            | Error::Network(NetworkError::ConnectionFailed { .. })
            | Error::Network(NetworkError::NetworkUnreachable { .. })
            | Error::Engine(EngineError::BatchTimeout { .. })
            | Error::Submission(SubmissionError::Failed { .. })
            | Error::Timeout { .. } => true,
            Error::Network(NetworkError::HttpError { status, .. }) => *status >= 500,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Get the error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration",
            Error::Network(_) => "network",
            Error::Protocol(_) => "protocol",
            Error::Engine(_) => "engine",
            Error::Submission(_) => "submission",
            Error::Validation(_) => "validation",
            Error::Json(_) | Error::Yaml(_) => "serialization",
            Error::Io(_) => "io",
            Error::Http(_) => "http",
            Error::Timeout { .. } => "timeout",
            Error::Other { .. } => "other",
        }
    }
}
