//! Error types for the gateway

use ethers::types::Address;
use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("No signer configured")]
    NoSigner,

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Contract {address} was never loaded")]
    ContractNotLoaded { address: Address },

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Submission error for action {action_id}: {message}")]
    Submission { action_id: String, message: String },

    #[error("Submission timed out after {timeout_ms}ms for action {action_id}")]
    SubmitTimeout { action_id: String, timeout_ms: u64 },

    #[error("Receipt error: {0}")]
    Receipt(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Provider(_) | GatewayError::Timeout { .. } | GatewayError::Receipt(_)
        )
    }

    /// Check if the error terminates a submission attempt
    pub fn is_submission_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::Submission { .. } | GatewayError::SubmitTimeout { .. }
        )
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
