//! Error types for the proof ledger

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure classes surfaced to callers.
///
/// Every [`LedgerError`] maps onto exactly one category; the category decides
/// whether a caller should fix configuration, fix the input, or try again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Missing binary, key material or contract; operator action required
    #[serde(rename = "configuration_error")]
    Configuration,
    /// Malformed input or content already committed; fatal for this submission
    #[serde(rename = "validation_error")]
    Validation,
    /// RPC timeout, nonce contention; the whole submission may be retried later
    #[serde(rename = "transient_chain_error")]
    TransientChain,
    /// Invalid-proof revert during simulation
    #[serde(rename = "proof_shape_ambiguity")]
    ProofShapeAmbiguity,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration_error",
            ErrorCategory::Validation => "validation_error",
            ErrorCategory::TransientChain => "transient_chain_error",
            ErrorCategory::ProofShapeAmbiguity => "proof_shape_ambiguity",
        }
    }

    /// Whether the caller may retry the whole submission later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::TransientChain | ErrorCategory::ProofShapeAmbiguity
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur anywhere in the ledger pipeline
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error around circuit artifacts
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// External toolchain binary could not be located
    #[error("missing binary: {0}")]
    MissingBinary(String),

    /// Reference string, proving key or verifying key is absent
    #[error("missing key material: {0}")]
    MissingKeyMaterial(String),

    /// Input rejected before any work was done
    #[error("validation error: {0}")]
    Validation(String),

    /// Commitment hash evaluation failed
    #[error("hash evaluation failed: {0}")]
    Hash(String),

    /// Toolchain output could not be parsed
    #[error("malformed artifact: {0}")]
    MalformedArtifact(String),

    /// A toolchain stage exited unsuccessfully
    #[error("{stage} failed: {message}")]
    StageFailed { stage: String, message: String },

    /// A toolchain stage exceeded its wall-clock budget
    #[error("{stage} timed out after {seconds}s")]
    StageTimeout { stage: String, seconds: u64 },

    /// Content hash is already marked used on-chain
    #[error("data_hash_already_used")]
    DataHashAlreadyUsed,

    /// Prediction references a sensor record that has no confirmed proof id
    #[error("missing_data_proof_id_onchain")]
    MissingDataProofId,

    /// Access registry denied the submitting account
    #[error("access_denied: {0}")]
    AccessDenied(String),

    /// On-chain verifying key could not be brought in line with the local key
    #[error("verifier_key_not_configured: {0}")]
    VerifierKeyNotConfigured(String),

    /// Simulation reverted with an invalid-proof reason
    #[error("simulation_failed: {0}")]
    InvalidProof(String),

    /// Simulation reverted for any other reason
    #[error("simulation_failed: {0}")]
    SimulationFailed(String),

    /// Transaction was mined with a failure status
    #[error("transaction_reverted: {0}")]
    TransactionReverted(String),

    /// No receipt within the configured wait
    #[error("confirmation timeout: {0}")]
    ConfirmationTimeout(String),

    /// RPC transport or node error
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Node reports a different chain than configured
    #[error("chain id mismatch: expected {expected}, node reports {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    /// Record lookup miss
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation stopped before starting the next stage
    #[error("cancelled before {0}")]
    Cancelled(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::Configuration(_)
            | LedgerError::MissingBinary(_)
            | LedgerError::MissingKeyMaterial(_)
            | LedgerError::MalformedArtifact(_)
            | LedgerError::VerifierKeyNotConfigured(_)
            | LedgerError::ChainIdMismatch { .. }
            | LedgerError::Io(_)
            | LedgerError::Serialization(_) => ErrorCategory::Configuration,

            LedgerError::Validation(_)
            | LedgerError::Hash(_)
            | LedgerError::StageFailed { .. }
            | LedgerError::DataHashAlreadyUsed
            | LedgerError::MissingDataProofId
            | LedgerError::AccessDenied(_)
            | LedgerError::NotFound(_) => ErrorCategory::Validation,

            LedgerError::InvalidProof(_) => ErrorCategory::ProofShapeAmbiguity,

            LedgerError::Database(_)
            | LedgerError::StageTimeout { .. }
            | LedgerError::SimulationFailed(_)
            | LedgerError::TransactionReverted(_)
            | LedgerError::ConfirmationTimeout(_)
            | LedgerError::Rpc(_)
            | LedgerError::Cancelled(_)
            | LedgerError::Internal(_) => ErrorCategory::TransientChain,
        }
    }

    /// Human-readable reason without the machine-readable prefix.
    pub fn reason(&self) -> String {
        match self {
            LedgerError::InvalidProof(reason)
            | LedgerError::SimulationFailed(reason)
            | LedgerError::AccessDenied(reason)
            | LedgerError::Validation(reason)
            | LedgerError::Configuration(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;
