//! Ledger submission results and status updates

use serde::{Deserialize, Serialize};

use super::{ChainStatus, CommitmentHash};
use crate::infra::{ErrorCategory, LedgerError};

/// Terminal outcome of one submission attempt.
///
/// A failed result leaves the underlying record retryable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSubmissionResult {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub proof_id: Option<u64>,
    pub gas_used: Option<u64>,
    pub error: Option<String>,
    pub category: Option<ErrorCategory>,
    /// Accepted only after re-encoding the G2 point
    pub alternate_encoding: bool,
}

impl ChainSubmissionResult {
    pub fn confirmed(
        tx_hash: String,
        block_number: Option<u64>,
        proof_id: Option<u64>,
        gas_used: Option<u64>,
    ) -> Self {
        Self {
            success: true,
            tx_hash: Some(tx_hash),
            block_number,
            proof_id,
            gas_used,
            ..Default::default()
        }
    }

    pub fn failed(err: &LedgerError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            category: Some(err.category()),
            ..Default::default()
        }
    }

    pub fn status(&self) -> ChainStatus {
        ChainStatus::from_success(self.success)
    }
}

/// Access levels defined by the on-chain registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AccessLevel {
    NoAccess = 0,
    ReadOnly = 1,
    WriteLimited = 2,
    Admin = 3,
}

impl AccessLevel {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Registry answer for one (account, resource, level) query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
}

/// Resource protected by the access registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessResource {
    SensorData,
    Prediction,
}

/// Fields written back to both stores after an attempt.
///
/// The canonical store is addressed by `record_id`, the mirror by `commitment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatusUpdate {
    pub record_id: i64,
    pub success: bool,
    pub tx_hash: Option<String>,
    pub proof_id: Option<u64>,
    pub block_number: Option<u64>,
    pub commitment: Option<CommitmentHash>,
    pub error: Option<String>,
}

impl ChainStatusUpdate {
    pub fn from_result(
        record_id: i64,
        commitment: Option<CommitmentHash>,
        result: &ChainSubmissionResult,
    ) -> Self {
        Self {
            record_id,
            success: result.success,
            tx_hash: result.tx_hash.clone(),
            proof_id: result.proof_id,
            block_number: result.block_number,
            commitment,
            error: result.error.clone(),
        }
    }

    pub fn status(&self) -> ChainStatus {
        ChainStatus::from_success(self.success)
    }
}

/// End-to-end outcome of a sensor submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSubmissionReport {
    pub record_id: i64,
    pub commitment: CommitmentHash,
    pub status: ChainStatus,
    pub proof_generated: bool,
    pub chain: Option<ChainSubmissionResult>,
}

/// End-to-end outcome of a prediction submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionSubmissionReport {
    pub prediction_id: i64,
    pub content_hash: CommitmentHash,
    pub data_proof_id: Option<u64>,
    pub status: ChainStatus,
    pub proof_generated: bool,
    pub chain: Option<ChainSubmissionResult>,
}

impl PredictionSubmissionReport {
    pub fn success(&self) -> bool {
        self.chain.as_ref().map(|c| c.success).unwrap_or(false)
    }

    pub fn error(&self) -> Option<&str> {
        self.chain.as_ref().and_then(|c| c.error.as_deref())
    }
}
