//! Failure predictions bound to previously committed sensor data

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sensor::{scale_fixed, ChainState};
use super::CommitmentHash;
use crate::infra::{LedgerError, Result};

/// Fixed-point factor applied to the model probability
pub const CONFIDENCE_SCALE: f64 = 10_000.0;

/// Prediction produced by the external model for one stored sensor record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    pub sensor_record_id: i64,
    /// 0 = no failure, 1 = failure
    pub label: u8,
    pub probability: f64,
    pub model_version: String,
    /// Unix seconds
    pub timestamp: i64,
    pub predictor: Option<String>,
}

impl PredictionInput {
    pub fn validate(&self) -> Result<()> {
        if self.sensor_record_id <= 0 {
            return Err(LedgerError::Validation(
                "sensor_record_id must be positive".into(),
            ));
        }
        if self.label > 1 {
            return Err(LedgerError::Validation(format!(
                "prediction label must be 0 or 1, got {}",
                self.label
            )));
        }
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(LedgerError::Validation(format!(
                "probability must be within [0, 1], got {}",
                self.probability
            )));
        }
        if self.model_version.trim().is_empty() {
            return Err(LedgerError::Validation("model_version is empty".into()));
        }
        if self.timestamp <= 0 {
            return Err(LedgerError::Validation("timestamp must be positive".into()));
        }
        Ok(())
    }

    /// Probability in basis points, as the circuit and contract take it
    pub fn confidence(&self) -> Result<u64> {
        scale_fixed(self.probability, CONFIDENCE_SCALE, "probability")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPredictionRecord {
    pub input: PredictionInput,
    /// Commitment of the referenced sensor record, used to locate it in the mirror
    pub sensor_commitment: Option<CommitmentHash>,
    /// Field encoding of the model version
    pub model_hash: CommitmentHash,
    pub content_hash: CommitmentHash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: i64,
    pub sensor_record_id: i64,
    /// On-chain proof id of the referenced sensor record, once known
    pub data_proof_id: Option<u64>,
    pub label: u8,
    pub probability: f64,
    pub model_version: String,
    pub model_hash: CommitmentHash,
    pub content_hash: CommitmentHash,
    pub predictor: Option<String>,
    pub timestamp: i64,
    pub chain: ChainState,
    pub created_at: DateTime<Utc>,
}
