//! Exact contract calls and transaction parameters

use std::time::Duration;

use alloy::primitives::U256;

use crate::crypto::{model_commitment, storage_tag};
use crate::domain::{
    storage_location_for, CircuitId, CommitmentHash, G2Encoding,
    Groth16Proof, Hash256, ProofArtifact,
};
use crate::infra::{LedgerClient, LedgerError, Result};

/// Arguments of `submitSensorDataProof`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorProofCall {
    pub machine_id: u64,
    pub data_hash: Hash256,
    /// Third public input of the proof
    pub commitment_hash: Hash256,
    pub storage_tag: Hash256,
    pub sensor_count: u64,
    pub proof: Groth16Proof,
    pub public_inputs: Vec<U256>,
}

/// Arguments of `submitPredictionProof`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionProofCall {
    pub data_proof_id: u64,
    pub prediction_hash: Hash256,
    pub model_commitment: Hash256,
    pub prediction: u8,
    pub confidence: u64,
    pub proof: Groth16Proof,
    pub public_inputs: Vec<U256>,
}

/// One state-changing proof submission, simulated and sent verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofCall {
    Sensor(SensorProofCall),
    Prediction(PredictionProofCall),
}

impl ProofCall {
    /// Sensor submission for the stored record `record_id`
    pub fn sensor(
        record_id: i64,
        machine_id: u64,
        data_hash: &CommitmentHash,
        artifact: &ProofArtifact,
    ) -> Result<Self> {
        let commitment_hash = artifact.data_commitment().ok_or_else(|| {
            LedgerError::MalformedArtifact("sensor proof has no data commitment input".into())
        })?;
        Ok(ProofCall::Sensor(SensorProofCall {
            machine_id,
            data_hash: *data_hash.as_bytes(),
            commitment_hash,
            storage_tag: storage_tag(&storage_location_for(record_id)),
            sensor_count: 1,
            proof: artifact.proof,
            public_inputs: artifact.public_inputs.clone(),
        }))
    }

    /// Prediction submission bound to a confirmed sensor proof
    pub fn prediction(
        data_proof_id: u64,
        prediction_hash: &CommitmentHash,
        model_version: &str,
        label: u8,
        confidence: u64,
        artifact: &ProofArtifact,
    ) -> Self {
        ProofCall::Prediction(PredictionProofCall {
            data_proof_id,
            prediction_hash: *prediction_hash.as_bytes(),
            model_commitment: model_commitment(model_version),
            prediction: label,
            confidence,
            proof: artifact.proof,
            public_inputs: artifact.public_inputs.clone(),
        })
    }

    pub fn circuit(&self) -> CircuitId {
        match self {
            ProofCall::Sensor(_) => CircuitId::Sensor,
            ProofCall::Prediction(_) => CircuitId::Prediction,
        }
    }

    /// Content hash the ledger marks as used
    pub fn content_hash(&self) -> Hash256 {
        match self {
            ProofCall::Sensor(call) => call.data_hash,
            ProofCall::Prediction(call) => call.prediction_hash,
        }
    }

    pub fn proof(&self) -> &Groth16Proof {
        match self {
            ProofCall::Sensor(call) => &call.proof,
            ProofCall::Prediction(call) => &call.proof,
        }
    }

    fn proof_mut(&mut self) -> &mut Groth16Proof {
        match self {
            ProofCall::Sensor(call) => &mut call.proof,
            ProofCall::Prediction(call) => &mut call.proof,
        }
    }

    /// Same call with the G2 point re-encoded
    pub fn with_encoding(&self, encoding: G2Encoding) -> Self {
        let mut call = self.clone();
        let proof = call.proof_mut();
        proof.b = encoding.apply(&proof.b);
        call
    }
}

/// Transaction parameters fixed at send time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxParams {
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub confirmation_timeout: Duration,
}

/// Mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxOutcome {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    /// Receipt status
    pub success: bool,
    /// Proof id decoded from the submission event, when present
    pub proof_id_from_event: Option<u64>,
}

/// Gas price floor and confirmation wait shared by every state-changing call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    pub gas_price_floor_wei: u128,
    pub confirmation_timeout: Duration,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            gas_price_floor_wei: gwei_to_wei(0.25),
            confirmation_timeout: Duration::from_secs(120),
        }
    }
}

impl GasPolicy {
    /// Read the pending nonce and node gas price now, clamping the price to the floor
    pub async fn params(&self, client: &dyn LedgerClient, gas_limit: u64) -> Result<TxParams> {
        let nonce = client.pending_nonce().await?;
        let node_price = client.gas_price().await?;
        Ok(TxParams {
            nonce,
            gas_limit,
            gas_price: node_price.max(self.gas_price_floor_wei),
            confirmation_timeout: self.confirmation_timeout,
        })
    }
}

pub fn gwei_to_wei(gwei: f64) -> u128 {
    (gwei * 1e9).round().max(0.0) as u128
}
