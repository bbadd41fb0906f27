//! Circom-compatible Poseidon commitments over the BN254 scalar field
//!
//! The circuits recompute these hashes in-circuit with circomlib's `Poseidon(n)`
//! template, so the parameters must be the circom ones: any deviation makes
//! every proof over the commitment unsatisfiable.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonHasher};
use tracing::debug;

use crate::domain::{
    CommitmentHash, Hash256, MaintenanceInput, PredictionInput, ScaledSensorValues, SensorReading,
};
use crate::infra::{LedgerError, Result};

/// Fields absorbed by the sensor commitment
pub const SENSOR_COMMITMENT_ARITY: usize = 6;

/// Fields absorbed by the prediction content hash
pub const PREDICTION_COMMITMENT_ARITY: usize = 5;

/// Fields absorbed by the maintenance task hash
pub const MAINTENANCE_COMMITMENT_ARITY: usize = 4;

/// Deterministic fixed-arity commitment hasher.
///
/// Stateless; a fresh sponge is instantiated per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitmentHasher;

impl CommitmentHasher {
    pub fn new() -> Self {
        Self
    }

    /// Hash field elements with circom parameters for `inputs.len()`
    pub fn hash_fields(&self, inputs: &[Fr]) -> Result<CommitmentHash> {
        let mut sponge = Poseidon::<Fr>::new_circom(inputs.len())
            .map_err(|e| LedgerError::Hash(format!("unsupported arity {}: {}", inputs.len(), e)))?;
        let digest = sponge
            .hash(inputs)
            .map_err(|e| LedgerError::Hash(e.to_string()))?;
        Ok(CommitmentHash(fr_to_bytes(&digest)))
    }

    pub fn hash_u64(&self, inputs: &[u64]) -> Result<CommitmentHash> {
        let fields: Vec<Fr> = inputs.iter().map(|v| Fr::from(*v)).collect();
        self.hash_fields(&fields)
    }

    /// Commitment over the six scaled sensor fields
    pub fn sensor_commitment(&self, scaled: &ScaledSensorValues) -> Result<CommitmentHash> {
        let commitment = self.hash_u64(&scaled.as_array())?;
        debug!(commitment = %commitment, "sensor commitment computed");
        Ok(commitment)
    }

    /// Scale and hash a raw reading
    pub fn commit_reading(&self, reading: &SensorReading) -> Result<CommitmentHash> {
        self.sensor_commitment(&reading.scaled()?)
    }

    /// Content hash of a prediction:
    /// `Poseidon(sensorRecordId, label, confidence, modelHash, timestamp)`
    pub fn prediction_commitment(
        &self,
        input: &PredictionInput,
        model_hash: &CommitmentHash,
    ) -> Result<CommitmentHash> {
        let record_id = u64::try_from(input.sensor_record_id)
            .map_err(|_| LedgerError::Validation("sensor_record_id must be positive".into()))?;
        let timestamp = u64::try_from(input.timestamp)
            .map_err(|_| LedgerError::Validation("timestamp must be positive".into()))?;
        let fields = [
            Fr::from(record_id),
            Fr::from(u64::from(input.label)),
            Fr::from(input.confidence()?),
            hash_to_fr(model_hash),
            Fr::from(timestamp),
        ];
        self.hash_fields(&fields)
    }

    /// Task hash of a maintenance task:
    /// `Poseidon(predictionId, taskType, priority, timestamp)`
    pub fn maintenance_commitment(&self, input: &MaintenanceInput) -> Result<CommitmentHash> {
        let fields: [Fr; MAINTENANCE_COMMITMENT_ARITY] =
            input.commitment_fields()?.map(Fr::from);
        self.hash_fields(&fields)
    }
}

/// Big-endian bytes of a field element, left-padded to 32 bytes
pub fn fr_to_bytes(value: &Fr) -> Hash256 {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    let start = 32usize.saturating_sub(bytes.len());
    out[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(32)..]);
    out
}

/// Interpret a 32-byte big-endian value as a field element, reducing mod p
pub fn hash_to_fr(hash: &CommitmentHash) -> Fr {
    Fr::from_be_bytes_mod_order(hash.as_bytes())
}
