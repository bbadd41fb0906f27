//! Trait definitions for the proof ledger's external seams

use std::path::Path;

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::anchor::{ProofCall, TxOutcome, TxParams};
use crate::domain::{
    AccessDecision, AccessLevel, AccessResource, ChainStatusUpdate, CircuitId, CommitmentHash,
    Hash256, MaintenanceCompletion, MaintenanceRecord, NewMaintenanceRecord,
    NewPredictionRecord, NewSensorRecord, OnChainVerifyingKey, PredictionRecord, SensorRecord,
    StorageStatistics, StoredRecord, VerifyingKey,
};

use super::Result;

/// Persistent store for sensor, prediction and maintenance records.
///
/// Two implementations exist: the canonical store and the display mirror.
/// Both are idempotent on content hash.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Insert a sensor record, or return the existing id for the same commitment
    async fn store_sensor(&self, record: &NewSensorRecord) -> Result<StoredRecord>;

    /// Insert a prediction record, or return the existing id for the same content hash
    async fn store_prediction(&self, record: &NewPredictionRecord) -> Result<StoredRecord>;

    /// Write back the outcome of a sensor submission.
    ///
    /// Only columns present in the live schema are touched. Returns whether a
    /// row matched.
    async fn update_chain_status(&self, update: &ChainStatusUpdate) -> Result<bool>;

    /// Write back the outcome of a prediction submission
    async fn update_prediction_status(&self, update: &ChainStatusUpdate) -> Result<bool>;

    /// Record the sensor proof id a prediction was bound to
    async fn set_prediction_reference(&self, prediction_id: i64, data_proof_id: u64) -> Result<()>;

    async fn sensor_by_id(&self, id: i64) -> Result<Option<SensorRecord>>;

    async fn sensor_by_hash(&self, hash: &CommitmentHash) -> Result<Option<SensorRecord>>;

    async fn prediction_by_id(&self, id: i64) -> Result<Option<PredictionRecord>>;

    /// Newest-first listing, optionally restricted to one machine
    async fn recent_sensors(&self, machine_id: Option<u64>, limit: u32)
        -> Result<Vec<SensorRecord>>;

    async fn statistics(&self) -> Result<StorageStatistics>;

    /// Delete never-confirmed records created before `cutoff`
    async fn purge_unconfirmed(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Insert a maintenance task, or return the existing id for the same task hash
    async fn store_maintenance(&self, record: &NewMaintenanceRecord) -> Result<StoredRecord>;

    /// Close an open task. Returns whether an open task matched.
    async fn complete_maintenance(&self, completion: &MaintenanceCompletion) -> Result<bool>;

    async fn maintenance_by_hash(&self, hash: &CommitmentHash)
        -> Result<Option<MaintenanceRecord>>;

    /// Tasks scheduled against one canonical prediction id, oldest first
    async fn maintenance_for_prediction(&self, prediction_id: i64)
        -> Result<Vec<MaintenanceRecord>>;
}

/// Contract calls the pipeline needs from the ledger.
///
/// Read-only calls never change chain state; `send` and `set_circuit_key`
/// sign and broadcast with the caller-provided transaction parameters.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submitting account
    fn account(&self) -> Address;

    async fn chain_id(&self) -> Result<u64>;

    async fn is_data_hash_used(&self, hash: Hash256) -> Result<bool>;

    /// Resource identifier the access registry uses for `resource`
    async fn access_resource(&self, resource: AccessResource) -> Result<Hash256>;

    async fn check_access(
        &self,
        account: Address,
        resource: Hash256,
        level: AccessLevel,
    ) -> Result<AccessDecision>;

    async fn circuit_key(&self, circuit: CircuitId) -> Result<OnChainVerifyingKey>;

    async fn set_circuit_key(
        &self,
        circuit: CircuitId,
        key: &VerifyingKey,
        params: TxParams,
    ) -> Result<TxOutcome>;

    /// Gas-estimation dry run of the exact call.
    ///
    /// Reverts surface as `LedgerError::SimulationFailed` carrying the raw node message.
    async fn estimate_gas(&self, call: &ProofCall) -> Result<u64>;

    /// Read-only execution returning the proof id the call would be assigned
    async fn call_for_proof_id(&self, call: &ProofCall) -> Result<u64>;

    async fn pending_nonce(&self) -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    /// Sign, broadcast and wait for the receipt
    async fn send(&self, call: &ProofCall, params: TxParams) -> Result<TxOutcome>;
}

/// External proving toolchain (circuit compiler and proof-system CLI)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProofToolchain: Send + Sync {
    /// Verify the binaries can be located
    async fn check_available(&self) -> Result<()>;

    /// Compile `source` into `out_dir` (constraint system + witness generator)
    async fn compile(&self, source: &Path, out_dir: &Path) -> Result<()>;

    /// Derive the proving key from the constraint system and reference string
    async fn setup(&self, r1cs: &Path, ptau: &Path, zkey: &Path) -> Result<()>;

    async fn witness(&self, wasm: &Path, input: &Path, witness: &Path) -> Result<()>;

    async fn prove(&self, zkey: &Path, witness: &Path, proof: &Path, public: &Path)
        -> Result<()>;

    async fn export_verifying_key(&self, zkey: &Path, out: &Path) -> Result<()>;
}

/// Source of the locally derived verifying key for one circuit
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VerifyingKeySource: Send + Sync {
    fn circuit(&self) -> CircuitId;

    async fn local_verifying_key(&self) -> Result<VerifyingKey>;
}

/// Individual component health
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ComponentHealth {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl ComponentHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ComponentHealth::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, ComponentHealth::Unhealthy { .. })
    }

    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ComponentHealth::Healthy,
            Err(e) => ComponentHealth::Unhealthy {
                reason: e.to_string(),
            },
        }
    }
}
