//! Proof submission to the ledger contract
//!
//! One attempt runs strictly in order: duplicate check, gas-estimation dry
//! run (with at most one alternate-encoding retry), broadcast, confirmation,
//! result write-back. Callers must not run two attempts for the same content
//! hash concurrently.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::call::{GasPolicy, ProofCall};
use super::provisioner::VerifyingKeyProvisioner;
use super::revert::{extract_revert_reason, is_invalid_proof};
use crate::domain::{
    ChainStatusUpdate, ChainSubmissionResult, CircuitId, CommitmentHash, G2Encoding,
};
use crate::infra::{
    CancellationFlag, DualWriteStorage, LedgerClient, LedgerError, Result, StatusReporter,
};
use crate::metrics::{metric_names, timed, LedgerMetrics};

/// Default gas limit for proof submissions
pub const DEFAULT_SUBMISSION_GAS_LIMIT: u64 = 800_000;

#[derive(Debug, Clone, Copy)]
pub struct SubmitterConfig {
    pub sensor_gas_limit: u64,
    pub prediction_gas_limit: u64,
    pub gas: GasPolicy,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            sensor_gas_limit: DEFAULT_SUBMISSION_GAS_LIMIT,
            prediction_gas_limit: DEFAULT_SUBMISSION_GAS_LIMIT,
            gas: GasPolicy::default(),
        }
    }
}

impl SubmitterConfig {
    fn gas_limit(&self, circuit: CircuitId) -> u64 {
        match circuit {
            CircuitId::Sensor => self.sensor_gas_limit,
            CircuitId::Prediction => self.prediction_gas_limit,
        }
    }
}

/// Stored record the outcome is written back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBack {
    /// Canonical id of the sensor or prediction record
    pub record_id: i64,
    /// Sensor commitment addressing the mirror row
    pub commitment: Option<CommitmentHash>,
}

pub struct ChainSubmitter {
    client: Arc<dyn LedgerClient>,
    storage: DualWriteStorage,
    provisioner: Option<Arc<VerifyingKeyProvisioner>>,
    metrics: Arc<LedgerMetrics>,
    config: SubmitterConfig,
}

impl ChainSubmitter {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        storage: DualWriteStorage,
        metrics: Arc<LedgerMetrics>,
        config: SubmitterConfig,
    ) -> Self {
        Self {
            client,
            storage,
            provisioner: None,
            metrics,
            config,
        }
    }

    /// Invalidate the provisioner's readiness cache when a proof is rejected twice
    pub fn with_provisioner(mut self, provisioner: Arc<VerifyingKeyProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Submit `call` and write the outcome back to `target`.
    ///
    /// Never fails: errors are folded into the returned result and the record
    /// is marked failed. A write-back failure is logged.
    pub async fn submit(
        &self,
        call: &ProofCall,
        target: WriteBack,
        status: &StatusReporter,
        cancel: &CancellationFlag,
    ) -> ChainSubmissionResult {
        self.metrics
            .inc_counter(metric_names::SUBMISSIONS_ATTEMPTED)
            .await;

        let result = match self.attempt(call, status, cancel).await {
            Ok(result) => {
                self.metrics
                    .inc_counter(metric_names::SUBMISSIONS_SUCCEEDED)
                    .await;
                info!(
                    circuit = %call.circuit(),
                    record_id = target.record_id,
                    tx_hash = ?result.tx_hash,
                    proof_id = ?result.proof_id,
                    "proof confirmed on-chain"
                );
                status.post(format!(
                    "Confirmed on-chain, proof id {}",
                    result
                        .proof_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "unknown".into())
                ));
                result
            }
            Err(e) => {
                self.metrics
                    .inc_counter(metric_names::SUBMISSIONS_FAILED)
                    .await;
                error!(
                    circuit = %call.circuit(),
                    record_id = target.record_id,
                    category = %e.category(),
                    error = %e,
                    "proof submission failed"
                );
                status.post(format!("Submission failed: {}", e.reason()));
                ChainSubmissionResult::failed(&e)
            }
        };

        self.write_back(call.circuit(), target, &result).await;
        result
    }

    async fn attempt(
        &self,
        call: &ProofCall,
        status: &StatusReporter,
        cancel: &CancellationFlag,
    ) -> Result<ChainSubmissionResult> {
        cancel.check("duplicate check")?;
        if self.client.is_data_hash_used(call.content_hash()).await? {
            self.metrics
                .inc_counter(metric_names::DUPLICATE_REJECTIONS)
                .await;
            return Err(LedgerError::DataHashAlreadyUsed);
        }

        cancel.check("simulation")?;
        status.post("Simulating transaction".to_string());
        let (call, alternate_encoding) = self.simulate(call).await?;

        // fallback when the receipt carries no event
        let simulated_id = match self.client.call_for_proof_id(&call).await {
            Ok(id) if id > 0 => Some(id),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "proof id pre-call failed");
                None
            }
        };

        cancel.check("broadcast")?;
        let params = self
            .config
            .gas
            .params(self.client.as_ref(), self.config.gas_limit(call.circuit()))
            .await?;
        debug!(
            nonce = params.nonce,
            gas_limit = params.gas_limit,
            gas_price = params.gas_price,
            "broadcasting proof"
        );
        status.post(format!("Sending transaction (nonce {})", params.nonce));

        let outcome = timed(
            &self.metrics,
            metric_names::CONFIRMATION_LATENCY,
            self.client.send(&call, params),
        )
        .await?;
        if !outcome.success {
            return Err(LedgerError::TransactionReverted(outcome.tx_hash));
        }

        let mut result = ChainSubmissionResult::confirmed(
            outcome.tx_hash,
            outcome.block_number,
            outcome.proof_id_from_event.or(simulated_id),
            outcome.gas_used,
        );
        result.alternate_encoding = alternate_encoding;
        Ok(result)
    }

    /// Dry-run the call, retrying once with the alternate G2 encoding on an invalid-proof revert.
    ///
    /// `call` carries the toolchain's native encoding. Returns the call that
    /// passed and whether it is the alternate encoding.
    async fn simulate(&self, call: &ProofCall) -> Result<(ProofCall, bool)> {
        let native = G2Encoding::Native;
        let raw = match self.client.estimate_gas(call).await {
            Ok(gas) => {
                debug!(gas, "simulation passed");
                return Ok((call.clone(), false));
            }
            Err(LedgerError::SimulationFailed(raw)) => raw,
            Err(e) => return Err(e),
        };

        let reason = extract_revert_reason(&raw);
        if !is_invalid_proof(&reason) {
            return Err(LedgerError::SimulationFailed(reason));
        }

        let encoding = native.alternate();
        warn!(circuit = %call.circuit(), reason = %reason, ?encoding, "invalid proof, retrying with alternate G2 encoding");
        self.metrics
            .inc_counter(metric_names::SIMULATION_RETRIES)
            .await;

        let alternate = call.with_encoding(encoding);
        let raw = match self.client.estimate_gas(&alternate).await {
            Ok(gas) => {
                info!(gas, ?encoding, "simulation passed with alternate G2 encoding");
                return Ok((alternate, true));
            }
            Err(LedgerError::SimulationFailed(raw)) => raw,
            Err(e) => return Err(e),
        };

        let reason = extract_revert_reason(&raw);
        if let Some(provisioner) = &self.provisioner {
            provisioner.invalidate(call.circuit()).await;
        }
        if is_invalid_proof(&reason) {
            Err(LedgerError::InvalidProof(reason))
        } else {
            Err(LedgerError::SimulationFailed(reason))
        }
    }

    async fn write_back(&self, circuit: CircuitId, target: WriteBack, result: &ChainSubmissionResult) {
        let update = ChainStatusUpdate::from_result(target.record_id, target.commitment, result);
        let written = match circuit {
            CircuitId::Sensor => self.storage.update_chain_status(&update).await,
            CircuitId::Prediction => self.storage.update_prediction_status(&update).await,
        };
        match written {
            Ok(true) => {}
            Ok(false) => warn!(record_id = target.record_id, "no stored record matched the chain result"),
            Err(e) => error!(record_id = target.record_id, error = %e, "chain result write-back failed"),
        }
    }
}
