//! End-to-end sensor, prediction and maintenance flows
//!
//! `HybridLedgerService` is constructed once and owns every component:
//! hasher, dual-write storage, one proof pipeline per circuit and, when a
//! ledger is configured, the provisioner, access gate and submitter.
//! Without a ledger the service runs local-only: records are stored and
//! proven, and stay `local_only`.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::anchor::{
    AccessControlGate, AlloyLedgerClient, ChainSubmitter, ProofCall, SubmitterConfig,
    VerifyingKeyProvisioner, WriteBack,
};
use crate::config::LedgerConfig;
use crate::crypto::{string_to_field, CommitmentHasher};
use crate::domain::{
    AccessResource, ChainStatus, ChainStatusUpdate, ChainSubmissionResult, CircuitId,
    CommitmentHash, MaintenanceCompletion, MaintenanceInput, MaintenanceRecord,
    MaintenanceReport, NewMaintenanceRecord, NewPredictionRecord, NewSensorRecord,
    PredictionInput, PredictionSubmissionReport, ProofArtifact, SensorReading, SensorRecord,
    SensorSubmissionReport, StorageStatistics,
};
use crate::infra::{
    CancellationFlag, ComponentHealth, DualWriteStorage, LedgerClient, LedgerError, RecordStore,
    Result, SqliteCanonicalStore, SqliteDisplayStore, StatusReporter,
};
use crate::metrics::{metric_names, timed, LedgerMetrics};
use crate::proof::{prediction_inputs, sensor_inputs, ProofPipeline, SnarkjsToolchain};

/// Ledger-side components, present only when a ledger is configured
struct ChainComponents {
    client: Arc<dyn LedgerClient>,
    provisioner: Arc<VerifyingKeyProvisioner>,
    gate: AccessControlGate,
    submitter: ChainSubmitter,
}

/// Sensor record lookup key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorLookup {
    Id(i64),
    Hash(CommitmentHash),
}

/// Result of recomputing a stored record's commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub record_id: i64,
    pub stored: CommitmentHash,
    pub recomputed: CommitmentHash,
    pub expected: Option<CommitmentHash>,
    /// Recomputed equals stored, and equals expected when one was given
    pub intact: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub storage: ComponentHealth,
    pub mirror: Option<bool>,
    pub toolchain: ComponentHealth,
    pub reference_string: ComponentHealth,
    pub chain: ComponentHealth,
    pub verifying_keys: Vec<(CircuitId, ComponentHealth)>,
}

impl DiagnosticReport {
    pub fn is_healthy(&self) -> bool {
        !self.storage.is_unhealthy()
            && !self.toolchain.is_unhealthy()
            && !self.reference_string.is_unhealthy()
            && !self.chain.is_unhealthy()
            && self.verifying_keys.iter().all(|(_, h)| !h.is_unhealthy())
    }
}

pub struct HybridLedgerService {
    hasher: CommitmentHasher,
    storage: DualWriteStorage,
    sensor_pipeline: Arc<ProofPipeline>,
    prediction_pipeline: Arc<ProofPipeline>,
    chain: Option<ChainComponents>,
    metrics: Arc<LedgerMetrics>,
}

impl HybridLedgerService {
    /// Local-only service over the given storage and pipelines
    pub fn new(
        storage: DualWriteStorage,
        sensor_pipeline: Arc<ProofPipeline>,
        prediction_pipeline: Arc<ProofPipeline>,
        metrics: Arc<LedgerMetrics>,
    ) -> Self {
        Self {
            hasher: CommitmentHasher::new(),
            storage,
            sensor_pipeline,
            prediction_pipeline,
            chain: None,
            metrics,
        }
    }

    /// Attach a ledger; the pipelines become the verifying-key sources
    pub fn with_chain(
        mut self,
        client: Arc<dyn LedgerClient>,
        submitter: SubmitterConfig,
        vk_gas_limit: u64,
    ) -> Self {
        let provisioner = Arc::new(
            VerifyingKeyProvisioner::new(client.clone(), submitter.gas, vk_gas_limit)
                .with_source(self.sensor_pipeline.clone())
                .with_source(self.prediction_pipeline.clone()),
        );
        let gate = AccessControlGate::new(client.clone());
        let submitter = ChainSubmitter::new(
            client.clone(),
            self.storage.clone(),
            self.metrics.clone(),
            submitter,
        )
        .with_provisioner(provisioner.clone());

        self.chain = Some(ChainComponents {
            client,
            provisioner,
            gate,
            submitter,
        });
        self
    }

    /// Open stores, build pipelines and connect to the ledger per `config`
    pub async fn from_config(config: &LedgerConfig) -> Result<Self> {
        let canonical = SqliteCanonicalStore::from_path(&path_str(&config.canonical_db)?).await?;
        canonical.initialize().await?;

        let mirror: Option<Arc<dyn RecordStore>> = match &config.display_db {
            Some(path) => match open_display(path).await {
                Ok(store) => Some(Arc::new(store) as Arc<dyn RecordStore>),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "display mirror unavailable");
                    None
                }
            },
            None => None,
        };
        let storage = DualWriteStorage::new(Arc::new(canonical), mirror);

        let toolchain = Arc::new(SnarkjsToolchain::new(config.toolchain.clone()));
        let sensor_pipeline = Arc::new(ProofPipeline::new(
            CircuitId::Sensor,
            config.pipeline(),
            toolchain.clone(),
        ));
        let prediction_pipeline = Arc::new(ProofPipeline::new(
            CircuitId::Prediction,
            config.pipeline(),
            toolchain,
        ));

        let service = Self::new(
            storage,
            sensor_pipeline,
            prediction_pipeline,
            Arc::new(LedgerMetrics::new()),
        );
        match &config.anchor {
            Some(anchor) => {
                let client = AlloyLedgerClient::connect(anchor.clone()).await?;
                Ok(service.with_chain(Arc::new(client), config.submitter, config.vk_gas_limit))
            }
            None => {
                info!("no ledger configured; running local-only");
                Ok(service)
            }
        }
    }

    pub fn storage(&self) -> &DualWriteStorage {
        &self.storage
    }

    pub fn metrics(&self) -> &Arc<LedgerMetrics> {
        &self.metrics
    }

    pub fn chain_enabled(&self) -> bool {
        self.chain.is_some()
    }

    /// Validate, commit, store, prove and (with a ledger) submit one sensor reading.
    ///
    /// Errors are returned only when nothing was stored. Once the record exists,
    /// later failures are reported in the returned report and recorded on the row.
    #[instrument(skip_all, fields(machine_id = reading.machine_id))]
    pub async fn submit_sensor(
        &self,
        reading: &SensorReading,
        status: &StatusReporter,
        cancel: &CancellationFlag,
    ) -> Result<SensorSubmissionReport> {
        let scaled = reading.validate()?;
        let commitment = self.hasher.sensor_commitment(&scaled)?;
        status.post(format!("Commitment {}", commitment));

        let stored = self
            .storage
            .store_sensor(&NewSensorRecord {
                reading: reading.clone(),
                commitment,
                submitter: self.chain.as_ref().map(|c| c.client.account().to_string()),
            })
            .await?;

        if !stored.created {
            if let Some(existing) = self.storage.sensor_by_id(stored.id).await? {
                if existing.chain.confirmed_proof_id().is_some() {
                    info!(record_id = stored.id, "sensor record already confirmed on-chain");
                    return Ok(SensorSubmissionReport {
                        record_id: stored.id,
                        commitment,
                        status: ChainStatus::OnchainSuccess,
                        proof_generated: false,
                        chain: Some(ChainSubmissionResult::confirmed(
                            existing.chain.tx_hash.unwrap_or_default(),
                            existing.chain.block_number,
                            existing.chain.proof_id,
                            None,
                        )),
                    });
                }
            }
        }

        let target = WriteBack {
            record_id: stored.id,
            commitment: Some(commitment),
        };
        let artifact = match self.prove_sensor(reading, &commitment, status, cancel).await {
            Ok(artifact) => artifact,
            Err(e) => {
                let chain = self.fail(CircuitId::Sensor, target, &e).await;
                return Ok(SensorSubmissionReport {
                    record_id: stored.id,
                    commitment,
                    status: chain.as_ref().map(|c| c.status()).unwrap_or(ChainStatus::LocalOnly),
                    proof_generated: false,
                    chain: chain.or_else(|| Some(ChainSubmissionResult::failed(&e))),
                });
            }
        };

        let Some(chain) = &self.chain else {
            return Ok(SensorSubmissionReport {
                record_id: stored.id,
                commitment,
                status: ChainStatus::LocalOnly,
                proof_generated: true,
                chain: None,
            });
        };

        let result = match self
            .prepare_submission(chain, CircuitId::Sensor, AccessResource::SensorData, cancel)
            .await
            .and_then(|_| ProofCall::sensor(stored.id, reading.machine_id, &commitment, &artifact))
        {
            Ok(call) => chain.submitter.submit(&call, target, status, cancel).await,
            Err(e) => self.record_failure(target, CircuitId::Sensor, &e).await,
        };

        Ok(SensorSubmissionReport {
            record_id: stored.id,
            commitment,
            status: result.status(),
            proof_generated: true,
            chain: Some(result),
        })
    }

    /// Store a prediction, bind it to its confirmed sensor proof, prove and submit it
    #[instrument(skip_all, fields(sensor_record_id = input.sensor_record_id))]
    pub async fn submit_prediction(
        &self,
        input: &PredictionInput,
        status: &StatusReporter,
        cancel: &CancellationFlag,
    ) -> Result<PredictionSubmissionReport> {
        input.validate()?;
        let sensor = self
            .storage
            .sensor_by_id(input.sensor_record_id)
            .await?
            .ok_or_else(|| {
                LedgerError::NotFound(format!("sensor record {}", input.sensor_record_id))
            })?;

        let model_hash = string_to_field(&input.model_version);
        let content_hash = self.hasher.prediction_commitment(input, &model_hash)?;
        let stored = self
            .storage
            .store_prediction(&NewPredictionRecord {
                input: input.clone(),
                sensor_commitment: Some(sensor.commitment),
                model_hash,
                content_hash,
            })
            .await?;

        let target = WriteBack {
            record_id: stored.id,
            commitment: Some(sensor.commitment),
        };
        let report = |data_proof_id, proof_generated, chain: Option<ChainSubmissionResult>| {
            PredictionSubmissionReport {
                prediction_id: stored.id,
                content_hash,
                data_proof_id,
                status: chain.as_ref().map(|c| c.status()).unwrap_or(ChainStatus::LocalOnly),
                proof_generated,
                chain,
            }
        };

        if !stored.created {
            if let Some(existing) = self.storage.prediction_by_id(stored.id).await? {
                if existing.chain.confirmed_proof_id().is_some() {
                    info!(prediction_id = stored.id, "prediction already confirmed on-chain");
                    return Ok(report(
                        existing.data_proof_id,
                        false,
                        Some(ChainSubmissionResult::confirmed(
                            existing.chain.tx_hash.unwrap_or_default(),
                            existing.chain.block_number,
                            existing.chain.proof_id,
                            None,
                        )),
                    ));
                }
            }
        }

        let Some(data_proof_id) = self
            .storage
            .confirmed_sensor_proof_id(input.sensor_record_id)
            .await?
        else {
            let err = LedgerError::MissingDataProofId;
            warn!(prediction_id = stored.id, "referenced sensor record has no confirmed proof id");
            status.post("Sensor data is not confirmed on-chain yet".to_string());
            let result = self.record_failure(target, CircuitId::Prediction, &err).await;
            return Ok(report(None, false, Some(result)));
        };
        self.storage
            .set_prediction_reference(stored.id, data_proof_id)
            .await?;

        let artifact = match self
            .prove_prediction(input, data_proof_id, status, cancel)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                let chain = self.fail(CircuitId::Prediction, target, &e).await;
                return Ok(report(
                    Some(data_proof_id),
                    false,
                    chain.or_else(|| Some(ChainSubmissionResult::failed(&e))),
                ));
            }
        };

        let Some(chain) = &self.chain else {
            return Ok(report(Some(data_proof_id), true, None));
        };

        let confidence = input.confidence()?;
        let result = match self
            .prepare_submission(chain, CircuitId::Prediction, AccessResource::Prediction, cancel)
            .await
        {
            Ok(()) => {
                let call = ProofCall::prediction(
                    data_proof_id,
                    &content_hash,
                    &input.model_version,
                    input.label,
                    confidence,
                    &artifact,
                );
                chain.submitter.submit(&call, target, status, cancel).await
            }
            Err(e) => self.record_failure(target, CircuitId::Prediction, &e).await,
        };

        Ok(report(Some(data_proof_id), true, Some(result)))
    }

    async fn prove_sensor(
        &self,
        reading: &SensorReading,
        commitment: &CommitmentHash,
        status: &StatusReporter,
        cancel: &CancellationFlag,
    ) -> Result<ProofArtifact> {
        let inputs = sensor_inputs(reading, commitment)?;
        let artifact = timed(
            &self.metrics,
            metric_names::PROOF_LATENCY,
            self.sensor_pipeline.run(&inputs, status, cancel),
        )
        .await?;
        self.metrics.inc_counter(metric_names::PROOFS_GENERATED).await;
        Ok(artifact)
    }

    async fn prove_prediction(
        &self,
        input: &PredictionInput,
        data_proof_id: u64,
        status: &StatusReporter,
        cancel: &CancellationFlag,
    ) -> Result<ProofArtifact> {
        let inputs = prediction_inputs(input, data_proof_id)?;
        let artifact = timed(
            &self.metrics,
            metric_names::PROOF_LATENCY,
            self.prediction_pipeline.run(&inputs, status, cancel),
        )
        .await?;
        self.metrics.inc_counter(metric_names::PROOFS_GENERATED).await;
        Ok(artifact)
    }

    /// Verifying key and access pre-flight
    async fn prepare_submission(
        &self,
        chain: &ChainComponents,
        circuit: CircuitId,
        resource: AccessResource,
        cancel: &CancellationFlag,
    ) -> Result<()> {
        cancel.check("verifying key check")?;
        chain.provisioner.ensure_ready(circuit).await?;

        cancel.check("access check")?;
        if let Err(e) = chain.gate.require(resource).await {
            if matches!(e, LedgerError::AccessDenied(_)) {
                self.metrics.inc_counter(metric_names::ACCESS_DENIALS).await;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Failure before anything reached the ledger: recorded only when a ledger is configured
    async fn fail(
        &self,
        circuit: CircuitId,
        target: WriteBack,
        err: &LedgerError,
    ) -> Option<ChainSubmissionResult> {
        warn!(record_id = target.record_id, circuit = %circuit, error = %err, "proof generation failed");
        if self.chain.is_some() {
            Some(self.record_failure(target, circuit, err).await)
        } else {
            None
        }
    }

    async fn record_failure(
        &self,
        target: WriteBack,
        circuit: CircuitId,
        err: &LedgerError,
    ) -> ChainSubmissionResult {
        let result = ChainSubmissionResult::failed(err);
        let update = ChainStatusUpdate::from_result(target.record_id, target.commitment, &result);
        let written = match circuit {
            CircuitId::Sensor => self.storage.update_chain_status(&update).await,
            CircuitId::Prediction => self.storage.update_prediction_status(&update).await,
        };
        if let Err(e) = written {
            warn!(record_id = target.record_id, error = %e, "failure status write-back failed");
        }
        result
    }

    /// Commit and store a maintenance task for a stored prediction.
    ///
    /// Tasks stay off-chain; the task hash is their tamper-evidence.
    #[instrument(skip_all, fields(prediction_id = input.prediction_id))]
    pub async fn schedule_maintenance(&self, input: &MaintenanceInput) -> Result<MaintenanceReport> {
        input.validate()?;
        if self.storage.prediction_by_id(input.prediction_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!(
                "prediction record {}",
                input.prediction_id
            )));
        }

        let task_hash = self.hasher.maintenance_commitment(input)?;
        let stored = self
            .storage
            .store_maintenance(&NewMaintenanceRecord {
                input: input.clone(),
                task_hash,
            })
            .await?;
        if stored.created {
            self.metrics
                .inc_counter(metric_names::MAINTENANCE_SCHEDULED)
                .await;
            info!(task_id = stored.id, hash = %task_hash, priority = %input.priority, "maintenance task scheduled");
        }

        Ok(MaintenanceReport {
            task_id: stored.id,
            task_hash,
            prediction_id: input.prediction_id,
            created: stored.created,
        })
    }

    /// Close the task with `task_hash`; completing a closed task keeps its first completion
    pub async fn complete_maintenance(
        &self,
        task_hash: CommitmentHash,
        completed_at: i64,
        notes: Option<String>,
    ) -> Result<MaintenanceRecord> {
        let closed = self
            .storage
            .complete_maintenance(&MaintenanceCompletion {
                task_hash,
                completed_at,
                notes,
            })
            .await?;
        let record = self
            .storage
            .maintenance_by_hash(&task_hash)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("maintenance task {}", task_hash)))?;
        if !closed {
            debug!(task_id = record.id, "maintenance task was already completed");
        }
        Ok(record)
    }

    pub async fn maintenance_for_prediction(&self, prediction_id: i64) -> Result<Vec<MaintenanceRecord>> {
        self.storage.maintenance_for_prediction(prediction_id).await
    }

    /// Recompute a stored record's commitment and compare it with the stored and expected hashes
    pub async fn verify_integrity(
        &self,
        record_id: i64,
        expected: Option<CommitmentHash>,
    ) -> Result<IntegrityReport> {
        let record = self
            .storage
            .sensor_by_id(record_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("sensor record {}", record_id)))?;
        let recomputed = self.hasher.commit_reading(&record.reading)?;
        let intact = recomputed == record.commitment && expected.map_or(true, |e| e == recomputed);
        if !intact {
            warn!(record_id, stored = %record.commitment, recomputed = %recomputed, "integrity check failed");
        }
        Ok(IntegrityReport {
            record_id,
            stored: record.commitment,
            recomputed,
            expected,
            intact,
        })
    }

    pub async fn retrieve_sensor(&self, lookup: SensorLookup) -> Result<Option<SensorRecord>> {
        match lookup {
            SensorLookup::Id(id) => self.storage.sensor_by_id(id).await,
            SensorLookup::Hash(hash) => self.storage.sensor_by_hash(&hash).await,
        }
    }

    pub async fn recent_sensors(&self, machine_id: Option<u64>, limit: u32) -> Result<Vec<SensorRecord>> {
        self.storage.recent_sensors(machine_id, limit).await
    }

    pub async fn statistics(&self) -> Result<StorageStatistics> {
        self.storage.statistics().await
    }

    /// Delete never-confirmed records older than `days`
    pub async fn purge_unconfirmed(&self, days: u32) -> Result<u64> {
        self.storage
            .purge_unconfirmed(chrono::Duration::days(i64::from(days)))
            .await
    }

    /// Whether each circuit's on-chain key matches the local key
    pub async fn verifying_key_status(&self) -> Result<Vec<(CircuitId, bool)>> {
        let chain = self.require_chain()?;
        let mut status = Vec::with_capacity(CircuitId::ALL.len());
        for circuit in CircuitId::ALL {
            status.push((circuit, chain.provisioner.is_ready(circuit).await?));
        }
        Ok(status)
    }

    /// Bring every circuit's on-chain key in line with the local key
    pub async fn ensure_verifying_keys(&self) -> Result<()> {
        let chain = self.require_chain()?;
        for circuit in CircuitId::ALL {
            chain.provisioner.ensure_ready(circuit).await?;
        }
        Ok(())
    }

    fn require_chain(&self) -> Result<&ChainComponents> {
        self.chain
            .as_ref()
            .ok_or_else(|| LedgerError::Configuration("no ledger configured".into()))
    }

    /// Readiness of storage, toolchain, reference string, ledger and verifying keys
    pub async fn diagnose(&self) -> DiagnosticReport {
        let storage = ComponentHealth::from_result(&self.storage.statistics().await);
        let toolchain = ComponentHealth::from_result(&self.sensor_pipeline.check_toolchain().await);
        let reference_string = ComponentHealth::from_result(&self.sensor_pipeline.ptau_path());

        let (chain, verifying_keys) = match &self.chain {
            None => (
                ComponentHealth::Degraded {
                    reason: "local-only mode".into(),
                },
                Vec::new(),
            ),
            Some(chain) => {
                let connectivity = ComponentHealth::from_result(&chain.client.chain_id().await);
                let mut keys = Vec::new();
                for circuit in CircuitId::ALL {
                    let health = match chain.provisioner.is_ready(circuit).await {
                        Ok(true) => ComponentHealth::Healthy,
                        Ok(false) => ComponentHealth::Degraded {
                            reason: "on-chain key missing or different".into(),
                        },
                        Err(e) => ComponentHealth::Unhealthy {
                            reason: e.to_string(),
                        },
                    };
                    keys.push((circuit, health));
                }
                (connectivity, keys)
            }
        };

        DiagnosticReport {
            storage,
            mirror: Some(self.storage.has_mirror()),
            toolchain,
            reference_string,
            chain,
            verifying_keys,
        }
    }
}

fn path_str(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| LedgerError::Configuration(format!("non-UTF-8 path {}", path.display())))
}

async fn open_display(path: &Path) -> Result<SqliteDisplayStore> {
    let store = SqliteDisplayStore::from_path(&path_str(path)?).await?;
    store.initialize().await?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MachineType;
    use crate::infra::{MockLedgerClient, MockProofToolchain};
    use crate::proof::PipelineConfig;

    async fn canonical() -> Arc<SqliteCanonicalStore> {
        let store = SqliteCanonicalStore::new(crate::infra::sqlite::memory_pool().await);
        store.initialize().await.unwrap();
        Arc::new(store)
    }

    fn reading() -> SensorReading {
        SensorReading {
            machine_id: 1001,
            timestamp: 1_700_000_000,
            air_temperature: 298.1,
            process_temperature: 308.6,
            rotational_speed: 1551,
            torque: 42.8,
            tool_wear: 0,
            machine_type: MachineType::Medium,
        }
    }

    /// Pipelines whose toolchain must never be invoked
    fn idle_pipelines(dir: &Path) -> (Arc<ProofPipeline>, Arc<ProofPipeline>) {
        let mut toolchain = MockProofToolchain::new();
        toolchain.expect_check_available().never();
        toolchain.expect_compile().never();
        toolchain.expect_witness().never();
        toolchain.expect_prove().never();
        let toolchain = Arc::new(toolchain);
        let config = PipelineConfig {
            circuit_dir: dir.join("circuits"),
            artifact_dir: dir.join("artifacts"),
            ptau_path: None,
        };
        (
            Arc::new(ProofPipeline::new(CircuitId::Sensor, config.clone(), toolchain.clone())),
            Arc::new(ProofPipeline::new(CircuitId::Prediction, config, toolchain)),
        )
    }

    #[tokio::test]
    async fn test_invalid_reading_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = canonical().await;
        let (sensor, prediction) = idle_pipelines(dir.path());
        let service = HybridLedgerService::new(
            DualWriteStorage::canonical_only(store.clone()),
            sensor,
            prediction,
            Arc::new(LedgerMetrics::new()),
        );

        let mut bad = reading();
        bad.torque = 120.0;
        let err = service
            .submit_sensor(&bad, &StatusReporter::disabled(), &CancellationFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(service.statistics().await.unwrap().sensor_records, 0);
    }

    #[tokio::test]
    async fn test_prediction_without_confirmed_sensor_generates_no_proof() {
        let dir = tempfile::tempdir().unwrap();
        let store = canonical().await;
        let (sensor, prediction) = idle_pipelines(dir.path());

        let mut client = MockLedgerClient::new();
        client.expect_account().return_const(alloy::primitives::Address::ZERO);
        client.expect_estimate_gas().never();
        client.expect_send().never();

        let service = HybridLedgerService::new(
            DualWriteStorage::canonical_only(store.clone()),
            sensor,
            prediction,
            Arc::new(LedgerMetrics::new()),
        )
        .with_chain(Arc::new(client), SubmitterConfig::default(), 5_000_000);

        // sensor stored but never confirmed
        let commitment = CommitmentHasher::new().commit_reading(&reading()).unwrap();
        let stored = service
            .storage()
            .store_sensor(&NewSensorRecord {
                reading: reading(),
                commitment,
                submitter: None,
            })
            .await
            .unwrap();

        let report = service
            .submit_prediction(
                &PredictionInput {
                    sensor_record_id: stored.id,
                    label: 1,
                    probability: 0.87,
                    model_version: "rf-v2.1".into(),
                    timestamp: 1_700_000_100,
                    predictor: None,
                },
                &StatusReporter::disabled(),
                &CancellationFlag::new(),
            )
            .await
            .unwrap();

        assert!(!report.success());
        assert!(!report.proof_generated);
        assert_eq!(report.error(), Some("missing_data_proof_id_onchain"));
        assert_eq!(report.status, ChainStatus::OnchainFailed);
    }

    #[tokio::test]
    async fn test_verify_integrity_detects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = canonical().await;
        let (sensor, prediction) = idle_pipelines(dir.path());
        let service = HybridLedgerService::new(
            DualWriteStorage::canonical_only(store),
            sensor,
            prediction,
            Arc::new(LedgerMetrics::new()),
        );

        let commitment = CommitmentHasher::new().commit_reading(&reading()).unwrap();
        let stored = service
            .storage()
            .store_sensor(&NewSensorRecord {
                reading: reading(),
                commitment,
                submitter: None,
            })
            .await
            .unwrap();

        let ok = service.verify_integrity(stored.id, Some(commitment)).await.unwrap();
        assert!(ok.intact);

        let wrong = service
            .verify_integrity(stored.id, Some(CommitmentHash([9; 32])))
            .await
            .unwrap();
        assert!(!wrong.intact);
        assert_eq!(wrong.recomputed, commitment);

        let missing = service.verify_integrity(999, None).await.unwrap_err();
        assert!(matches!(missing, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_local_only_has_no_key_status() {
        let dir = tempfile::tempdir().unwrap();
        let (sensor, prediction) = idle_pipelines(dir.path());
        let service = HybridLedgerService::new(
            DualWriteStorage::canonical_only(canonical().await),
            sensor,
            prediction,
            Arc::new(LedgerMetrics::new()),
        );
        assert!(!service.chain_enabled());
        assert!(matches!(
            service.verifying_key_status().await,
            Err(LedgerError::Configuration(_))
        ));
    }
}
