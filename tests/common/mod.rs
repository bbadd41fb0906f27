//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::json;

use pdm_proof_ledger::anchor::{ProofCall, SubmitterConfig, TxOutcome, TxParams};
use pdm_proof_ledger::domain::{
    AccessDecision, AccessLevel, AccessResource, OnChainVerifyingKey, VerifyingKey,
};
use pdm_proof_ledger::infra::{
    DualWriteStorage, LedgerClient, ProofToolchain, RecordStore, SqliteCanonicalStore,
    SqliteDisplayStore,
};
use pdm_proof_ledger::metrics::LedgerMetrics;
use pdm_proof_ledger::proof::{PipelineConfig, ProofPipeline, PTAU_CANDIDATES};
use pdm_proof_ledger::{
    CircuitId, Hash256, HybridLedgerService, LedgerError, MachineType, PredictionInput, Result,
    SensorReading,
};

/// Reading used throughout: 298.1 K, 308.6 K, 1551 rpm, 42.8 Nm, 0 min, M
pub fn reference_reading() -> SensorReading {
    SensorReading::new(
        1001,
        1_700_000_000,
        298.1,
        308.6,
        1551,
        42.8,
        0,
        MachineType::Medium,
    )
}

pub fn prediction_for(sensor_record_id: i64) -> PredictionInput {
    PredictionInput {
        sensor_record_id,
        label: 1,
        probability: 0.87,
        model_version: "rf-v2.1".into(),
        timestamp: 1_700_000_100,
        predictor: None,
    }
}

/// Canonical and display stores backed by files in `dir`
pub async fn open_stores(dir: &Path) -> (Arc<SqliteCanonicalStore>, Arc<SqliteDisplayStore>) {
    let canonical = SqliteCanonicalStore::from_path(dir.join("canonical.db").to_str().unwrap())
        .await
        .unwrap();
    canonical.initialize().await.unwrap();
    let display = SqliteDisplayStore::from_path(dir.join("display.db").to_str().unwrap())
        .await
        .unwrap();
    display.initialize().await.unwrap();
    (Arc::new(canonical), Arc::new(display))
}

pub async fn dual_storage(dir: &Path) -> DualWriteStorage {
    let (canonical, display) = open_stores(dir).await;
    DualWriteStorage::new(canonical, Some(display as Arc<dyn RecordStore>))
}

pub fn proof_json() -> serde_json::Value {
    json!({
        "pi_a": ["11", "12", "1"],
        "pi_b": [["21", "22"], ["23", "24"], ["1", "0"]],
        "pi_c": ["31", "32", "1"],
        "protocol": "groth16",
        "curve": "bn128"
    })
}

pub fn verification_key_json() -> serde_json::Value {
    json!({
        "protocol": "groth16",
        "vk_alpha_1": ["1", "2", "1"],
        "vk_beta_2": [["3", "4"], ["5", "6"], ["1", "0"]],
        "vk_gamma_2": [["7", "8"], ["9", "10"], ["1", "0"]],
        "vk_delta_2": [["11", "12"], ["13", "14"], ["1", "0"]],
        "IC": [["15", "16", "1"], ["17", "18", "1"], ["19", "20", "1"], ["21", "22", "1"]]
    })
}

pub fn local_verifying_key() -> VerifyingKey {
    VerifyingKey::from_snarkjs(&verification_key_json()).unwrap()
}

/// Toolchain that writes the files each stage would produce, without running anything
#[derive(Default)]
pub struct FakeToolchain {
    pub calls: Mutex<Vec<&'static str>>,
}

impl FakeToolchain {
    pub fn count(&self, stage: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|s| **s == stage).count()
    }

    fn record(&self, stage: &'static str) {
        self.calls.lock().unwrap().push(stage);
    }
}

#[async_trait]
impl ProofToolchain for FakeToolchain {
    async fn check_available(&self) -> Result<()> {
        Ok(())
    }

    async fn compile(&self, source: &Path, out_dir: &Path) -> Result<()> {
        self.record("compile");
        let name = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        std::fs::create_dir_all(out_dir.join(format!("{name}_js")))?;
        std::fs::write(out_dir.join(format!("{name}.r1cs")), b"r1cs")?;
        std::fs::write(out_dir.join(format!("{name}_js/{name}.wasm")), b"wasm")?;
        Ok(())
    }

    async fn setup(&self, _r1cs: &Path, _ptau: &Path, zkey: &Path) -> Result<()> {
        self.record("setup");
        std::fs::write(zkey, b"zkey")?;
        Ok(())
    }

    async fn witness(&self, _wasm: &Path, input: &Path, witness: &Path) -> Result<()> {
        self.record("witness");
        if !input.is_file() {
            return Err(LedgerError::StageFailed {
                stage: "witness".into(),
                message: "input.json missing".into(),
            });
        }
        std::fs::write(witness, b"wtns")?;
        Ok(())
    }

    async fn prove(&self, _zkey: &Path, _witness: &Path, proof: &Path, public: &Path) -> Result<()> {
        self.record("prove");
        std::fs::write(proof, serde_json::to_vec(&proof_json())?)?;
        std::fs::write(public, br#"["1001", "1700000000", "4242"]"#)?;
        Ok(())
    }

    async fn export_verifying_key(&self, _zkey: &Path, out: &Path) -> Result<()> {
        self.record("export_vk");
        std::fs::write(out, serde_json::to_vec(&verification_key_json())?)?;
        Ok(())
    }
}

/// Sensor and prediction pipelines sharing one fake toolchain under `dir`
pub fn fake_pipelines(dir: &Path, toolchain: Arc<FakeToolchain>) -> (Arc<ProofPipeline>, Arc<ProofPipeline>) {
    let artifact_dir = dir.join("artifacts");
    std::fs::create_dir_all(&artifact_dir).unwrap();
    std::fs::write(artifact_dir.join(PTAU_CANDIDATES[0]), b"ptau").unwrap();
    let config = PipelineConfig {
        circuit_dir: dir.join("circuits"),
        artifact_dir,
        ptau_path: None,
    };
    (
        Arc::new(ProofPipeline::new(CircuitId::Sensor, config.clone(), toolchain.clone())),
        Arc::new(ProofPipeline::new(CircuitId::Prediction, config, toolchain)),
    )
}

/// In-memory ledger that accepts every well-formed submission
pub struct FakeLedger {
    pub account: Address,
    pub state: Mutex<LedgerState>,
}

#[derive(Default)]
pub struct LedgerState {
    pub used_hashes: HashSet<Hash256>,
    pub keys: HashMap<CircuitId, VerifyingKey>,
    pub key_uploads: usize,
    pub simulations: usize,
    pub sends: usize,
    pub next_proof_id: u64,
    pub nonce: u64,
    pub deny_access: bool,
    /// Simulation reverts with this reason until the proof's B point is swapped
    pub require_swapped_b: bool,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            account: Address::repeat_byte(0xaa),
            state: Mutex::new(LedgerState {
                next_proof_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Ledger whose verifier already holds the local keys
    pub fn provisioned() -> Self {
        let ledger = Self::new();
        {
            let mut state = ledger.state.lock().unwrap();
            for circuit in CircuitId::ALL {
                state.keys.insert(circuit, local_verifying_key());
            }
        }
        ledger
    }

    pub fn with_state(self, f: impl FnOnce(&mut LedgerState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn snapshot<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> T {
        f(&self.state.lock().unwrap())
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    fn account(&self) -> Address {
        self.account
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(300)
    }

    async fn is_data_hash_used(&self, hash: Hash256) -> Result<bool> {
        Ok(self.state.lock().unwrap().used_hashes.contains(&hash))
    }

    async fn access_resource(&self, resource: AccessResource) -> Result<Hash256> {
        Ok(match resource {
            AccessResource::SensorData => [1; 32],
            AccessResource::Prediction => [2; 32],
        })
    }

    async fn check_access(
        &self,
        _account: Address,
        _resource: Hash256,
        _level: AccessLevel,
    ) -> Result<AccessDecision> {
        let denied = self.state.lock().unwrap().deny_access;
        Ok(AccessDecision {
            allowed: !denied,
            reason: if denied { "Not authorized" } else { "" }.into(),
        })
    }

    async fn circuit_key(&self, circuit: CircuitId) -> Result<OnChainVerifyingKey> {
        let state = self.state.lock().unwrap();
        Ok(match state.keys.get(&circuit) {
            Some(key) => OnChainVerifyingKey {
                key: key.clone(),
                is_set: true,
            },
            None => OnChainVerifyingKey::default(),
        })
    }

    async fn set_circuit_key(
        &self,
        circuit: CircuitId,
        key: &VerifyingKey,
        params: TxParams,
    ) -> Result<TxOutcome> {
        let mut state = self.state.lock().unwrap();
        state.keys.insert(circuit, key.clone());
        state.key_uploads += 1;
        state.nonce = params.nonce + 1;
        Ok(TxOutcome {
            tx_hash: format!("0xkey{}", state.key_uploads),
            block_number: Some(10),
            gas_used: Some(1_000_000),
            success: true,
            proof_id_from_event: None,
        })
    }

    async fn estimate_gas(&self, call: &ProofCall) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.simulations += 1;
        if state.require_swapped_b && call.proof().b.x[0] != alloy::primitives::U256::from(22) {
            return Err(LedgerError::SimulationFailed(
                "execution reverted: Invalid proof".into(),
            ));
        }
        Ok(450_000)
    }

    async fn call_for_proof_id(&self, _call: &ProofCall) -> Result<u64> {
        Ok(self.state.lock().unwrap().next_proof_id)
    }

    async fn pending_nonce(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().nonce)
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(100_000_000)
    }

    async fn send(&self, call: &ProofCall, params: TxParams) -> Result<TxOutcome> {
        let mut state = self.state.lock().unwrap();
        if !state.used_hashes.insert(call.content_hash()) {
            return Ok(TxOutcome {
                tx_hash: "0xreverted".into(),
                success: false,
                ..Default::default()
            });
        }
        state.sends += 1;
        state.nonce = params.nonce + 1;
        let proof_id = state.next_proof_id;
        state.next_proof_id += 1;
        Ok(TxOutcome {
            tx_hash: format!("0x{:064x}", proof_id),
            block_number: Some(100 + proof_id),
            gas_used: Some(420_000),
            success: true,
            proof_id_from_event: Some(proof_id),
        })
    }
}

/// Service over file-backed stores, fake pipelines and, optionally, a fake ledger
pub async fn service(
    dir: &Path,
    toolchain: Arc<FakeToolchain>,
    ledger: Option<Arc<FakeLedger>>,
) -> HybridLedgerService {
    let storage = dual_storage(dir).await;
    let (sensor, prediction) = fake_pipelines(dir, toolchain);
    let service = HybridLedgerService::new(storage, sensor, prediction, Arc::new(LedgerMetrics::new()));
    match ledger {
        Some(ledger) => service.with_chain(ledger, SubmitterConfig::default(), 5_000_000),
        None => service,
    }
}
