//! Per-circuit proof lifecycle
//!
//! `NotCompiled -> Compiled -> KeysGenerated -> WitnessComputed -> ProofGenerated`
//!
//! Compiled artifacts and the proving key are cached on disk and reused
//! across runs. Witness, proof and public-signal files are written to a
//! fresh directory per run and removed once the artifact is parsed.
//! One writer per circuit at a time is assumed; nothing here locks the
//! artifact directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::circuits::{ensure_sensor_source, CircuitInputs, CircuitSpec};
use crate::domain::{CircuitId, ProofArtifact, VerifyingKey};
use crate::infra::{
    CancellationFlag, LedgerError, ProofToolchain, Result, StatusReporter, VerifyingKeySource,
};

/// Preferred and fallback reference-string file names inside the artifact directory
pub const PTAU_CANDIDATES: [&str; 2] = ["pot16_final_prepared.ptau", "pot16_final.ptau"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    NotCompiled,
    Compiled,
    KeysGenerated,
    WitnessComputed,
    ProofGenerated,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::NotCompiled => "not_compiled",
            PipelineStage::Compiled => "compiled",
            PipelineStage::KeysGenerated => "keys_generated",
            PipelineStage::WitnessComputed => "witness_computed",
            PipelineStage::ProofGenerated => "proof_generated",
        }
    }
}

/// Directory layout for one pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub circuit_dir: PathBuf,
    pub artifact_dir: PathBuf,
    /// Explicit reference string; otherwise searched in `artifact_dir`
    pub ptau_path: Option<PathBuf>,
}

pub struct ProofPipeline {
    spec: CircuitSpec,
    config: PipelineConfig,
    toolchain: Arc<dyn ProofToolchain>,
    stage: Mutex<PipelineStage>,
    verifying_key: RwLock<Option<VerifyingKey>>,
}

impl ProofPipeline {
    pub fn new(circuit: CircuitId, config: PipelineConfig, toolchain: Arc<dyn ProofToolchain>) -> Self {
        Self {
            spec: CircuitSpec::for_circuit(circuit),
            config,
            toolchain,
            stage: Mutex::new(PipelineStage::NotCompiled),
            verifying_key: RwLock::new(None),
        }
    }

    pub fn spec(&self) -> &CircuitSpec {
        &self.spec
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
            .lock()
            .map(|s| *s)
            .unwrap_or(PipelineStage::NotCompiled)
    }

    /// Whether the compiler and proving CLI can be located
    pub async fn check_toolchain(&self) -> Result<()> {
        self.toolchain.check_available().await
    }

    fn advance(&self, stage: PipelineStage) {
        if let Ok(mut current) = self.stage.lock() {
            *current = stage;
        }
    }

    fn artifact_dir(&self) -> &Path {
        &self.config.artifact_dir
    }

    /// Reference string to use for key setup
    pub fn ptau_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config.ptau_path {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(LedgerError::MissingKeyMaterial(format!(
                "powers-of-tau file not found at {}",
                path.display()
            )));
        }
        PTAU_CANDIDATES
            .iter()
            .map(|name| self.artifact_dir().join(name))
            .find(|p| p.is_file())
            .ok_or_else(|| {
                LedgerError::MissingKeyMaterial(format!(
                    "no {} or {} in {}",
                    PTAU_CANDIDATES[0],
                    PTAU_CANDIDATES[1],
                    self.artifact_dir().display()
                ))
            })
    }

    /// Compile the circuit unless its constraint system and witness generator exist
    pub async fn compile(&self) -> Result<()> {
        let r1cs = self.spec.r1cs_path(self.artifact_dir());
        let wasm = self.spec.wasm_path(self.artifact_dir());
        if r1cs.is_file() && wasm.is_file() {
            debug!(circuit = self.spec.name, "compiled artifacts present");
            self.advance(PipelineStage::Compiled);
            return Ok(());
        }

        let source = self.spec.source_path(&self.config.circuit_dir);
        if self.spec.id == CircuitId::Sensor && ensure_sensor_source(&source)? {
            info!(path = %source.display(), "wrote sensor circuit source");
        }

        let started = Instant::now();
        self.toolchain.compile(&source, self.artifact_dir()).await?;
        if !r1cs.is_file() {
            return Err(LedgerError::StageFailed {
                stage: "compile".into(),
                message: format!("{} missing after compilation", r1cs.display()),
            });
        }
        info!(
            circuit = self.spec.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "circuit compiled"
        );
        self.advance(PipelineStage::Compiled);
        Ok(())
    }

    /// Derive the proving key, regenerating it when the constraint system is newer
    pub async fn setup(&self) -> Result<()> {
        let r1cs = self.spec.r1cs_path(self.artifact_dir());
        let zkey = self.spec.zkey_path(self.artifact_dir());

        if zkey.is_file() && is_newer(&r1cs, &zkey) {
            info!(circuit = self.spec.name, "constraint system changed; regenerating proving key");
            tokio::fs::remove_file(&zkey).await?;
        }
        if zkey.is_file() {
            debug!(circuit = self.spec.name, "proving key present");
            self.advance(PipelineStage::KeysGenerated);
            return Ok(());
        }

        let ptau = self.ptau_path()?;
        let started = Instant::now();
        self.toolchain.setup(&r1cs, &ptau, &zkey).await?;
        *self.verifying_key.write().await = None;
        info!(
            circuit = self.spec.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "proving key derived"
        );
        self.advance(PipelineStage::KeysGenerated);
        Ok(())
    }

    /// Write `inputs` as JSON into `run_dir` and compute the witness
    pub async fn compute_witness(&self, run_dir: &Path, inputs: &CircuitInputs) -> Result<PathBuf> {
        let input_path = run_dir.join("input.json");
        let witness_path = run_dir.join("witness.wtns");
        tokio::fs::write(&input_path, inputs.to_json()?).await?;

        let wasm = self.spec.wasm_path(self.artifact_dir());
        self.toolchain
            .witness(&wasm, &input_path, &witness_path)
            .await?;
        self.advance(PipelineStage::WitnessComputed);
        Ok(witness_path)
    }

    /// Prove from a computed witness and parse the result
    pub async fn prove(&self, run_dir: &Path, witness: &Path) -> Result<ProofArtifact> {
        let zkey = self.spec.zkey_path(self.artifact_dir());
        let proof_path = run_dir.join("proof.json");
        let public_path = run_dir.join("public.json");
        self.toolchain
            .prove(&zkey, witness, &proof_path, &public_path)
            .await?;

        let proof_json = read_json(&proof_path).await?;
        let public_json = read_json(&public_path).await?;
        let artifact = ProofArtifact::from_snarkjs(self.spec.id, &proof_json, &public_json)?;
        self.advance(PipelineStage::ProofGenerated);
        Ok(artifact)
    }

    /// Full lifecycle for one set of inputs.
    ///
    /// Cancellation is honoured between stages. Stage failures are not retried.
    pub async fn run(
        &self,
        inputs: &CircuitInputs,
        status: &StatusReporter,
        cancel: &CancellationFlag,
    ) -> Result<ProofArtifact> {
        cancel.check("compile")?;
        self.toolchain.check_available().await?;

        status.post(format!("{}: compiling circuit", self.spec.name));
        self.compile().await?;

        cancel.check("setup")?;
        status.post(format!("{}: preparing proving key", self.spec.name));
        self.setup().await?;

        cancel.check("witness")?;
        let run_dir = self.artifact_dir().join("runs").join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&run_dir).await?;

        let started = Instant::now();
        let result = self.witness_and_prove(&run_dir, inputs, status, cancel).await;

        if let Err(e) = tokio::fs::remove_dir_all(&run_dir).await {
            warn!(path = %run_dir.display(), error = %e, "could not remove run directory");
        }

        let artifact = result?;
        info!(
            circuit = self.spec.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            public_inputs = artifact.public_inputs.len(),
            "proof generated"
        );
        status.post(format!("{}: proof generated", self.spec.name));
        Ok(artifact)
    }

    async fn witness_and_prove(
        &self,
        run_dir: &Path,
        inputs: &CircuitInputs,
        status: &StatusReporter,
        cancel: &CancellationFlag,
    ) -> Result<ProofArtifact> {
        status.post(format!("{}: computing witness", self.spec.name));
        let witness = self.compute_witness(run_dir, inputs).await?;

        cancel.check("prove")?;
        status.post(format!("{}: proving", self.spec.name));
        self.prove(run_dir, &witness).await
    }

    /// Verifying key derived from the local proving key.
    ///
    /// Re-exported when the key file is missing or older than the proving key.
    pub async fn export_verifying_key(&self) -> Result<VerifyingKey> {
        if let Some(key) = self.verifying_key.read().await.as_ref() {
            return Ok(key.clone());
        }

        let zkey = self.spec.zkey_path(self.artifact_dir());
        let vk_path = self.spec.verifying_key_path(self.artifact_dir());
        if !zkey.is_file() {
            return Err(LedgerError::MissingKeyMaterial(format!(
                "proving key for {} not found at {}",
                self.spec.name,
                zkey.display()
            )));
        }
        if !vk_path.is_file() || is_newer(&zkey, &vk_path) {
            self.toolchain.export_verifying_key(&zkey, &vk_path).await?;
        }

        let key = VerifyingKey::from_snarkjs(&read_json(&vk_path).await?)?;
        *self.verifying_key.write().await = Some(key.clone());
        Ok(key)
    }
}

#[async_trait]
impl VerifyingKeySource for ProofPipeline {
    fn circuit(&self) -> CircuitId {
        self.spec.id
    }

    async fn local_verifying_key(&self) -> Result<VerifyingKey> {
        self.export_verifying_key().await
    }
}

/// Whether `a` was modified after `b`; false when either is unreadable
fn is_newer(a: &Path, b: &Path) -> bool {
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(a), modified(b)) {
        (Some(a), Some(b)) => a > b,
        _ => false,
    }
}

async fn read_json(path: &Path) -> Result<serde_json::Value> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        LedgerError::MalformedArtifact(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::MockProofToolchain;
    use serde_json::json;

    fn proof_json() -> serde_json::Value {
        json!({
            "pi_a": ["1", "2", "1"],
            "pi_b": [["3", "4"], ["5", "6"], ["1", "0"]],
            "pi_c": ["7", "8", "1"],
            "protocol": "groth16"
        })
    }

    fn vk_json() -> serde_json::Value {
        json!({
            "vk_alpha_1": ["1", "2", "1"],
            "vk_beta_2": [["3", "4"], ["5", "6"], ["1", "0"]],
            "vk_gamma_2": [["7", "8"], ["9", "10"], ["1", "0"]],
            "vk_delta_2": [["11", "12"], ["13", "14"], ["1", "0"]],
            "IC": [["15", "16", "1"], ["17", "18", "1"]]
        })
    }

    /// Toolchain double that writes the files each stage would produce
    fn writing_toolchain(compiles: usize, setups: usize) -> MockProofToolchain {
        let mut toolchain = MockProofToolchain::new();
        toolchain.expect_check_available().returning(|| Ok(()));
        toolchain.expect_compile().times(compiles).returning(|source, out_dir| {
            let name = source.file_stem().unwrap().to_string_lossy().to_string();
            std::fs::create_dir_all(out_dir.join(format!("{name}_js"))).unwrap();
            std::fs::write(out_dir.join(format!("{name}.r1cs")), b"r1cs").unwrap();
            std::fs::write(out_dir.join(format!("{name}_js/{name}.wasm")), b"wasm").unwrap();
            Ok(())
        });
        toolchain.expect_setup().times(setups).returning(|_, _, zkey| {
            std::fs::write(zkey, b"zkey").unwrap();
            Ok(())
        });
        toolchain.expect_witness().returning(|_, input, witness| {
            assert!(input.is_file());
            std::fs::write(witness, b"wtns").unwrap();
            Ok(())
        });
        toolchain.expect_prove().returning(|_, _, proof, public| {
            std::fs::write(proof, serde_json::to_vec(&proof_json()).unwrap()).unwrap();
            // extra trailing signals must be dropped
            std::fs::write(public, br#"["1001", "1700000000", "42", "99", "100"]"#).unwrap();
            Ok(())
        });
        toolchain.expect_export_verifying_key().returning(|_, out| {
            std::fs::write(out, serde_json::to_vec(&vk_json()).unwrap()).unwrap();
            Ok(())
        });
        toolchain
    }

    fn pipeline(dir: &Path, toolchain: MockProofToolchain) -> ProofPipeline {
        std::fs::write(dir.join(PTAU_CANDIDATES[1]), b"ptau").unwrap();
        ProofPipeline::new(
            CircuitId::Sensor,
            PipelineConfig {
                circuit_dir: dir.join("circuits"),
                artifact_dir: dir.to_path_buf(),
                ptau_path: None,
            },
            Arc::new(toolchain),
        )
    }

    fn inputs() -> CircuitInputs {
        CircuitInputs::new().with("machineId", 1001).with("timestamp", 1_700_000_000u64)
    }

    #[tokio::test]
    async fn test_run_truncates_public_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), writing_toolchain(1, 1));
        let (status, mut rx) = StatusReporter::channel();

        let artifact = pipeline
            .run(&inputs(), &status, &CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(artifact.public_inputs.len(), 3);
        assert_eq!(pipeline.stage(), PipelineStage::ProofGenerated);
        assert!(rx.try_recv().unwrap().contains("compiling"));
        // per-run files are cleaned up
        let runs: Vec<_> = std::fs::read_dir(dir.path().join("runs")).unwrap().collect();
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn test_artifacts_are_reused_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), writing_toolchain(1, 1));
        let cancel = CancellationFlag::new();
        let status = StatusReporter::disabled();

        pipeline.run(&inputs(), &status, &cancel).await.unwrap();
        pipeline.run(&inputs(), &status, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), writing_toolchain(0, 0));
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let err = pipeline
            .run(&inputs(), &StatusReporter::disabled(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled(_)));
        assert_eq!(pipeline.stage(), PipelineStage::NotCompiled);
    }

    #[tokio::test]
    async fn test_missing_ptau_is_key_material_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ProofPipeline::new(
            CircuitId::Prediction,
            PipelineConfig {
                circuit_dir: dir.path().to_path_buf(),
                artifact_dir: dir.path().to_path_buf(),
                ptau_path: None,
            },
            Arc::new(writing_toolchain(0, 0)),
        );
        let err = pipeline.setup().await.unwrap_err();
        assert!(matches!(err, LedgerError::MissingKeyMaterial(_)));
    }

    #[tokio::test]
    async fn test_failed_stage_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mut toolchain = MockProofToolchain::new();
        toolchain.expect_check_available().returning(|| Ok(()));
        toolchain.expect_compile().times(1).returning(|_, _| {
            Err(LedgerError::StageTimeout {
                stage: "compile".into(),
                seconds: 120,
            })
        });
        let pipeline = pipeline(dir.path(), toolchain);

        let err = pipeline
            .run(&inputs(), &StatusReporter::disabled(), &CancellationFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StageTimeout { .. }));
    }

    #[tokio::test]
    async fn test_verifying_key_export_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut toolchain = MockProofToolchain::new();
        toolchain.expect_export_verifying_key().times(1).returning(|_, out| {
            std::fs::write(out, serde_json::to_vec(&vk_json()).unwrap()).unwrap();
            Ok(())
        });
        let pipeline = pipeline(dir.path(), toolchain);
        std::fs::write(pipeline.spec().zkey_path(dir.path()), b"zkey").unwrap();

        let first = pipeline.local_verifying_key().await.unwrap();
        let second = pipeline.local_verifying_key().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.ic.len(), 2);
    }
}
