//! circom + snarkjs toolchain

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::infra::process::{resolve_binary, run_stage};
use crate::infra::{LedgerError, ProofToolchain, Result};

/// Wall-clock limits per stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolchainTimeouts {
    pub compile: Duration,
    pub setup: Duration,
    pub witness: Duration,
    pub prove: Duration,
    pub export: Duration,
}

impl Default for ToolchainTimeouts {
    fn default() -> Self {
        Self {
            compile: Duration::from_secs(120),
            setup: Duration::from_secs(180),
            witness: Duration::from_secs(30),
            prove: Duration::from_secs(30),
            export: Duration::from_secs(120),
        }
    }
}

/// Toolchain locations
#[derive(Debug, Clone, Default)]
pub struct ToolchainConfig {
    /// Explicit circom binary; looked up on `PATH` then `node_modules/.bin` when unset
    pub circom_bin: Option<PathBuf>,
    pub snarkjs_bin: Option<PathBuf>,
    /// Root used for the `node_modules/.bin` fallback
    pub project_root: PathBuf,
    /// circom `-l` include directory (circomlib)
    pub include_dir: PathBuf,
    pub timeouts: ToolchainTimeouts,
}

/// Runs circom and snarkjs as child processes
#[derive(Debug, Clone)]
pub struct SnarkjsToolchain {
    config: ToolchainConfig,
}

impl SnarkjsToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    fn circom(&self) -> Result<PathBuf> {
        resolve_binary(
            "circom",
            self.config.circom_bin.as_deref(),
            &self.config.project_root,
        )
    }

    fn snarkjs(&self) -> Result<PathBuf> {
        resolve_binary(
            "snarkjs",
            self.config.snarkjs_bin.as_deref(),
            &self.config.project_root,
        )
    }

    async fn snarkjs_stage(&self, stage: &str, args: &[&Path], prefix: &[&str], timeout: Duration) -> Result<()> {
        let snarkjs = self.snarkjs()?;
        let argv: Vec<&std::ffi::OsStr> = prefix
            .iter()
            .map(|a| std::ffi::OsStr::new(*a))
            .chain(args.iter().map(|p| p.as_os_str()))
            .collect();
        run_stage(stage, &snarkjs, argv, timeout).await?;
        Ok(())
    }
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(LedgerError::MissingKeyMaterial(format!(
            "{} not found at {}",
            what,
            path.display()
        )))
    }
}

#[async_trait]
impl ProofToolchain for SnarkjsToolchain {
    async fn check_available(&self) -> Result<()> {
        self.circom()?;
        self.snarkjs()?;
        Ok(())
    }

    async fn compile(&self, source: &Path, out_dir: &Path) -> Result<()> {
        require_file(source, "circuit source")?;
        let circom = self.circom()?;
        tokio::fs::create_dir_all(out_dir).await?;

        info!(source = %source.display(), "compiling circuit");
        let args = [
            source.as_os_str(),
            "--r1cs".as_ref(),
            "--wasm".as_ref(),
            "--sym".as_ref(),
            "-o".as_ref(),
            out_dir.as_os_str(),
            "-l".as_ref(),
            self.config.include_dir.as_os_str(),
        ];
        run_stage("compile", &circom, args, self.config.timeouts.compile).await?;
        Ok(())
    }

    async fn setup(&self, r1cs: &Path, ptau: &Path, zkey: &Path) -> Result<()> {
        require_file(r1cs, "constraint system")?;
        require_file(ptau, "powers-of-tau file")?;
        info!(r1cs = %r1cs.display(), "deriving proving key");
        self.snarkjs_stage(
            "setup",
            &[r1cs, ptau, zkey],
            &["groth16", "setup"],
            self.config.timeouts.setup,
        )
        .await
    }

    async fn witness(&self, wasm: &Path, input: &Path, witness: &Path) -> Result<()> {
        require_file(wasm, "witness generator")?;
        self.snarkjs_stage(
            "witness",
            &[wasm, input, witness],
            &["wtns", "calculate"],
            self.config.timeouts.witness,
        )
        .await?;
        if !witness.is_file() {
            return Err(LedgerError::StageFailed {
                stage: "witness".into(),
                message: format!("witness file not created at {}", witness.display()),
            });
        }
        Ok(())
    }

    async fn prove(&self, zkey: &Path, witness: &Path, proof: &Path, public: &Path) -> Result<()> {
        require_file(zkey, "proving key")?;
        self.snarkjs_stage(
            "prove",
            &[zkey, witness, proof, public],
            &["groth16", "prove"],
            self.config.timeouts.prove,
        )
        .await
    }

    async fn export_verifying_key(&self, zkey: &Path, out: &Path) -> Result<()> {
        require_file(zkey, "proving key")?;
        self.snarkjs_stage(
            "export",
            &[zkey, out],
            &["zkey", "export", "verificationkey"],
            self.config.timeouts.export,
        )
        .await
    }
}
