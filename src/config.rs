//! Environment configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::Address;
use serde_json::Value;

use crate::anchor::{
    gwei_to_wei, AnchorConfig, GasPolicy, SubmitterConfig, DEFAULT_SUBMISSION_GAS_LIMIT,
    DEFAULT_VK_GAS_LIMIT,
};
use crate::infra::{LedgerError, Result};
use crate::proof::{PipelineConfig, ToolchainConfig, ToolchainTimeouts};

pub const DEFAULT_RPC_URL: &str = "https://sepolia.era.zksync.dev";
pub const DEFAULT_CHAIN_ID: u64 = 300;

/// Everything needed to assemble a `HybridLedgerService`
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub canonical_db: PathBuf,
    /// `None` disables the display mirror
    pub display_db: Option<PathBuf>,
    pub circuit_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub ptau_path: Option<PathBuf>,
    pub toolchain: ToolchainConfig,
    /// `None` runs in local-only mode
    pub anchor: Option<AnchorConfig>,
    pub submitter: SubmitterConfig,
    pub vk_gas_limit: u64,
}

impl LedgerConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = PathBuf::from(var("PDM_DATA_DIR").unwrap_or_else(|| "./data".into()));
        let canonical_db = var("PDM_CANONICAL_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("hybrid_storage.db"));
        let display_db = match var("PDM_DISPLAY_DB") {
            Some(v) if v.eq_ignore_ascii_case("none") => None,
            Some(v) => Some(PathBuf::from(v)),
            None => Some(data_dir.join("pdm_display.db")),
        };

        let circuit_dir =
            PathBuf::from(var("PDM_CIRCUIT_DIR").unwrap_or_else(|| "./circuits/hybrid".into()));
        let artifact_dir =
            PathBuf::from(var("PDM_ARTIFACT_DIR").unwrap_or_else(|| "./temp/zk_proofs".into()));

        let toolchain = ToolchainConfig {
            circom_bin: var("PDM_CIRCOM_BIN").map(PathBuf::from),
            snarkjs_bin: var("PDM_SNARKJS_BIN").map(PathBuf::from),
            project_root: PathBuf::from("."),
            include_dir: PathBuf::from(var("PDM_INCLUDE_DIR").unwrap_or_else(|| "node_modules".into())),
            timeouts: ToolchainTimeouts::default(),
        };

        let gas_floor_gwei: f64 = parse_or(&var, "PDM_GAS_PRICE_FLOOR_GWEI", 0.25)?;
        let tx_timeout: u64 = parse_or(&var, "PDM_TX_TIMEOUT_SECS", 120)?;
        let rpc_timeout: u64 = parse_or(&var, "PDM_RPC_TIMEOUT_SECS", 30)?;
        let submitter = SubmitterConfig {
            sensor_gas_limit: parse_or(&var, "PDM_SENSOR_GAS_LIMIT", DEFAULT_SUBMISSION_GAS_LIMIT)?,
            prediction_gas_limit: parse_or(
                &var,
                "PDM_PREDICTION_GAS_LIMIT",
                DEFAULT_SUBMISSION_GAS_LIMIT,
            )?,
            gas: GasPolicy {
                gas_price_floor_wei: gwei_to_wei(gas_floor_gwei),
                confirmation_timeout: Duration::from_secs(tx_timeout),
            },
        };

        let anchor = match var("PRIVATE_KEY") {
            None => None,
            Some(private_key) => {
                let deployment = match var("PDM_DEPLOYMENT_INFO") {
                    Some(path) => Some(read_deployment_info(Path::new(&path))?),
                    None => None,
                };
                let contract_address = address(
                    var("PDM_CONTRACT_ADDRESS"),
                    deployment.as_ref(),
                    &["PdMSystemHybrid"],
                    "PDM_CONTRACT_ADDRESS",
                )?;
                let verifier_address = address(
                    var("VERIFIER_CONTRACT_ADDRESS"),
                    deployment.as_ref(),
                    &["UnifiedGroth16Verifier", "OptimizedGroth16Verifier"],
                    "VERIFIER_CONTRACT_ADDRESS",
                )?;
                Some(AnchorConfig {
                    rpc_url: var("ZKSYNC_ERA_RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.into()),
                    chain_id: parse_or(&var, "PDM_CHAIN_ID", DEFAULT_CHAIN_ID)?,
                    contract_address,
                    verifier_address,
                    private_key,
                    rpc_timeout: Duration::from_secs(rpc_timeout),
                })
            }
        };

        Ok(Self {
            canonical_db,
            display_db,
            circuit_dir,
            ptau_path: var("PDM_PTAU_PATH").map(PathBuf::from),
            artifact_dir,
            toolchain,
            anchor,
            submitter,
            vk_gas_limit: parse_or(&var, "PDM_VK_GAS_LIMIT", DEFAULT_VK_GAS_LIMIT)?,
        })
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            circuit_dir: self.circuit_dir.clone(),
            artifact_dir: self.artifact_dir.clone(),
            ptau_path: self.ptau_path.clone(),
        }
    }

    pub fn chain_enabled(&self) -> bool {
        self.anchor.is_some()
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| LedgerError::Configuration(format!("{}={}: {}", key, raw, e))),
        None => Ok(default),
    }
}

fn read_deployment_info(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        LedgerError::Configuration(format!("deployment info {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Address from the explicit variable, else from `contracts.<name>.address` in the deployment file
fn address(
    explicit: Option<String>,
    deployment: Option<&Value>,
    names: &[&str],
    key: &str,
) -> Result<Address> {
    let raw = explicit
        .or_else(|| {
            let contracts = deployment?.get("contracts")?;
            names.iter().find_map(|name| {
                contracts
                    .get(*name)?
                    .get("address")?
                    .as_str()
                    .map(str::to_string)
            })
        })
        .ok_or_else(|| LedgerError::Configuration(format!("{} is not set", key)))?;
    raw.trim()
        .parse()
        .map_err(|e| LedgerError::Configuration(format!("{}={}: {}", key, raw, e)))
}
