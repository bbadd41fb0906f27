//! alloy-backed ledger client

use std::fmt::Display;
use std::future::IntoFuture;
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, FixedBytes, U256};
use alloy::providers::{PendingTransactionError, Provider, ProviderBuilder, WatchTxError};
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::call::{ProofCall, TxOutcome, TxParams};
use super::contracts::{IAccessControlRegistry, IPdMSystemHybrid, IUnifiedGroth16Verifier};
use crate::crypto::to_bytes32;
use crate::domain::{
    AccessDecision, AccessLevel, AccessResource, CircuitId, G1Point, G2Point, Hash256,
    OnChainVerifyingKey, VerifyingKey,
};
use crate::infra::{LedgerClient, LedgerError, Result};

/// Ledger connection configuration
#[derive(Debug, Clone)]
pub struct AnchorConfig {
    /// RPC URL of the ledger node
    pub rpc_url: String,
    /// Expected chain id
    pub chain_id: u64,
    /// PdMSystemHybrid contract
    pub contract_address: Address,
    /// Groth16 verifier holding the per-circuit keys
    pub verifier_address: Address,
    /// Private key for signing transactions
    pub private_key: String,
    /// Per-call RPC timeout
    pub rpc_timeout: Duration,
}

/// Normalize a hex private key to `0x` + 64 hex digits
pub fn normalize_private_key(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() > 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LedgerError::Configuration(
            "private key must be at most 64 hex digits".into(),
        ));
    }
    Ok(format!("0x{:0>64}", digits.to_ascii_lowercase()))
}

/// `LedgerClient` over an HTTP provider with a local signer
pub struct AlloyLedgerClient {
    config: AnchorConfig,
    signer: PrivateKeySigner,
    access_registry: OnceCell<Address>,
}

// Submission calls differ only in the generated builder type
macro_rules! proof_call {
    ($contract:expr, $call:expr, $builder:ident => $body:expr) => {
        match $call {
            ProofCall::Sensor(c) => {
                let $builder = $contract.submitSensorDataProof(
                    U256::from(c.machine_id),
                    FixedBytes(c.data_hash),
                    FixedBytes(c.commitment_hash),
                    FixedBytes(c.storage_tag),
                    U256::from(c.sensor_count),
                    g1_array(&c.proof.a),
                    g2_array(&c.proof.b),
                    g1_array(&c.proof.c),
                    c.public_inputs.clone(),
                );
                $body
            }
            ProofCall::Prediction(c) => {
                let $builder = $contract.submitPredictionProof(
                    U256::from(c.data_proof_id),
                    FixedBytes(c.prediction_hash),
                    FixedBytes(c.model_commitment),
                    U256::from(c.prediction),
                    U256::from(c.confidence),
                    g1_array(&c.proof.a),
                    g2_array(&c.proof.b),
                    g1_array(&c.proof.c),
                    c.public_inputs.clone(),
                );
                $body
            }
        }
    };
}

impl AlloyLedgerClient {
    /// Create a client without touching the network
    pub fn new(config: AnchorConfig) -> Result<Self> {
        let key = normalize_private_key(&config.private_key)?;
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|e| LedgerError::Configuration(format!("Invalid private key: {}", e)))?;
        Ok(Self {
            config,
            signer,
            access_registry: OnceCell::new(),
        })
    }

    /// Create a client and check the node serves the configured chain
    pub async fn connect(config: AnchorConfig) -> Result<Self> {
        let client = Self::new(config)?;
        let actual = client.chain_id().await?;
        if actual != client.config.chain_id {
            return Err(LedgerError::ChainIdMismatch {
                expected: client.config.chain_id,
                actual,
            });
        }
        info!(
            chain_id = actual,
            account = %client.signer.address(),
            contract = %client.config.contract_address,
            "ledger client connected"
        );
        Ok(client)
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    fn provider(&self) -> Result<impl Provider<Http<Client>>> {
        let url = self
            .config
            .rpc_url
            .parse()
            .map_err(|e| LedgerError::Configuration(format!("Invalid RPC URL: {}", e)))?;
        Ok(ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(EthereumWallet::from(self.signer.clone()))
            .on_http(url))
    }

    /// Bound an RPC future by the configured timeout
    async fn rpc<T, E, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: IntoFuture<Output = std::result::Result<T, E>>,
        E: Display,
    {
        match tokio::time::timeout(self.config.rpc_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(LedgerError::Rpc(format!("{}: {}", what, e))),
            Err(_) => Err(LedgerError::Rpc(format!(
                "{} timed out after {}s",
                what,
                self.config.rpc_timeout.as_secs()
            ))),
        }
    }

    async fn registry_address(&self) -> Result<Address> {
        let address = self
            .access_registry
            .get_or_try_init(|| async {
                let provider = self.provider()?;
                let contract = IPdMSystemHybrid::new(self.config.contract_address, &provider);
                let result = self
                    .rpc("accessRegistry", contract.accessRegistry().call())
                    .await?;
                debug!(registry = %result._0, "access registry resolved");
                Ok::<_, LedgerError>(result._0)
            })
            .await?;
        Ok(*address)
    }

    async fn wait_for_receipt(
        &self,
        what: &str,
        pending: alloy::providers::PendingTransactionBuilder<Http<Client>, alloy::network::Ethereum>,
        timeout: Duration,
    ) -> Result<TransactionReceipt> {
        let tx_hash = pending.tx_hash().to_string();
        info!(tx_hash = %tx_hash, what, "transaction sent");
        pending
            .with_timeout(Some(timeout))
            .get_receipt()
            .await
            .map_err(|e| match e {
                PendingTransactionError::TxWatcher(WatchTxError::Timeout) => {
                    LedgerError::ConfirmationTimeout(tx_hash.clone())
                }
                other => LedgerError::Rpc(format!("{} receipt: {}", what, other)),
            })
    }
}

fn g1_array(point: &G1Point) -> [U256; 2] {
    [point.x, point.y]
}

fn g2_array(point: &G2Point) -> [[U256; 2]; 2] {
    [point.x, point.y]
}

fn to_sol_g1(point: &G1Point) -> IUnifiedGroth16Verifier::G1Point {
    IUnifiedGroth16Verifier::G1Point {
        X: point.x,
        Y: point.y,
    }
}

fn to_sol_g2(point: &G2Point) -> IUnifiedGroth16Verifier::G2Point {
    IUnifiedGroth16Verifier::G2Point {
        X: point.x,
        Y: point.y,
    }
}

fn from_sol_g1(point: &IUnifiedGroth16Verifier::G1Point) -> G1Point {
    G1Point {
        x: point.X,
        y: point.Y,
    }
}

fn from_sol_g2(point: &IUnifiedGroth16Verifier::G2Point) -> G2Point {
    G2Point {
        x: point.X,
        y: point.Y,
    }
}

/// Outcome fields shared by every mined transaction
fn outcome(receipt: &TransactionReceipt, proof_id_from_event: Option<u64>) -> TxOutcome {
    TxOutcome {
        tx_hash: receipt.transaction_hash.to_string(),
        block_number: receipt.block_number,
        gas_used: u64::try_from(receipt.gas_used).ok(),
        success: receipt.status(),
        proof_id_from_event,
    }
}

/// Proof id from the submission event of `circuit`, if the receipt carries one
fn proof_id_from_logs(receipt: &TransactionReceipt, circuit: CircuitId) -> Option<u64> {
    let id = receipt.inner.logs().iter().find_map(|log| match circuit {
        CircuitId::Sensor => log
            .log_decode::<IPdMSystemHybrid::SensorDataProofSubmitted>()
            .ok()
            .map(|event| event.inner.data.proofId),
        CircuitId::Prediction => log
            .log_decode::<IPdMSystemHybrid::PredictionProofSubmitted>()
            .ok()
            .map(|event| event.inner.data.proofId),
    })?;
    u64::try_from(id).ok().filter(|id| *id > 0)
}

#[async_trait]
impl LedgerClient for AlloyLedgerClient {
    fn account(&self) -> Address {
        self.signer.address()
    }

    async fn chain_id(&self) -> Result<u64> {
        let provider = self.provider()?;
        self.rpc("eth_chainId", provider.get_chain_id()).await
    }

    async fn is_data_hash_used(&self, hash: Hash256) -> Result<bool> {
        let provider = self.provider()?;
        let contract = IPdMSystemHybrid::new(self.config.contract_address, &provider);
        let result = self
            .rpc("usedDataHashes", contract.usedDataHashes(to_bytes32(&hash)).call())
            .await?;
        Ok(result._0)
    }

    async fn access_resource(&self, resource: AccessResource) -> Result<Hash256> {
        let provider = self.provider()?;
        let contract = IPdMSystemHybrid::new(self.config.contract_address, &provider);
        let id = match resource {
            AccessResource::SensorData => {
                self.rpc("SENSOR_DATA_RESOURCE", contract.SENSOR_DATA_RESOURCE().call())
                    .await?
                    ._0
            }
            AccessResource::Prediction => {
                self.rpc("PREDICTION_RESOURCE", contract.PREDICTION_RESOURCE().call())
                    .await?
                    ._0
            }
        };
        Ok(id.0)
    }

    async fn check_access(
        &self,
        account: Address,
        resource: Hash256,
        level: AccessLevel,
    ) -> Result<AccessDecision> {
        let registry_address = self.registry_address().await?;
        let provider = self.provider()?;
        let registry = IAccessControlRegistry::new(registry_address, &provider);
        let result = self
            .rpc(
                "checkAccess",
                registry
                    .checkAccess(account, to_bytes32(&resource), level.as_u8())
                    .call(),
            )
            .await?;
        Ok(AccessDecision {
            allowed: result.hasAccess,
            reason: result.reason,
        })
    }

    async fn circuit_key(&self, circuit: CircuitId) -> Result<OnChainVerifyingKey> {
        let provider = self.provider()?;
        let verifier = IUnifiedGroth16Verifier::new(self.config.verifier_address, &provider);
        let vk = self
            .rpc("circuitKeys", verifier.circuitKeys(circuit.index()).call())
            .await?
            ._0;
        Ok(OnChainVerifyingKey {
            key: VerifyingKey {
                alpha: from_sol_g1(&vk.alpha),
                beta: from_sol_g2(&vk.beta),
                gamma: from_sol_g2(&vk.gamma),
                delta: from_sol_g2(&vk.delta),
                ic: vk.IC.iter().map(from_sol_g1).collect(),
            },
            is_set: vk.isSet,
        })
    }

    async fn set_circuit_key(
        &self,
        circuit: CircuitId,
        key: &VerifyingKey,
        params: TxParams,
    ) -> Result<TxOutcome> {
        let provider = self.provider()?;
        let verifier = IUnifiedGroth16Verifier::new(self.config.verifier_address, &provider);
        let pending = verifier
            .setCircuitVerifyingKey(
                circuit.index(),
                to_sol_g1(&key.alpha),
                to_sol_g2(&key.beta),
                to_sol_g2(&key.gamma),
                to_sol_g2(&key.delta),
                key.ic.iter().map(to_sol_g1).collect(),
            )
            .from(self.account())
            .nonce(params.nonce)
            .gas(params.gas_limit)
            .gas_price(params.gas_price)
            .send()
            .await
            .map_err(|e| LedgerError::Rpc(format!("setCircuitVerifyingKey: {}", e)))?;

        let receipt = self
            .wait_for_receipt("setCircuitVerifyingKey", pending, params.confirmation_timeout)
            .await?;
        Ok(outcome(&receipt, None))
    }

    async fn estimate_gas(&self, call: &ProofCall) -> Result<u64> {
        let provider = self.provider()?;
        let contract = IPdMSystemHybrid::new(self.config.contract_address, &provider);
        let account = self.account();
        let estimate = proof_call!(contract, call, builder => {
            tokio::time::timeout(self.config.rpc_timeout, builder.from(account).estimate_gas()).await
        });
        match estimate {
            Ok(Ok(gas)) => Ok(gas),
            Ok(Err(e)) => Err(LedgerError::SimulationFailed(e.to_string())),
            Err(_) => Err(LedgerError::Rpc("eth_estimateGas timed out".into())),
        }
    }

    async fn call_for_proof_id(&self, call: &ProofCall) -> Result<u64> {
        let provider = self.provider()?;
        let contract = IPdMSystemHybrid::new(self.config.contract_address, &provider);
        let account = self.account();
        let proof_id = proof_call!(contract, call, builder => {
            self.rpc("eth_call", async { builder.from(account).call().await.map(|r| r.proofId) }).await?
        });
        u64::try_from(proof_id)
            .map_err(|_| LedgerError::Rpc(format!("proof id {} does not fit in u64", proof_id)))
    }

    async fn pending_nonce(&self) -> Result<u64> {
        let provider = self.provider()?;
        self.rpc(
            "eth_getTransactionCount",
            provider.get_transaction_count(self.account()).pending(),
        )
        .await
    }

    async fn gas_price(&self) -> Result<u128> {
        let provider = self.provider()?;
        self.rpc("eth_gasPrice", provider.get_gas_price()).await
    }

    async fn send(&self, call: &ProofCall, params: TxParams) -> Result<TxOutcome> {
        let provider = self.provider()?;
        let contract = IPdMSystemHybrid::new(self.config.contract_address, &provider);
        let account = self.account();
        let pending = proof_call!(contract, call, builder => {
            builder
                .from(account)
                .nonce(params.nonce)
                .gas(params.gas_limit)
                .gas_price(params.gas_price)
                .send()
                .await
        })
        .map_err(|e| LedgerError::Rpc(format!("send: {}", e)))?;

        let receipt = self
            .wait_for_receipt("proof submission", pending, params.confirmation_timeout)
            .await?;
        let proof_id = proof_id_from_logs(&receipt, call.circuit());
        if receipt.status() && proof_id.is_none() {
            warn!(tx_hash = %receipt.transaction_hash, "no proof id event in receipt");
        }
        Ok(outcome(&receipt, proof_id))
    }
}
