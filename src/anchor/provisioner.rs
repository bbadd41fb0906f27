//! Verifying-key provisioning
//!
//! Before a proof for a circuit is submitted, the verifier contract must hold
//! exactly the verifying key derived from the local proving key. The
//! provisioner compares both, uploads the local key at most once per
//! `ensure_ready` call, and caches readiness per circuit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::call::GasPolicy;
use crate::domain::CircuitId;
use crate::infra::{LedgerClient, LedgerError, Result, VerifyingKeySource};

/// Default gas limit for `setCircuitVerifyingKey`
pub const DEFAULT_VK_GAS_LIMIT: u64 = 5_000_000;

pub struct VerifyingKeyProvisioner {
    client: Arc<dyn LedgerClient>,
    sources: HashMap<CircuitId, Arc<dyn VerifyingKeySource>>,
    ready: RwLock<HashSet<CircuitId>>,
    gas: GasPolicy,
    vk_gas_limit: u64,
}

impl VerifyingKeyProvisioner {
    pub fn new(client: Arc<dyn LedgerClient>, gas: GasPolicy, vk_gas_limit: u64) -> Self {
        Self {
            client,
            sources: HashMap::new(),
            ready: RwLock::new(HashSet::new()),
            gas,
            vk_gas_limit,
        }
    }

    /// Register the local key source for its circuit
    pub fn with_source(mut self, source: Arc<dyn VerifyingKeySource>) -> Self {
        self.sources.insert(source.circuit(), source);
        self
    }

    fn source(&self, circuit: CircuitId) -> Result<&Arc<dyn VerifyingKeySource>> {
        self.sources.get(&circuit).ok_or_else(|| {
            LedgerError::Configuration(format!("no verifying key source for {} circuit", circuit))
        })
    }

    /// Whether the on-chain key equals the local key. Always reads the chain.
    pub async fn is_ready(&self, circuit: CircuitId) -> Result<bool> {
        let on_chain = self.client.circuit_key(circuit).await?;
        let ready = if on_chain.is_set {
            let local = self.source(circuit)?.local_verifying_key().await?;
            on_chain.matches(&local)
        } else {
            false
        };

        let mut cache = self.ready.write().await;
        if ready {
            cache.insert(circuit);
        } else {
            cache.remove(&circuit);
        }
        debug!(circuit = %circuit, is_set = on_chain.is_set, ready, "verifying key checked");
        Ok(ready)
    }

    /// Make the on-chain key match the local key, uploading it at most once
    pub async fn ensure_ready(&self, circuit: CircuitId) -> Result<()> {
        if self.ready.read().await.contains(&circuit) {
            return Ok(());
        }
        if self.is_ready(circuit).await? {
            return Ok(());
        }

        let local = self.source(circuit)?.local_verifying_key().await?;
        info!(circuit = %circuit, ic_len = local.ic.len(), "uploading verifying key");

        let params = self.gas.params(self.client.as_ref(), self.vk_gas_limit).await?;
        let outcome = self.client.set_circuit_key(circuit, &local, params).await?;
        if !outcome.success {
            return Err(LedgerError::TransactionReverted(format!(
                "verifying key upload {} reverted",
                outcome.tx_hash
            )));
        }

        if self.is_ready(circuit).await? {
            info!(circuit = %circuit, tx_hash = %outcome.tx_hash, "verifying key configured");
            Ok(())
        } else {
            warn!(circuit = %circuit, "on-chain verifying key still differs after upload");
            Err(LedgerError::VerifierKeyNotConfigured(format!(
                "{} circuit key mismatch after upload",
                circuit
            )))
        }
    }

    /// Forget cached readiness, forcing the next `ensure_ready` to read the chain
    pub async fn invalidate(&self, circuit: CircuitId) {
        if self.ready.write().await.remove(&circuit) {
            debug!(circuit = %circuit, "verifying key readiness invalidated");
        }
    }
}
