//! Ledger anchoring
//!
//! Everything that talks to the ledger contract: generated bindings, the
//! alloy client, verifying-key provisioning, the access pre-flight and the
//! proof submitter.

mod access;
mod call;
mod client;
pub mod contracts;
mod provisioner;
pub mod revert;
mod submitter;

pub use access::AccessControlGate;
pub use call::{
    gwei_to_wei, GasPolicy, PredictionProofCall, ProofCall, SensorProofCall, TxOutcome, TxParams,
};
pub use client::{normalize_private_key, AlloyLedgerClient, AnchorConfig};
pub use provisioner::{VerifyingKeyProvisioner, DEFAULT_VK_GAS_LIMIT};
pub use submitter::{ChainSubmitter, SubmitterConfig, WriteBack, DEFAULT_SUBMISSION_GAS_LIMIT};
