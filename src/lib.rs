//! Predictive-maintenance proof ledger
//!
//! Sensor readings are committed with a Poseidon hash, stored off-chain,
//! proven with Groth16 circuits and anchored on an EVM ledger. Predictions
//! made over stored readings are bound to the confirmed sensor proof, and
//! maintenance tasks raised from predictions are committed and kept off-chain.
//!
//! ## Modules
//!
//! - [`domain`] - Sensor, prediction, maintenance and proof types
//! - [`crypto`] - Commitment hashing and field encodings
//! - [`infra`] - Errors, trait seams, SQLite stores, dual-write storage
//! - [`proof`] - circom/snarkjs proof pipeline
//! - [`anchor`] - Ledger client, verifying-key provisioning, submission
//! - [`service`] - End-to-end sensor, prediction and maintenance flows
//! - [`config`] - Environment configuration
//! - [`metrics`] - In-process counters and histograms
//! - [`telemetry`] - Logging setup

pub mod anchor;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod metrics;
pub mod migrations;
pub mod proof;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use config::LedgerConfig;
pub use crypto::CommitmentHasher;
pub use domain::{
    ChainStatus, ChainSubmissionResult, CircuitId, CommitmentHash, Hash256, MachineType,
    MaintenanceInput, MaintenancePriority, MaintenanceTaskType, PredictionInput, SensorReading,
};
pub use infra::{ErrorCategory, LedgerError, Result};
pub use service::{HybridLedgerService, SensorLookup};
