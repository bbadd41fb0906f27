//! Cryptographic utilities for the proof ledger
//!
//! Provides:
//! - Circom-compatible Poseidon commitments (sensor data, predictions)
//! - Field encodings for strings and 32-byte contract slots
//! - Storage-tag encoding for off-chain identifiers

mod encoding;
mod poseidon;

pub use encoding::*;
pub use poseidon::*;
