//! Domain models for the proof ledger
//!
//! Sensor, prediction and maintenance records, Groth16 proof artifacts, verifying keys and
//! the results of ledger submissions.

mod maintenance;
mod prediction;
mod proof;
mod sensor;
mod submission;
mod types;

pub use maintenance::*;
pub use prediction::*;
pub use proof::*;
pub use sensor::*;
pub use submission::*;
pub use types::*;
