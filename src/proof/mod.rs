//! Zero-knowledge proof generation
//!
//! - `circuits`: circuit descriptions and witness-input builders
//! - `toolchain`: circom/snarkjs child-process implementation of `ProofToolchain`
//! - `pipeline`: per-circuit compile, setup, witness and prove lifecycle

pub mod circuits;
mod pipeline;
mod toolchain;

pub use circuits::{
    prediction_inputs, sensor_inputs, CircuitInputs, CircuitSpec, PREDICTION_CIRCUIT,
    SENSOR_CIRCUIT,
};
pub use pipeline::{PipelineConfig, PipelineStage, ProofPipeline, PTAU_CANDIDATES};
pub use toolchain::{SnarkjsToolchain, ToolchainConfig, ToolchainTimeouts};
