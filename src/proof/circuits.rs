//! Circuit descriptions and witness-input builders

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::Serialize;

use crate::crypto::{hash_to_u256, string_to_field};
use crate::domain::{CircuitId, CommitmentHash, PredictionInput, SensorReading};
use crate::infra::{LedgerError, Result};

/// Upper bound (exclusive) of the random blinding nonce
pub const NONCE_BOUND: u64 = 100_000;

/// Static description of one circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSpec {
    pub id: CircuitId,
    /// Artifact stem: `<name>.circom`, `<name>.r1cs`, `<name>.zkey`, `<name>_js/<name>.wasm`
    pub name: &'static str,
    /// Public signals in the order the verifier expects them
    pub public_inputs: [&'static str; 3],
}

pub const SENSOR_CIRCUIT: CircuitSpec = CircuitSpec {
    id: CircuitId::Sensor,
    name: "sensor_data_proof",
    public_inputs: ["machineId", "timestamp", "dataCommitment"],
};

pub const PREDICTION_CIRCUIT: CircuitSpec = CircuitSpec {
    id: CircuitId::Prediction,
    name: "prediction_proof",
    public_inputs: ["dataProofId", "modelHash", "timestamp"],
};

impl CircuitSpec {
    pub fn for_circuit(id: CircuitId) -> Self {
        match id {
            CircuitId::Sensor => SENSOR_CIRCUIT,
            CircuitId::Prediction => PREDICTION_CIRCUIT,
        }
    }

    pub fn source_path(&self, circuit_dir: &Path) -> PathBuf {
        circuit_dir.join(format!("{}.circom", self.name))
    }

    pub fn r1cs_path(&self, artifact_dir: &Path) -> PathBuf {
        artifact_dir.join(format!("{}.r1cs", self.name))
    }

    pub fn wasm_path(&self, artifact_dir: &Path) -> PathBuf {
        artifact_dir
            .join(format!("{}_js", self.name))
            .join(format!("{}.wasm", self.name))
    }

    pub fn zkey_path(&self, artifact_dir: &Path) -> PathBuf {
        artifact_dir.join(format!("{}.zkey", self.name))
    }

    pub fn verifying_key_path(&self, artifact_dir: &Path) -> PathBuf {
        artifact_dir.join(format!("{}_verification_key.json", self.name))
    }
}

/// Witness input: signal name to decimal string.
///
/// Values never travel as JSON numbers, which would lose precision above 2^53.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CircuitInputs(BTreeMap<String, String>);

impl CircuitInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, signal: &str, value: impl ToString) -> Self {
        self.0.insert(signal.to_string(), value.to_string());
        self
    }

    pub fn get(&self, signal: &str) -> Option<&str> {
        self.0.get(signal).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn blinding_nonce() -> u64 {
    rand::thread_rng().gen_range(0..NONCE_BOUND)
}

/// Inputs for the sensor circuit.
///
/// The commitment must be the Poseidon digest of the reading's scaled values;
/// the circuit enforces it.
pub fn sensor_inputs(reading: &SensorReading, commitment: &CommitmentHash) -> Result<CircuitInputs> {
    let scaled = reading.validate()?;
    Ok(CircuitInputs::new()
        .with("machineId", reading.machine_id)
        .with("timestamp", reading.timestamp)
        .with("dataCommitment", hash_to_u256(commitment))
        .with("airTemperature", scaled.air_temperature)
        .with("processTemperature", scaled.process_temperature)
        .with("rotationalSpeed", scaled.rotational_speed)
        .with("torque", scaled.torque)
        .with("toolWear", scaled.tool_wear)
        .with("machineType", scaled.machine_type)
        .with("nonce", blinding_nonce()))
}

/// Inputs for the prediction circuit, bound to a confirmed sensor proof id
pub fn prediction_inputs(input: &PredictionInput, data_proof_id: u64) -> Result<CircuitInputs> {
    if data_proof_id == 0 {
        return Err(LedgerError::MissingDataProofId);
    }
    input.validate()?;
    Ok(CircuitInputs::new()
        .with("dataProofId", data_proof_id)
        .with("modelHash", hash_to_u256(&string_to_field(&input.model_version)))
        .with("timestamp", input.timestamp)
        .with("prediction", input.label)
        .with("confidence", input.confidence()?)
        .with("nonce", blinding_nonce()))
}

/// Source of the sensor circuit, written when the circuit directory has none
pub const SENSOR_CIRCUIT_SOURCE: &str = r#"pragma circom 2.0.0;
include "circomlib/circuits/poseidon.circom";
include "circomlib/circuits/comparators.circom";

template RangeCheck(bits, lo, hi) {
    signal input value;
    component ge = GreaterEqThan(bits);
    ge.in[0] <== value;
    ge.in[1] <== lo;
    ge.out === 1;
    component le = LessEqThan(bits);
    le.in[0] <== value;
    le.in[1] <== hi;
    le.out === 1;
}

template SensorDataProof() {
    signal input machineId;
    signal input timestamp;
    signal input dataCommitment;

    signal input airTemperature;
    signal input processTemperature;
    signal input rotationalSpeed;
    signal input torque;
    signal input toolWear;
    signal input machineType;
    signal input nonce;

    component hasher = Poseidon(6);
    hasher.inputs[0] <== airTemperature;
    hasher.inputs[1] <== processTemperature;
    hasher.inputs[2] <== rotationalSpeed;
    hasher.inputs[3] <== torque;
    hasher.inputs[4] <== toolWear;
    hasher.inputs[5] <== machineType;
    dataCommitment === hasher.out;

    component air = RangeCheck(16, 29500, 30500);
    air.value <== airTemperature;
    component process = RangeCheck(16, 30500, 31500);
    process.value <== processTemperature;
    component speed = RangeCheck(12, 1000, 3000);
    speed.value <== rotationalSpeed;
    component tq = RangeCheck(13, 300, 7700);
    tq.value <== torque;
    component wear = RangeCheck(9, 0, 300);
    wear.value <== toolWear;
    component kind = RangeCheck(2, 1, 3);
    kind.value <== machineType;

    signal blind;
    blind <== nonce * nonce;
}

component main { public [machineId, timestamp, dataCommitment] } = SensorDataProof();
"#;

/// Write the bundled sensor circuit if `path` does not exist yet
pub fn ensure_sensor_source(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, SENSOR_CIRCUIT_SOURCE)?;
    Ok(true)
}
