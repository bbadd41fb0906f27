//! Sensor telemetry and its stored form

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChainStatus, CommitmentHash, MachineType};
use crate::infra::{LedgerError, Result};

/// Fixed-point factor applied to temperatures and torque
pub const SCALE_HUNDREDTHS: f64 = 100.0;

/// Accepted circuit ranges, in scaled units
pub const AIR_TEMPERATURE_RANGE: (u64, u64) = (29_500, 30_500);
pub const PROCESS_TEMPERATURE_RANGE: (u64, u64) = (30_500, 31_500);
pub const ROTATIONAL_SPEED_RANGE: (u64, u64) = (1_000, 3_000);
pub const TORQUE_RANGE: (u64, u64) = (300, 7_700);
pub const MAX_TOOL_WEAR: u64 = 300;

/// One telemetry sample as entered by an operator or fed by a collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub machine_id: u64,
    /// Unix seconds
    pub timestamp: i64,
    /// Kelvin
    pub air_temperature: f64,
    /// Kelvin
    pub process_temperature: f64,
    /// rpm
    pub rotational_speed: u32,
    /// Nm
    pub torque: f64,
    /// minutes
    pub tool_wear: u32,
    pub machine_type: MachineType,
}

/// Integer view of a reading, in the order the commitment hashes them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScaledSensorValues {
    pub air_temperature: u64,
    pub process_temperature: u64,
    pub rotational_speed: u64,
    pub torque: u64,
    pub tool_wear: u64,
    pub machine_type: u64,
}

impl ScaledSensorValues {
    pub fn as_array(&self) -> [u64; 6] {
        [
            self.air_temperature,
            self.process_temperature,
            self.rotational_speed,
            self.torque,
            self.tool_wear,
            self.machine_type,
        ]
    }
}

/// Scale a fractional value to an integer, rounding to nearest.
///
/// Truncating scalers disagree for inputs just below a step: `4.35 * 100.0`
/// evaluates to `434.99999999999994`, which truncates to `434` but rounds to
/// `435`. Commitments over such readings differ from ones computed by
/// truncation.
///
/// Negative or non-finite values cannot be represented as field elements.
pub fn scale_fixed(value: f64, factor: f64, field: &str) -> Result<u64> {
    if !value.is_finite() {
        return Err(LedgerError::Validation(format!("{} is not finite", field)));
    }
    let scaled = (value * factor).round();
    if scaled < 0.0 || scaled > u64::MAX as f64 {
        return Err(LedgerError::Validation(format!(
            "{} out of representable range: {}",
            field, value
        )));
    }
    Ok(scaled as u64)
}

fn check_range(field: &str, value: u64, (min, max): (u64, u64)) -> Result<()> {
    if value < min || value > max {
        return Err(LedgerError::Validation(format!(
            "{} {} outside [{}, {}]",
            field, value, min, max
        )));
    }
    Ok(())
}

impl SensorReading {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine_id: u64,
        timestamp: i64,
        air_temperature: f64,
        process_temperature: f64,
        rotational_speed: u32,
        torque: f64,
        tool_wear: u32,
        machine_type: MachineType,
    ) -> Self {
        Self {
            machine_id,
            timestamp,
            air_temperature,
            process_temperature,
            rotational_speed,
            torque,
            tool_wear,
            machine_type,
        }
    }

    /// Fixed-point values fed to the commitment and the circuit
    pub fn scaled(&self) -> Result<ScaledSensorValues> {
        Ok(ScaledSensorValues {
            air_temperature: scale_fixed(self.air_temperature, SCALE_HUNDREDTHS, "air_temperature")?,
            process_temperature: scale_fixed(
                self.process_temperature,
                SCALE_HUNDREDTHS,
                "process_temperature",
            )?,
            rotational_speed: u64::from(self.rotational_speed),
            torque: scale_fixed(self.torque, SCALE_HUNDREDTHS, "torque")?,
            tool_wear: u64::from(self.tool_wear),
            machine_type: self.machine_type.field_value(),
        })
    }

    /// Reject readings the sensor circuit would not accept
    pub fn validate(&self) -> Result<ScaledSensorValues> {
        if self.machine_id == 0 {
            return Err(LedgerError::Validation("machine_id must be positive".into()));
        }
        if self.timestamp <= 0 {
            return Err(LedgerError::Validation("timestamp must be positive".into()));
        }
        let scaled = self.scaled()?;
        check_range("air_temperature", scaled.air_temperature, AIR_TEMPERATURE_RANGE)?;
        check_range(
            "process_temperature",
            scaled.process_temperature,
            PROCESS_TEMPERATURE_RANGE,
        )?;
        check_range("rotational_speed", scaled.rotational_speed, ROTATIONAL_SPEED_RANGE)?;
        check_range("torque", scaled.torque, TORQUE_RANGE)?;
        check_range("tool_wear", scaled.tool_wear, (0, MAX_TOOL_WEAR))?;
        Ok(scaled)
    }
}

/// Ledger-facing fields a record gains after ingestion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub status: ChainStatus,
    pub tx_hash: Option<String>,
    pub proof_id: Option<u64>,
    pub block_number: Option<u64>,
    pub last_error: Option<String>,
}

impl ChainState {
    /// Proof id usable as a prediction reference
    pub fn confirmed_proof_id(&self) -> Option<u64> {
        match (self.status, self.proof_id) {
            (ChainStatus::OnchainSuccess, Some(id)) if id > 0 => Some(id),
            _ => None,
        }
    }
}

/// Record handed to a store for insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSensorRecord {
    pub reading: SensorReading,
    pub commitment: CommitmentHash,
    pub submitter: Option<String>,
}

/// A persisted sensor record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub id: i64,
    pub reading: SensorReading,
    pub commitment: CommitmentHash,
    pub submitter: Option<String>,
    pub chain: ChainState,
    pub created_at: DateTime<Utc>,
}

impl SensorRecord {
    /// Identifier stored on-chain as the storage tag
    pub fn storage_location(&self) -> String {
        storage_location_for(self.id)
    }
}

pub fn storage_location_for(id: i64) -> String {
    format!("sensor_{}", id)
}

/// Outcome of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub commitment: CommitmentHash,
    /// False when the content hash already existed
    pub created: bool,
}
