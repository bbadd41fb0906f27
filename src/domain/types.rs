//! Core type definitions shared by records, proofs and submissions

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 32-byte big-endian value (field element or digest)
pub type Hash256 = [u8; 32];

/// A commitment rendered as `0x` + 64 lower-case hex characters.
///
/// Used both as the storage deduplication key and as the third public input
/// of the sensor circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitmentHash(pub Hash256);

impl CommitmentHash {
    pub fn from_bytes(bytes: Hash256) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &Hash256 {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for CommitmentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for CommitmentHash {
    type Err = String;

    /// Accepts an optional `0x` prefix and left-pads short values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
        if digits.is_empty() || digits.len() > 64 {
            return Err(format!("invalid commitment hash length: {}", s));
        }
        let padded = format!("{:0>64}", digits);
        let bytes = hex::decode(&padded).map_err(|e| format!("invalid commitment hash: {}", e))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for CommitmentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CommitmentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Machine quality variant, encoded in the circuit as 1/2/3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineType {
    #[serde(rename = "L")]
    Low,
    #[serde(rename = "M")]
    Medium,
    #[serde(rename = "H")]
    High,
}

impl MachineType {
    pub fn code(&self) -> &'static str {
        match self {
            MachineType::Low => "L",
            MachineType::Medium => "M",
            MachineType::High => "H",
        }
    }

    pub fn field_value(&self) -> u64 {
        match self {
            MachineType::Low => 1,
            MachineType::Medium => 2,
            MachineType::High => 3,
        }
    }

    pub fn from_field_value(v: u64) -> Option<Self> {
        match v {
            1 => Some(MachineType::Low),
            2 => Some(MachineType::Medium),
            3 => Some(MachineType::High),
            _ => None,
        }
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MachineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L" | "1" => Ok(MachineType::Low),
            "M" | "2" => Ok(MachineType::Medium),
            "H" | "3" => Ok(MachineType::High),
            other => Err(format!("unknown machine type: {}", other)),
        }
    }
}

/// Ledger status of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    #[default]
    LocalOnly,
    OnchainSuccess,
    OnchainFailed,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStatus::LocalOnly => "local_only",
            ChainStatus::OnchainSuccess => "onchain_success",
            ChainStatus::OnchainFailed => "onchain_failed",
        }
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            ChainStatus::OnchainSuccess
        } else {
            ChainStatus::OnchainFailed
        }
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_only" => Ok(ChainStatus::LocalOnly),
            "onchain_success" => Ok(ChainStatus::OnchainSuccess),
            "onchain_failed" => Ok(ChainStatus::OnchainFailed),
            other => Err(format!("unknown chain status: {}", other)),
        }
    }
}

/// Circuits known to the verifier contract.
///
/// The discriminant is the contract's circuit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitId {
    Sensor,
    Prediction,
}

impl CircuitId {
    pub const ALL: [CircuitId; 2] = [CircuitId::Sensor, CircuitId::Prediction];

    pub fn index(&self) -> u8 {
        match self {
            CircuitId::Sensor => 0,
            CircuitId::Prediction => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CircuitId::Sensor => "sensor",
            CircuitId::Prediction => "prediction",
        }
    }

    /// Number of public inputs the on-chain verifier expects
    pub fn public_input_arity(&self) -> usize {
        3
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Aggregate counts reported by a store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStatistics {
    pub sensor_records: u64,
    pub prediction_records: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub local_only: u64,
    pub maintenance_tasks: u64,
    pub open_maintenance_tasks: u64,
    pub by_machine_type: Vec<(String, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_hash_display_is_66_chars() {
        let hash = CommitmentHash([0xab; 32]);
        let rendered = hash.to_string();
        assert_eq!(rendered.len(), 66);
        assert!(rendered.starts_with("0x"));
        assert_eq!(rendered, hash.to_hex());
    }

    #[test]
    fn test_commitment_hash_parse_pads_short_values() {
        let parsed: CommitmentHash = "0x1".parse().unwrap();
        let mut expected = [0u8; 32];
        expected[31] = 1;
        assert_eq!(parsed.0, expected);
        assert!("0x".parse::<CommitmentHash>().is_err());
        assert!(format!("0x{}", "f".repeat(65)).parse::<CommitmentHash>().is_err());
    }

    #[test]
    fn test_machine_type_codes() {
        assert_eq!("m".parse::<MachineType>().unwrap(), MachineType::Medium);
        assert_eq!(MachineType::High.field_value(), 3);
        assert_eq!(MachineType::from_field_value(1), Some(MachineType::Low));
        assert!("X".parse::<MachineType>().is_err());
    }

    #[test]
    fn test_chain_status_round_trip_strings() {
        for status in [
            ChainStatus::LocalOnly,
            ChainStatus::OnchainSuccess,
            ChainStatus::OnchainFailed,
        ] {
            assert_eq!(status.as_str().parse::<ChainStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_circuit_indices() {
        assert_eq!(CircuitId::Sensor.index(), 0);
        assert_eq!(CircuitId::Prediction.index(), 1);
        assert_eq!(CircuitId::Prediction.public_input_arity(), 3);
    }
}
