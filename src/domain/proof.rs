//! Groth16 proof and verifying-key types
//!
//! Parsing follows the JSON layout written by snarkjs: coordinates are decimal
//! (occasionally `0x` hex) strings, G1 points carry a trailing projective `"1"`
//! and G2 points a trailing `["1", "0"]`, both ignored here.

use alloy::primitives::U256;
use serde_json::Value;

use super::CircuitId;
use crate::infra::{LedgerError, Result};

/// Point on G1 in affine coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct G1Point {
    pub x: U256,
    pub y: U256,
}

/// Point on G2; each coordinate is an Fp2 element `[c0, c1]` as the toolchain emits it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct G2Point {
    pub x: [U256; 2],
    pub y: [U256; 2],
}

impl G2Point {
    /// Same point with each Fp2 pair written in the opposite component order
    pub fn swapped(&self) -> Self {
        Self {
            x: [self.x[1], self.x[0]],
            y: [self.y[1], self.y[0]],
        }
    }
}

/// Coordinate order used when handing G2 points to the verifier contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum G2Encoding {
    /// As emitted by the toolchain
    Native,
    /// Fp2 components reversed
    Swapped,
}

impl G2Encoding {
    pub fn apply(&self, point: &G2Point) -> G2Point {
        match self {
            G2Encoding::Native => *point,
            G2Encoding::Swapped => point.swapped(),
        }
    }

    pub fn alternate(&self) -> Self {
        match self {
            G2Encoding::Native => G2Encoding::Swapped,
            G2Encoding::Swapped => G2Encoding::Native,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Groth16Proof {
    pub a: G1Point,
    pub b: G2Point,
    pub c: G1Point,
}

/// Output of one proving run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofArtifact {
    pub circuit: CircuitId,
    pub proof: Groth16Proof,
    /// Exactly `circuit.public_input_arity()` values
    pub public_inputs: Vec<U256>,
}

impl ProofArtifact {
    /// Build an artifact from the toolchain's `proof.json` and `public.json`.
    ///
    /// Values past the circuit's arity are dropped, never reinterpreted.
    pub fn from_snarkjs(circuit: CircuitId, proof_json: &Value, public_json: &Value) -> Result<Self> {
        let proof = parse_proof(proof_json)?;
        let values = public_json
            .as_array()
            .ok_or_else(|| LedgerError::MalformedArtifact("public inputs must be an array".into()))?;
        let mut public_inputs = values
            .iter()
            .map(parse_field)
            .collect::<Result<Vec<_>>>()?;

        let arity = circuit.public_input_arity();
        if public_inputs.len() < arity {
            return Err(LedgerError::MalformedArtifact(format!(
                "{} circuit expects {} public inputs, toolchain returned {}",
                circuit,
                arity,
                public_inputs.len()
            )));
        }
        public_inputs.truncate(arity);

        Ok(Self {
            circuit,
            proof,
            public_inputs,
        })
    }

    /// Third public input of the sensor circuit, as bytes32
    pub fn data_commitment(&self) -> Option<[u8; 32]> {
        self.public_inputs.get(2).map(|v| v.to_be_bytes::<32>())
    }
}

/// Verifying key for one circuit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifyingKey {
    pub alpha: G1Point,
    pub beta: G2Point,
    pub gamma: G2Point,
    pub delta: G2Point,
    pub ic: Vec<G1Point>,
}

impl VerifyingKey {
    /// Parse `verification_key.json` as exported by snarkjs
    pub fn from_snarkjs(json: &Value) -> Result<Self> {
        let ic = json
            .get("IC")
            .and_then(Value::as_array)
            .ok_or_else(|| LedgerError::MalformedArtifact("verifying key has no IC array".into()))?
            .iter()
            .map(parse_g1)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            alpha: parse_g1(field(json, "vk_alpha_1")?)?,
            beta: parse_g2(field(json, "vk_beta_2")?)?,
            gamma: parse_g2(field(json, "vk_gamma_2")?)?,
            delta: parse_g2(field(json, "vk_delta_2")?)?,
            ic,
        })
    }
}

/// Key record as read from the verifier contract
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OnChainVerifyingKey {
    pub key: VerifyingKey,
    pub is_set: bool,
}

impl OnChainVerifyingKey {
    /// Coordinate-wise equality with a locally derived key.
    ///
    /// IC is compared only when the contract exposes it.
    pub fn matches(&self, local: &VerifyingKey) -> bool {
        if !self.is_set {
            return false;
        }
        let remote = &self.key;
        let points_match = remote.alpha == local.alpha
            && remote.beta == local.beta
            && remote.gamma == local.gamma
            && remote.delta == local.delta;
        let ic_match = remote.ic.is_empty() || remote.ic == local.ic;
        points_match && ic_match
    }
}

fn field<'a>(json: &'a Value, name: &str) -> Result<&'a Value> {
    json.get(name)
        .ok_or_else(|| LedgerError::MalformedArtifact(format!("missing field {}", name)))
}

/// Parse a decimal or `0x`-prefixed field element
pub fn parse_field(value: &Value) -> Result<U256> {
    let parsed = match value {
        Value::String(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => U256::from_str_radix(hex, 16),
                None => U256::from_str_radix(s, 10),
            };
            parsed.map_err(|e| {
                LedgerError::MalformedArtifact(format!("bad field element {}: {}", s, e))
            })?
        }
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| LedgerError::MalformedArtifact(format!("bad field element {}", n)))?,
        other => {
            return Err(LedgerError::MalformedArtifact(format!(
                "bad field element {}",
                other
            )))
        }
    };
    Ok(parsed)
}

fn parse_g1(value: &Value) -> Result<G1Point> {
    let coords = value
        .as_array()
        .filter(|c| c.len() >= 2)
        .ok_or_else(|| LedgerError::MalformedArtifact("G1 point needs two coordinates".into()))?;
    Ok(G1Point {
        x: parse_field(&coords[0])?,
        y: parse_field(&coords[1])?,
    })
}

fn parse_fp2(value: &Value) -> Result<[U256; 2]> {
    let pair = value
        .as_array()
        .filter(|c| c.len() >= 2)
        .ok_or_else(|| LedgerError::MalformedArtifact("Fp2 element needs two components".into()))?;
    Ok([parse_field(&pair[0])?, parse_field(&pair[1])?])
}

fn parse_g2(value: &Value) -> Result<G2Point> {
    let coords = value
        .as_array()
        .filter(|c| c.len() >= 2)
        .ok_or_else(|| LedgerError::MalformedArtifact("G2 point needs two coordinates".into()))?;
    Ok(G2Point {
        x: parse_fp2(&coords[0])?,
        y: parse_fp2(&coords[1])?,
    })
}

fn parse_proof(json: &Value) -> Result<Groth16Proof> {
    let pick = |primary: &str, alias: &str| {
        json.get(primary)
            .or_else(|| json.get(alias))
            .ok_or_else(|| LedgerError::MalformedArtifact(format!("proof has no {}", primary)))
    };
    Ok(Groth16Proof {
        a: parse_g1(pick("pi_a", "a")?)?,
        b: parse_g2(pick("pi_b", "b")?)?,
        c: parse_g1(pick("pi_c", "c")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn proof_json() -> Value {
        json!({
            "pi_a": ["1", "2", "1"],
            "pi_b": [["3", "4"], ["5", "6"], ["1", "0"]],
            "pi_c": ["7", "0x8", "1"],
            "protocol": "groth16",
            "curve": "bn128"
        })
    }

    #[test]
    fn test_parse_proof_and_truncate_public_inputs() {
        let public = json!(["11", "1700000000", "0x2a", "99", "100"]);
        let artifact = ProofArtifact::from_snarkjs(CircuitId::Sensor, &proof_json(), &public).unwrap();

        assert_eq!(artifact.public_inputs.len(), 3);
        assert_eq!(artifact.public_inputs[2], U256::from(42u64));
        assert_eq!(artifact.proof.b.x, [U256::from(3u64), U256::from(4u64)]);
        assert_eq!(artifact.proof.c.y, U256::from(8u64));
    }

    #[test]
    fn test_short_public_inputs_rejected() {
        let public = json!(["1", "2"]);
        let err = ProofArtifact::from_snarkjs(CircuitId::Prediction, &proof_json(), &public);
        assert!(matches!(err, Err(LedgerError::MalformedArtifact(_))));
    }

    #[test]
    fn test_aliased_proof_keys() {
        let proof = json!({
            "a": ["1", "2"],
            "b": [["3", "4"], ["5", "6"]],
            "c": ["7", "8"]
        });
        let public = json!(["1", "2", "3"]);
        assert!(ProofArtifact::from_snarkjs(CircuitId::Sensor, &proof, &public).is_ok());
    }

    #[test]
    fn test_g2_swap() {
        let p = G2Point {
            x: [U256::from(1u64), U256::from(2u64)],
            y: [U256::from(3u64), U256::from(4u64)],
        };
        let s = G2Encoding::Swapped.apply(&p);
        assert_eq!(s.x, [U256::from(2u64), U256::from(1u64)]);
        assert_eq!(s.y, [U256::from(4u64), U256::from(3u64)]);
        assert_eq!(s.swapped(), p);
        assert_eq!(G2Encoding::Native.alternate(), G2Encoding::Swapped);
    }

    #[test]
    fn test_verifying_key_comparison() {
        let vk_json = json!({
            "protocol": "groth16",
            "vk_alpha_1": ["1", "2", "1"],
            "vk_beta_2": [["3", "4"], ["5", "6"], ["1", "0"]],
            "vk_gamma_2": [["7", "8"], ["9", "10"], ["1", "0"]],
            "vk_delta_2": [["11", "12"], ["13", "14"], ["1", "0"]],
            "IC": [["15", "16", "1"], ["17", "18", "1"]]
        });
        let local = VerifyingKey::from_snarkjs(&vk_json).unwrap();
        assert_eq!(local.ic.len(), 2);

        let mut remote = OnChainVerifyingKey {
            key: local.clone(),
            is_set: true,
        };
        assert!(remote.matches(&local));

        remote.key.ic.clear();
        assert!(remote.matches(&local));

        remote.key.delta = remote.key.delta.swapped();
        assert!(!remote.matches(&local));

        let unset = OnChainVerifyingKey {
            key: local.clone(),
            is_set: false,
        };
        assert!(!unset.matches(&local));
    }
}
