//! Encodings between off-chain identifiers and on-chain 32-byte slots

use alloy::primitives::{keccak256, FixedBytes, U256};
use ark_bn254::Fr;
use ark_ff::PrimeField;
use sha2::{Digest, Sha256};

use super::poseidon::fr_to_bytes;
use crate::domain::{CommitmentHash, Hash256};

/// Bytes of a string folded into a field element; 30 bytes stay below the modulus
pub const FIELD_STRING_BYTES: usize = 30;

/// Field element for an arbitrary string (model versions).
///
/// Little-endian integer of the first 30 UTF-8 bytes, reduced mod p.
pub fn string_to_field(value: &str) -> CommitmentHash {
    let bytes = value.as_bytes();
    let prefix = &bytes[..bytes.len().min(FIELD_STRING_BYTES)];
    CommitmentHash(fr_to_bytes(&Fr::from_le_bytes_mod_order(prefix)))
}

/// 32-byte storage tag for an off-chain identifier.
///
/// Identifiers up to 32 bytes are stored verbatim and zero-padded; longer ones
/// are replaced by their SHA-256 digest and kept in full off-chain only.
pub fn storage_tag(identifier: &str) -> Hash256 {
    let bytes = identifier.as_bytes();
    if bytes.len() <= 32 {
        let mut out = [0u8; 32];
        out[..bytes.len()].copy_from_slice(bytes);
        out
    } else {
        Sha256::digest(bytes).into()
    }
}

/// keccak256 of the model version text, as the prediction call takes it
pub fn model_commitment(model_version: &str) -> Hash256 {
    keccak256(model_version.as_bytes()).0
}

pub fn to_bytes32(hash: &Hash256) -> FixedBytes<32> {
    FixedBytes::from_slice(hash)
}

pub fn hash_to_u256(hash: &CommitmentHash) -> U256 {
    U256::from_be_bytes(*hash.as_bytes())
}

pub fn u256_to_hash(value: U256) -> CommitmentHash {
    CommitmentHash(value.to_be_bytes::<32>())
}
