//! SNARK-friendly hashing for the atlas.
//!
//! Every node of every tree in a snapshot is a Poseidon hash over the BN254
//! scalar field with the circom-compatible parameters, so roots and proofs
//! can be recomputed inside a circuit. No other hash family is mixed into a
//! tree.
//!
//! ## Arity as domain separation
//!
//! | Arity | Used for |
//! |-------|----------|
//! | 2 | internal tree nodes, string absorption, the final root wrap |
//! | 3 | leaves (with a leading tag), coordinates |
//! | 4 | identity digest, layer entries (with a leading tag) |
//! | 5 | provenance fetch digest |
//!
//! Poseidon instances with different arities use different round constants,
//! so a leaf can never be reinterpreted as an internal node.

use std::fmt;

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonHasher};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of the hash family, stored in every snapshot.
pub const HASH_SCHEME: &str = "poseidon-bn254-circom";

/// Largest arity the atlas uses.
pub const MAX_ARITY: usize = 5;

/// Bytes absorbed per field element when hashing strings. 31 bytes always
/// fit below the BN254 modulus.
const STRING_CHUNK: usize = 31;

/// Hashing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// The Poseidon backend rejected its parameters or inputs.
    #[error("Poseidon error: {0}")]
    Poseidon(String),
    /// Unsupported number of inputs.
    #[error("Unsupported Poseidon arity: {0}")]
    Arity(usize),
    /// A hex string was not 32 bytes of hex.
    #[error("Invalid node hash hex")]
    InvalidHex,
    /// 32 bytes that do not encode a field element below the modulus.
    #[error("Node hash is not a canonical field element")]
    NonCanonical,
}

/// A 32-byte big-endian field element: a leaf, node or root hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeHash(pub [u8; 32]);

impl NodeHash {
    /// The zero element; root of an empty tree.
    pub const ZERO: NodeHash = NodeHash([0u8; 32]);

    /// Encode a field element.
    pub fn from_field(value: Fr) -> Self {
        let bytes = value.into_bigint().to_bytes_be();
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        Self(out)
    }

    /// Decode to a field element, rejecting values at or above the modulus.
    pub fn to_field(&self) -> Result<Fr, HashError> {
        let value = Fr::from_be_bytes_mod_order(&self.0);
        if Self::from_field(value) != *self {
            return Err(HashError::NonCanonical);
        }
        Ok(value)
    }

    /// Lowercase hex without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 hex characters, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| HashError::InvalidHex)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| HashError::InvalidHex)?;
        Ok(Self(arr))
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash(0x{})", self.to_hex())
    }
}

impl Serialize for NodeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Field element of an unsigned integer.
pub fn fe_u64(value: u64) -> Fr {
    Fr::from(value)
}

/// Field element of a signed integer, order-preserving via an offset of 2^63.
pub fn fe_i64(value: i64) -> Fr {
    Fr::from((value as u64) ^ (1u64 << 63))
}

/// Poseidon hasher with one lazily created instance per arity.
///
/// Not `Sync`; each worker owns its own.
pub struct FieldHasher {
    instances: Vec<Option<Poseidon<Fr>>>,
}

impl fmt::Debug for FieldHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ready: Vec<usize> = self
            .instances
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_some())
            .map(|(i, _)| i + 1)
            .collect();
        f.debug_struct("FieldHasher").field("arities", &ready).finish()
    }
}

impl Default for FieldHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldHasher {
    /// Create a hasher; instances are built on first use.
    pub fn new() -> Self {
        Self {
            instances: (0..MAX_ARITY).map(|_| None).collect(),
        }
    }

    /// Hash 1 to [`MAX_ARITY`] field elements.
    pub fn hash(&mut self, inputs: &[Fr]) -> Result<Fr, HashError> {
        let arity = inputs.len();
        if arity == 0 || arity > MAX_ARITY {
            return Err(HashError::Arity(arity));
        }
        let slot = &mut self.instances[arity - 1];
        if slot.is_none() {
            let poseidon =
                Poseidon::<Fr>::new_circom(arity).map_err(|e| HashError::Poseidon(e.to_string()))?;
            *slot = Some(poseidon);
        }
        let Some(poseidon) = slot.as_mut() else {
            return Err(HashError::Arity(arity));
        };
        poseidon
            .hash(inputs)
            .map_err(|e| HashError::Poseidon(e.to_string()))
    }

    /// Hash two elements.
    pub fn hash2(&mut self, a: Fr, b: Fr) -> Result<Fr, HashError> {
        self.hash(&[a, b])
    }

    /// Internal tree node.
    pub fn node(&mut self, left: &NodeHash, right: &NodeHash) -> Result<NodeHash, HashError> {
        let h = self.hash2(left.to_field()?, right.to_field()?)?;
        Ok(NodeHash::from_field(h))
    }

    /// Absorb a UTF-8 string: length first, then 31-byte big-endian chunks.
    pub fn string(&mut self, s: &str) -> Result<Fr, HashError> {
        let bytes = s.as_bytes();
        let mut acc = fe_u64(bytes.len() as u64);
        if bytes.is_empty() {
            return self.hash2(acc, Fr::from(0u64));
        }
        for chunk in bytes.chunks(STRING_CHUNK) {
            acc = self.hash2(acc, Fr::from_be_bytes_mod_order(chunk))?;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let mut a = FieldHasher::new();
        let mut b = FieldHasher::new();
        let x = a.hash(&[fe_u64(1), fe_u64(2)]).unwrap();
        let y = b.hash(&[fe_u64(1), fe_u64(2)]).unwrap();
        assert_eq!(x, y);
        assert_ne!(x, a.hash(&[fe_u64(2), fe_u64(1)]).unwrap());
    }

    #[test]
    fn test_arity_bounds() {
        let mut h = FieldHasher::new();
        assert_eq!(h.hash(&[]), Err(HashError::Arity(0)));
        assert_eq!(h.hash(&[fe_u64(0); 6]), Err(HashError::Arity(6)));
        assert!(h.hash(&[fe_u64(0); 5]).is_ok());
    }

    #[test]
    fn test_arity_separates_domains() {
        let mut h = FieldHasher::new();
        let two = h.hash(&[fe_u64(7), fe_u64(9)]).unwrap();
        let three = h.hash(&[fe_u64(7), fe_u64(9), fe_u64(0)]).unwrap();
        assert_ne!(two, three);
    }

    #[test]
    fn test_node_hash_roundtrip_and_canonical() {
        let mut h = FieldHasher::new();
        let v = NodeHash::from_field(h.string("us/ca").unwrap());
        assert_eq!(NodeHash::from_hex(&v.to_hex()).unwrap(), v);
        assert_eq!(NodeHash::from_field(v.to_field().unwrap()), v);

        let json = serde_json::to_string(&v).unwrap();
        assert!(json.starts_with("\"0x"));
        assert_eq!(serde_json::from_str::<NodeHash>(&json).unwrap(), v);

        assert_eq!(NodeHash([0xff; 32]).to_field(), Err(HashError::NonCanonical));
        assert_eq!(NodeHash::from_hex("abc"), Err(HashError::InvalidHex));
    }

    #[test]
    fn test_string_encoding_distinguishes_chunking() {
        let mut h = FieldHasher::new();
        let a = h.string("").unwrap();
        let b = h.string("\0").unwrap();
        assert_ne!(a, b);

        let long = "x".repeat(62);
        let longer = "x".repeat(63);
        assert_ne!(h.string(&long).unwrap(), h.string(&longer).unwrap());
    }

    #[test]
    fn test_signed_encoding_is_injective_around_zero() {
        assert_ne!(fe_i64(-1), fe_i64(1));
        assert_ne!(fe_i64(0), fe_u64(0));
        assert_eq!(fe_i64(i64::MIN), fe_u64(0));
    }
}
