//! Content fingerprints for cache keys.
//!
//! A fingerprint is the SHA-256 digest of a value's canonical JSON encoding.
//! Struct fields serialize in declaration order and every map in the data
//! model is a `BTreeMap`, so equal values always produce equal digests.

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{PipelineError, PipelineResult};

/// SHA-256 digest identifying the content of a stage input or output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint raw bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// Fingerprint any serializable value via its canonical JSON encoding.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> PipelineResult<Self> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            PipelineError::internal(format!("failed to canonicalize value: {}", e))
        })?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Combine an ordered list of fingerprints into one.
    ///
    /// Order matters: `combine([a, b]) != combine([b, a])` in general.
    pub fn combine(parts: &[Fingerprint]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((parts.len() as u64).to_be_bytes());
        for part in parts {
            hasher.update(part.0);
        }
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// Fingerprint of the empty input.
    pub fn empty() -> Self {
        Self::combine(&[])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_fingerprint_is_stable_for_equal_values() {
        let mut a = BTreeMap::new();
        a.insert("critical", 2);
        a.insert("low", 1);
        let mut b = BTreeMap::new();
        b.insert("low", 1);
        b.insert("critical", 2);

        assert_eq!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
    }

    #[test]
    fn test_combine_is_order_sensitive() {
        let a = Fingerprint::of_bytes(b"a");
        let b = Fingerprint::of_bytes(b"b");
        assert_ne!(Fingerprint::combine(&[a, b]), Fingerprint::combine(&[b, a]));
        assert_eq!(Fingerprint::combine(&[a, b]), Fingerprint::combine(&[a, b]));
    }

    #[test]
    fn test_hex_rendering() {
        let fp = Fingerprint::of_bytes(b"");
        assert_eq!(fp.to_hex().len(), 64);
        assert_eq!(fp.short().len(), 12);
        assert!(fp.to_hex().starts_with(&fp.short()));
        assert_eq!(
            serde_json::to_string(&fp).unwrap(),
            format!("\"{}\"", fp.to_hex())
        );
    }

    proptest! {
        #[test]
        fn prop_distinct_strings_have_distinct_fingerprints(a in ".{0,32}", b in ".{0,32}") {
            let fa = Fingerprint::of(&a).unwrap();
            let fb = Fingerprint::of(&b).unwrap();
            prop_assert_eq!(a == b, fa == fb);
        }
    }
}
