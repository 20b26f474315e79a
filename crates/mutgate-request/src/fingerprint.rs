//! Request fingerprints (BLAKE3)

use crate::request::OperationKind;
use crate::TargetId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// BLAKE3 digest of a request body (target, kind, payload)
///
/// Two submissions that share a request id must share a fingerprint;
/// anything else is a caller reusing an id for a different mutation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(#[serde(with = "hex_bytes")] [u8; 32]);

impl Fingerprint {
    /// Compute the fingerprint of a request body
    ///
    /// Object keys are hashed in sorted order, so logically equal payloads
    /// hash identically regardless of insertion order.
    #[must_use]
    pub fn compute(target: &TargetId, kind: OperationKind, payload: &serde_json::Value) -> Self {
        let mut hasher = blake3::Hasher::new();
        hash_str(&mut hasher, target.as_str());
        hash_str(&mut hasher, kind.as_str());
        hash_canonical(&mut hasher, payload);
        Self(*hasher.finalize().as_bytes())
    }

    /// Raw digest bytes
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Length-prefixed, so no choice of bytes can shift a field boundary
fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_canonical(hasher: &mut blake3::Hasher, value: &serde_json::Value) {
    use serde_json::Value;

    match value {
        Value::Null => {
            hasher.update(b"n");
        }
        Value::Bool(b) => {
            hasher.update(if *b { b"t" } else { b"f" });
        }
        Value::Number(n) => {
            hasher.update(b"#");
            hasher.update(n.to_string().as_bytes());
            hasher.update(&[0]);
        }
        Value::String(s) => {
            hasher.update(b"s");
            hash_str(hasher, s);
        }
        Value::Array(items) => {
            hasher.update(b"[");
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                hash_canonical(hasher, item);
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            hasher.update(&(keys.len() as u64).to_le_bytes());
            for key in keys {
                hash_str(hasher, key);
                hash_canonical(hasher, &map[key]);
            }
        }
    }
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(d)?;
        let decoded = hex::decode(&raw).map_err(D::Error::custom)?;
        decoded
            .try_into()
            .map_err(|_| D::Error::custom("fingerprint must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_deterministic() {
        let target = TargetId::new("t1");
        let a = Fingerprint::compute(&target, OperationKind::Update, &json!({"a": 1, "b": 2}));
        let b = Fingerprint::compute(&target, OperationKind::Update, &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_separates_kind_and_target() {
        let payload = json!(null);
        let delete = Fingerprint::compute(&TargetId::new("t1"), OperationKind::Delete, &payload);
        let insert = Fingerprint::compute(&TargetId::new("t1"), OperationKind::Insert, &payload);
        let other = Fingerprint::compute(&TargetId::new("t2"), OperationKind::Delete, &payload);
        assert_ne!(delete, insert);
        assert_ne!(delete, other);
    }

    #[test]
    fn separator_bytes_in_target_do_not_alias() {
        let payload = json!(null);
        let plain = Fingerprint::compute(&TargetId::new("t1"), OperationKind::Delete, &payload);
        let padded = Fingerprint::compute(&TargetId::new("t1\0"), OperationKind::Delete, &payload);
        let embedded =
            Fingerprint::compute(&TargetId::new("t1\0DELETE"), OperationKind::Delete, &payload);
        assert_ne!(plain, padded);
        assert_ne!(plain, embedded);
        assert_ne!(padded, embedded);
    }

    #[test]
    fn fingerprint_serde_is_hex() {
        let fp = Fingerprint::compute(&TargetId::new("t"), OperationKind::Delete, &json!({}));
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json.len(), 64 + 2);
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);
    }

    proptest::proptest! {
        #[test]
        fn insertion_order_never_matters(
            entries in proptest::collection::btree_map("[a-z]{1,6}", 0i64..1000, 0..12)
        ) {
            let forward: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            let reverse: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            let target = TargetId::new("t");
            proptest::prop_assert_eq!(
                Fingerprint::compute(&target, OperationKind::Insert, &forward.into()),
                Fingerprint::compute(&target, OperationKind::Insert, &reverse.into())
            );
        }
    }
}
