use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifier of a managed object.
///
/// Ids are 64-bit and totally ordered. On disk an id is always the 8-byte
/// big-endian encoding, so byte-wise key order equals numeric order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Width of the on-disk key encoding in bytes.
    pub const KEY_LEN: usize = 8;

    /// The reserved NULL id (the bit pattern of `-1`). Represents "no object".
    pub const NULL: ObjectId = ObjectId(u64::MAX);

    /// Create an id from its raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw 64-bit value.
    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` if this is the NULL id.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Big-endian key bytes.
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode from exactly 8 big-endian bytes.
    pub fn from_key(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: Self::KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(u64::from_be_bytes(arr)))
    }

    /// Decode the 8-byte id prefix of a longer key.
    pub fn from_key_prefix(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() < Self::KEY_LEN {
            return Err(TypeError::InvalidLength {
                expected: Self::KEY_LEN,
                actual: bytes.len(),
            });
        }
        Self::from_key(&bytes[..Self::KEY_LEN])
    }

    /// Hex-encoded key bytes, used in log and error output.
    pub fn to_hex(self) -> String {
        hex::encode(self.to_key())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "ObjectId(NULL)")
        } else {
            write!(f, "ObjectId({})", self.0)
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NULL")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for ObjectId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ObjectId> for u64 {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn null_is_reserved() {
        assert!(ObjectId::NULL.is_null());
        assert!(!ObjectId::new(0).is_null());
        assert_eq!(ObjectId::NULL.to_key(), [0xff; 8]);
    }

    #[test]
    fn key_is_big_endian() {
        let id = ObjectId::new(0x0102_0304_0506_0708);
        assert_eq!(id.to_key(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(ObjectId::from_key(&id.to_key()).unwrap(), id);
    }

    #[test]
    fn from_key_rejects_wrong_length() {
        let err = ObjectId::from_key(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 8,
                actual: 3
            }
        );
    }

    #[test]
    fn from_key_prefix_ignores_suffix() {
        let mut key = ObjectId::new(42).to_key().to_vec();
        key.extend_from_slice(b"element");
        assert_eq!(ObjectId::from_key_prefix(&key).unwrap(), ObjectId::new(42));
        assert!(ObjectId::from_key_prefix(&key[..5]).is_err());
    }

    #[test]
    fn display_and_debug() {
        assert_eq!(format!("{}", ObjectId::new(513)), "513");
        assert_eq!(format!("{:?}", ObjectId::NULL), "ObjectId(NULL)");
        assert_eq!(ObjectId::new(1).to_hex(), "0000000000000001");
    }

    #[test]
    fn serde_roundtrip() {
        let id = ObjectId::new(77);
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    proptest! {
        #[test]
        fn key_order_matches_numeric_order(a in any::<u64>(), b in any::<u64>()) {
            let (ka, kb) = (ObjectId::new(a).to_key(), ObjectId::new(b).to_key());
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }
    }
}
