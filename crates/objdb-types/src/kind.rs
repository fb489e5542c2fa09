use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Type tag of a managed object's state.
///
/// The tag decides two things for persistence: whether the object's
/// contents live in the collection store (persistable collections) and
/// whether the object belongs to the evictable index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectKind {
    /// Plain field-based object.
    Physical = 0x00,
    /// Literal value (boxed primitive, string).
    Literal = 0x01,
    /// Array of references or primitives.
    Array = 0x02,
    /// Ordered list, serialized inline with the object.
    List = 0x03,
    /// Hash map backed by the collection store.
    Map = 0x04,
    /// Sorted map backed by the collection store.
    TreeMap = 0x05,
    /// Hash set backed by the collection store.
    Set = 0x06,
    /// Sorted set backed by the collection store.
    TreeSet = 0x07,
    /// Concurrent clustered map backed by the collection store.
    ConcurrentMap = 0x08,
    /// Server-side clustered map whose entries may be evicted.
    EvictableMap = 0x09,
}

impl ObjectKind {
    /// Every kind, in tag order.
    pub const ALL: [ObjectKind; 10] = [
        Self::Physical,
        Self::Literal,
        Self::Array,
        Self::List,
        Self::Map,
        Self::TreeMap,
        Self::Set,
        Self::TreeSet,
        Self::ConcurrentMap,
        Self::EvictableMap,
    ];

    /// The on-disk tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Decode a tag byte.
    pub fn from_tag(tag: u8) -> Result<Self, TypeError> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.tag() == tag)
            .ok_or(TypeError::UnknownKind(tag))
    }

    /// Returns `true` if the object's contents are stored in the collection store.
    pub fn is_persistable_collection(self) -> bool {
        matches!(
            self,
            Self::Map
                | Self::TreeMap
                | Self::Set
                | Self::TreeSet
                | Self::ConcurrentMap
                | Self::EvictableMap
        )
    }

    /// Returns `true` for set-shaped collections (keys without values).
    pub fn is_set(self) -> bool {
        matches!(self, Self::Set | Self::TreeSet)
    }

    /// Returns `true` if the object belongs to the evictable index.
    pub fn is_evictable(self) -> bool {
        matches!(self, Self::EvictableMap)
    }

    /// Membership flags derived from this kind.
    pub fn flags(self) -> ObjectFlags {
        ObjectFlags::from_parts(self.is_persistable_collection(), self.is_evictable())
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Physical => "physical",
            Self::Literal => "literal",
            Self::Array => "array",
            Self::List => "list",
            Self::Map => "map",
            Self::TreeMap => "tree-map",
            Self::Set => "set",
            Self::TreeSet => "tree-set",
            Self::ConcurrentMap => "concurrent-map",
            Self::EvictableMap => "evictable-map",
        };
        f.write_str(name)
    }
}

/// Membership flags stored next to every id in a WAL tuple.
///
/// The checkpoint uses them to decide which secondary indices an add or
/// delete touches besides the all-objects index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ObjectFlags(u8);

impl ObjectFlags {
    pub const NONE: ObjectFlags = ObjectFlags(0x00);
    pub const PERSISTABLE_COLLECTION: ObjectFlags = ObjectFlags(0x01);
    pub const EVICTABLE: ObjectFlags = ObjectFlags(0x02);

    /// Build flags from the two membership facts.
    pub fn from_parts(persistable_collection: bool, evictable: bool) -> Self {
        let mut bits = 0;
        if persistable_collection {
            bits |= Self::PERSISTABLE_COLLECTION.0;
        }
        if evictable {
            bits |= Self::EVICTABLE.0;
        }
        Self(bits)
    }

    /// Reinterpret a raw flags byte. Unknown bits are preserved.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn is_persistable_collection(self) -> bool {
        self.0 & Self::PERSISTABLE_COLLECTION.0 != 0
    }

    pub fn is_evictable(self) -> bool {
        self.0 & Self::EVICTABLE.0 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip_for_every_kind() {
        for kind in ObjectKind::ALL {
            assert_eq!(ObjectKind::from_tag(kind.tag()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(ObjectKind::from_tag(0x7f), Err(TypeError::UnknownKind(0x7f)));
    }

    #[test]
    fn collection_and_evictable_classification() {
        assert!(!ObjectKind::Physical.is_persistable_collection());
        assert!(!ObjectKind::List.is_persistable_collection());
        assert!(ObjectKind::Map.is_persistable_collection());
        assert!(ObjectKind::TreeSet.is_persistable_collection());
        assert!(ObjectKind::TreeSet.is_set());
        assert!(!ObjectKind::Map.is_set());
        assert!(ObjectKind::EvictableMap.is_evictable());
        assert!(!ObjectKind::ConcurrentMap.is_evictable());
    }

    #[test]
    fn flags_from_kind() {
        assert_eq!(ObjectKind::Physical.flags(), ObjectFlags::NONE);
        assert_eq!(ObjectKind::Set.flags(), ObjectFlags::PERSISTABLE_COLLECTION);
        let f = ObjectKind::EvictableMap.flags();
        assert_eq!(f.bits(), 0x03);
        assert!(f.is_persistable_collection());
        assert!(f.is_evictable());
    }

    #[test]
    fn flags_from_bits() {
        let f = ObjectFlags::from_bits(0x02);
        assert!(f.is_evictable());
        assert!(!f.is_persistable_collection());
        assert_eq!(ObjectFlags::from_parts(true, false).bits(), 0x01);
    }
}
