use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::kind::ObjectKind;

/// The value stored under an object's id in the object store.
///
/// The state bytes are opaque here; producing and interpreting them is the
/// job of the object-state codec that sits above the persistence layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    pub kind: ObjectKind,
    pub state: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct WireRecord {
    kind: u8,
    state: Vec<u8>,
}

impl ObjectRecord {
    pub fn new(kind: ObjectKind, state: Vec<u8>) -> Self {
        Self { kind, state }
    }

    /// Encode to the bincode wire form.
    pub fn encode(&self) -> Result<Vec<u8>, TypeError> {
        let wire = WireRecord {
            kind: self.kind.tag(),
            state: self.state.clone(),
        };
        bincode::serialize(&wire).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Decode from the bincode wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, TypeError> {
        let wire: WireRecord =
            bincode::deserialize(bytes).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: ObjectKind::from_tag(wire.kind)?,
            state: wire.state,
        })
    }
}
