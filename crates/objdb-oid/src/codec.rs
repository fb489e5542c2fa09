//! On-disk encodings of WAL entries and bitmap blobs.
//!
//! WAL key: `seq:u64 BE ++ op:u8`. WAL value: repeated `(id:u64 BE, flags:u8)`.
//! Blob key: base id as `u64 BE`. Blob value: `u64 BE` words, where bit `i`
//! of word `w` marks id `base + 64 * w + i`.

use std::fmt;

use objdb_types::{ObjectFlags, ObjectId};

use crate::error::{OidError, OidResult};

pub const WAL_KEY_LEN: usize = 9;
const TUPLE_LEN: usize = ObjectId::KEY_LEN + 1;
const BITS_PER_WORD: u64 = 64;
const WORD_LEN: usize = 8;

/// Direction of a membership change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WalOp {
    Add = 0x00,
    Delete = 0x01,
}

impl WalOp {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(WalOp::Add),
            0x01 => Some(WalOp::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for WalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalOp::Add => f.write_str("add"),
            WalOp::Delete => f.write_str("delete"),
        }
    }
}

pub fn encode_wal_key(seq: u64, op: WalOp) -> [u8; WAL_KEY_LEN] {
    let mut key = [0u8; WAL_KEY_LEN];
    key[..8].copy_from_slice(&seq.to_be_bytes());
    key[8] = op.tag();
    key
}

pub fn decode_wal_key(key: &[u8]) -> OidResult<(u64, WalOp)> {
    let corrupt = |reason: String| OidError::CorruptWal {
        key: hex_key(key),
        reason,
    };
    if key.len() != WAL_KEY_LEN {
        return Err(corrupt(format!("key length {}", key.len())));
    }
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&key[..8]);
    let op = WalOp::from_tag(key[8]).ok_or_else(|| corrupt(format!("op tag {:#04x}", key[8])))?;
    Ok((u64::from_be_bytes(seq), op))
}

pub fn encode_wal_value(entries: &[(ObjectId, ObjectFlags)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * TUPLE_LEN);
    for (id, flags) in entries {
        out.extend_from_slice(&id.to_key());
        out.push(flags.bits());
    }
    out
}

pub fn decode_wal_value(key: &[u8], value: &[u8]) -> OidResult<Vec<(ObjectId, ObjectFlags)>> {
    if value.len() % TUPLE_LEN != 0 {
        return Err(OidError::CorruptWal {
            key: hex_key(key),
            reason: format!("value length {} is not a multiple of {TUPLE_LEN}", value.len()),
        });
    }
    value
        .chunks_exact(TUPLE_LEN)
        .map(|chunk| -> OidResult<(ObjectId, ObjectFlags)> {
            let id = ObjectId::from_key(&chunk[..ObjectId::KEY_LEN])?;
            Ok((id, ObjectFlags::from_bits(chunk[ObjectId::KEY_LEN])))
        })
        .collect()
}

fn hex_key(key: &[u8]) -> String {
    hex::encode(key)
}

/// One fixed-width range of the membership bitmap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    base: u64,
    words: Vec<u64>,
}

impl Blob {
    /// An empty blob covering `width` ids starting at `base`.
    pub fn empty(base: u64, width: u64) -> Self {
        Self {
            base,
            words: vec![0; (width / BITS_PER_WORD) as usize],
        }
    }

    /// The base of the blob containing `id`.
    pub fn base_for(id: ObjectId, width: u64) -> u64 {
        id.to_u64() - id.to_u64() % width
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn width(&self) -> u64 {
        self.words.len() as u64 * BITS_PER_WORD
    }

    fn position(&self, id: ObjectId) -> Option<(usize, u64)> {
        let offset = id.to_u64().checked_sub(self.base)?;
        if offset >= self.width() {
            return None;
        }
        Some(((offset / BITS_PER_WORD) as usize, 1u64 << (offset % BITS_PER_WORD)))
    }

    /// Set the bit for `id`. Returns the previous membership.
    ///
    /// Ids outside the blob's range are ignored and report `false`.
    pub fn set(&mut self, id: ObjectId) -> bool {
        match self.position(id) {
            Some((w, mask)) => {
                let was = self.words[w] & mask != 0;
                self.words[w] |= mask;
                was
            }
            None => false,
        }
    }

    /// Clear the bit for `id`. Returns the previous membership.
    pub fn clear(&mut self, id: ObjectId) -> bool {
        match self.position(id) {
            Some((w, mask)) => {
                let was = self.words[w] & mask != 0;
                self.words[w] &= !mask;
                was
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.position(id)
            .is_some_and(|(w, mask)| self.words[w] & mask != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn key(&self) -> [u8; 8] {
        self.base.to_be_bytes()
    }

    pub fn encode_value(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * WORD_LEN);
        for word in &self.words {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out
    }

    pub fn decode(key: &[u8], value: &[u8]) -> OidResult<Self> {
        let corrupt = |reason: String| OidError::CorruptBlob {
            key: hex_key(key),
            reason,
        };
        let base = ObjectId::from_key(key)
            .map_err(|e| corrupt(e.to_string()))?
            .to_u64();
        if value.is_empty() || value.len() % WORD_LEN != 0 {
            return Err(corrupt(format!("value length {}", value.len())));
        }
        let words = value
            .chunks_exact(WORD_LEN)
            .map(|c| {
                let mut word = [0u8; WORD_LEN];
                word.copy_from_slice(c);
                u64::from_be_bytes(word)
            })
            .collect();
        Ok(Self { base, words })
    }

    /// Member ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.words.iter().enumerate().flat_map(move |(w, &word)| {
            let word_base = self.base + w as u64 * BITS_PER_WORD;
            (0..BITS_PER_WORD)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| ObjectId::new(word_base + bit))
        })
    }
}
