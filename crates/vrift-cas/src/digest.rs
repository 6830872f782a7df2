//! `Digest`: the `(hash, size_bytes)` pair that names every blob in the store.
//!
//! Two blobs with equal digests are assumed to have equal content; nothing
//! in this crate ever compares blob bytes once digests match.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA-256 produces 32 bytes of hash.
pub const HASH_BYTES: usize = 32;

/// Names a blob: its SHA-256 hash and its length in bytes.
///
/// Serializes via `serde`/`bincode` as a fixed-order record (hash bytes,
/// then size) so that two equivalent directories produce byte-identical
/// serialized blobs, per the canonical-encoding requirement in the store's
/// on-disk format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    hash: [u8; HASH_BYTES],
    pub size_bytes: u64,
}

impl Digest {
    pub fn new(hash: [u8; HASH_BYTES], size_bytes: u64) -> Self {
        Self { hash, size_bytes }
    }

    /// Lowercase 64-character hex encoding of the hash.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn hash_bytes(&self) -> &[u8; HASH_BYTES] {
        &self.hash
    }

    /// Parse a 64-character lowercase hex hash. Returns `None` on malformed input.
    pub fn from_hex(hex_hash: &str, size_bytes: u64) -> Option<Self> {
        if hex_hash.len() != HASH_BYTES * 2 {
            return None;
        }
        let mut hash = [0u8; HASH_BYTES];
        hex::decode_to_slice(hex_hash, &mut hash).ok()?;
        Some(Self { hash, size_bytes })
    }

    /// The two-character shard prefix used to fan out the object store.
    pub fn shard(&self) -> String {
        self.hash_hex()[..2].to_string()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digest")
            .field("hash", &self.hash_hex())
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash_hex(), self.size_bytes)
    }
}
