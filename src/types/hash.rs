//! 32-byte BLAKE3 hash type with zero-allocation operations.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, read_bytes};
use std::fmt;

/// BLAKE3 hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Fixed-size 32-byte hash used as the content address of transactions
/// and blocks.
///
/// This type is `Copy` for performance - ids are passed frequently during
/// verification and block construction and should live on the stack. At 32
/// bytes, copying is cheaper than reference indirection on modern CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash, Ord, PartialOrd)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// Creates a zero-valued hash (all bytes are 0x00).
    ///
    /// Used as the reserved merkle root in proposed blocks.
    pub const fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    /// Returns the hash as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Creates a hash from a byte slice.
    ///
    /// Returns `None` if the slice length is not exactly [`HASH_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Hash> {
        if slice.len() != HASH_LEN {
            return None;
        }
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(slice);
        Some(Hash(bytes))
    }

    /// Creates a new BLAKE3 hash builder for incremental hashing.
    ///
    /// Use this for streaming data or when computing hashes over multiple
    /// inputs without intermediate allocations.
    pub fn blake3() -> HashBuilder {
        HashBuilder::new()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Encode for Hash {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.0);
    }
}

impl Decode for Hash {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_bytes(input, HASH_LEN)?;
        let mut value = [0u8; HASH_LEN];
        value.copy_from_slice(bytes);
        Ok(Hash(value))
    }
}

/// Incremental BLAKE3 hash builder.
///
/// Allows feeding data in chunks and finalizing to produce a [`Hash`].
/// Implements [`EncodeSink`] so encodable types can be hashed directly
/// without intermediate byte buffers.
pub struct HashBuilder {
    hasher: blake3::Hasher,
}

impl HashBuilder {
    /// Creates a new hash builder with empty state.
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
        }
    }

    /// Feeds data into the hash computation.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn chain(mut self, data: &[u8]) -> Self {
        self.hasher.update(data);
        self
    }

    /// Consumes the builder and returns the final hash.
    pub fn finalize(self) -> Hash {
        Hash(*self.hasher.finalize().as_bytes())
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}
