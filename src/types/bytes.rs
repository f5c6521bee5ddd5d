//! Reference-counted byte buffer with copy-on-write semantics.

use std::ops::Deref;
use std::sync::Arc;

/// A reference-counted, immutable byte buffer.
///
/// Wraps `Arc<Vec<u8>>` to provide cheap cloning and shared ownership.
/// Transaction payloads are immutable after creation and shared between
/// the verifier, the pending pool, and proposal snapshots; cloning a
/// `Bytes` only bumps the counter. Mutations trigger copy-on-write via
/// `Arc::make_mut`.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct Bytes(Arc<Vec<u8>>);

impl Bytes {
    /// Creates a new buffer from any type convertible to `Vec<u8>`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(data.into()))
    }

    /// Creates an empty buffer with the specified capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Self(Arc::new(Vec::with_capacity(cap)))
    }

    /// Returns the number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the capacity of the underlying allocation.
    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }

    /// Returns the buffer contents as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Copies the buffer contents into a new `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Returns a mutable reference to the underlying vector.
    ///
    /// Clones the data if other references exist (copy-on-write).
    pub fn make_mut(&mut self) -> &mut Vec<u8> {
        Arc::make_mut(&mut self.0)
    }

    /// Appends bytes to the buffer, cloning if necessary.
    pub fn extend_from_slice(&mut self, s: &[u8]) {
        self.make_mut().extend_from_slice(s);
    }
}

impl Clone for Bytes {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl Deref for Bytes {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(s: &[u8]) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Bytes {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl<const N: usize> From<[u8; N]> for Bytes {
    fn from(arr: [u8; N]) -> Self {
        Self::new(arr)
    }
}

impl<const N: usize> From<&[u8; N]> for Bytes {
    fn from(arr: &[u8; N]) -> Self {
        Self::new(arr.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_storage() {
        let a = Bytes::new(b"shared".as_slice());
        let b = a.clone();
        assert_eq!(a.as_slice().as_ptr(), b.as_slice().as_ptr());
    }

    #[test]
    fn make_mut_copies_on_write() {
        let a = Bytes::new(b"cow".as_slice());
        let mut b = a.clone();
        b.make_mut().push(b'!');

        assert_eq!(a.as_slice(), b"cow");
        assert_eq!(b.as_slice(), b"cow!");
    }

    #[test]
    fn extend_from_slice_appends() {
        let mut b = Bytes::with_capacity(8);
        b.extend_from_slice(b"ab");
        b.extend_from_slice(b"cd");
        assert_eq!(b.as_slice(), b"abcd");
    }

    #[test]
    fn deref_exposes_slice_methods() {
        let b = Bytes::new(b"hello".as_slice());
        assert_eq!(b.len(), 5);
        assert!(!b.is_empty());
        assert_eq!(&b[1..3], b"el");
    }
}
