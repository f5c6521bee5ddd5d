//! Ed25519 signature key pairs.
//!
//! Wraps `ed25519-dalek` signing and verifying keys behind the node's own
//! types and exposes the amortized batch verifier the transaction pipeline
//! is built around.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use ed25519_dalek::{Signer, Verifier, SigningKey, VerifyingKey};
use rand_core::OsRng;

pub use ed25519_dalek::Signature;

/// Public key length in bytes on the wire.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Signature length in bytes on the wire.
pub const SIGNATURE_LEN: usize = 64;

/// Private key for signing transactions.
///
/// Generated using cryptographically secure randomness from the OS.
/// Never serialized or transmitted over the network.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

/// Public key for signature verification.
///
/// This type is `Copy` for performance. Public keys are passed frequently
/// during transaction validation, and stack allocation avoids heap overhead
/// and improves cache locality.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub(crate) key: VerifyingKey,
}

impl PrivateKey {
    /// Generates a new random private key using OS-provided entropy.
    pub fn new() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Creates a private key from raw seed bytes.
    ///
    /// **Security**: the seed should be zeroized after use and never logged
    /// or transmitted.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(bytes),
        }
    }

    /// Derives the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: self.key.verifying_key(),
        }
    }

    /// Signs arbitrary data, producing an Ed25519 signature.
    pub fn sign(&self, data: &[u8]) -> Signature {
        self.key.sign(data)
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicKey {
    /// Returns the 32-byte compressed encoding of the key.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.key.to_bytes()
    }

    /// Verifies an Ed25519 signature against the given data.
    ///
    /// Returns `true` if the signature is valid, `false` otherwise.
    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        self.key.verify(data, signature).is_ok()
    }
}

impl Encode for PublicKey {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.key.to_bytes());
    }
}

impl Decode for PublicKey {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let key_bytes = <[u8; PUBLIC_KEY_LEN]>::decode(input)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| DecodeError::InvalidValue)?;
        Ok(PublicKey { key })
    }
}

/// Verifies a batch of signatures in one amortized pass.
///
/// All three slices must be the same length; `messages[i]` must be signed by
/// `keys[i]` with `signatures[i]`. Returns `true` only if every signature in
/// the batch is valid. On `false`, callers fall back to per-signature
/// verification to locate the offenders.
pub fn verify_batch(messages: &[&[u8]], signatures: &[Signature], keys: &[PublicKey]) -> bool {
    let verifying_keys: Vec<VerifyingKey> = keys.iter().map(|k| k.key).collect();
    ed25519_dalek::verify_batch(messages, signatures, &verifying_keys).is_ok()
}
