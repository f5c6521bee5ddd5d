//! Cryptographic primitives: Ed25519 key pairs and batch verification.

pub mod key_pair;
