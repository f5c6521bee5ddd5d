//! Core node subsystems.
//!
//! This module contains the fundamental building blocks of the node:
//! - `Transaction`: immutable signed payload, content-addressed by BLAKE3
//! - `Block`: immutable container of transaction ids
//! - `PendingPool`: verified transactions awaiting block inclusion
//! - `Sampler`: Snowball repeated-sampling consensus state machine
//! - `Chain`: block proposal and finalization driver
//! - `TransactionVerifier`: batched signature verification pipeline

pub mod block;
pub mod chain;
pub mod pending;
pub mod sampler;
pub mod transaction;
pub mod verifier;
