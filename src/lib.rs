//! Snowball consensus node library.
//!
//! Provides the transaction verification pipeline, block proposal and
//! finalization loop, and the TCP ingress boundary of the node.

pub mod core;
pub mod crypto;
pub mod network;
pub mod types;
pub mod utils;
