//! Network boundary of the node.
//!
//! - [`packet`]: wire frame codec and protocol errors
//! - [`server`]: TCP listener, per-connection tasks, and the ingress
//!   adapter feeding the transaction verifier

pub mod packet;
pub mod server;
