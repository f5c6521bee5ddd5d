//! Snowball consensus node binary.
//!
//! Starts the verification pipeline, the chain loop, and the TCP ingress
//! server, then runs until SIGINT.
//!
//! # Usage
//! ```text
//! snowchain
//! ```
//!
//! The binary accepts no arguments.
//!
//! # Environment
//! - `LOG_LEVEL`: `info` (default), `warn`, `error`, or `off`
//!
//! # Shutdown
//! SIGINT cancels the shared context. The server stops accepting first,
//! then the verifier drains its in-flight batches, then the chain releases
//! pending transactions and sampler state. Exit code 0 on a clean
//! shutdown, 1 on fatal initialization failure.

use snowchain::core::chain::Chain;
use snowchain::core::pending::PendingPool;
use snowchain::core::verifier::TransactionVerifier;
use snowchain::network::server::{DEFAULT_LISTEN_ADDR, Server};
use snowchain::utils::log;
use snowchain::{error, info};
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    log::init_from_env();

    let listen_addr: SocketAddr = DEFAULT_LISTEN_ADDR
        .parse()
        .expect("default listen address is valid");

    let chain = Arc::new(Chain::new(Arc::new(PendingPool::new(None))));
    let verifier = Arc::new(TransactionVerifier::new(Arc::clone(chain.pending())));
    let server = Server::new(listen_addr, Arc::clone(&verifier));

    // Bind before spawning anything so a taken port fails fast.
    let listener = match server.bind() {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", listen_addr, e);
            process::exit(1);
        }
    };

    let ctx = CancellationToken::new();

    let server_task = {
        let ctx = ctx.clone();
        tokio::spawn(async move { server.serve(listener, ctx).await })
    };
    let verifier_task = {
        let verifier = Arc::clone(&verifier);
        let ctx = ctx.clone();
        tokio::spawn(async move { verifier.run(ctx).await })
    };
    let chain_task = {
        let chain = Arc::clone(&chain);
        let ctx = ctx.clone();
        tokio::spawn(async move { chain.run(ctx).await })
    };

    info!("node started on {}", listen_addr);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install SIGINT handler: {}", e);
        process::exit(1);
    }
    info!("SIGINT received, shutting down");
    ctx.cancel();

    // Ingress stops first, then the verifier drains, then the chain
    // releases its state.
    let _ = server_task.await;
    let _ = verifier_task.await;
    verifier.shutdown().await;
    let _ = chain_task.await;
    chain.shutdown();

    info!("shutdown complete");
}
