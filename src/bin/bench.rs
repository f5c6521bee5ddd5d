//! Node benchmark client.
//!
//! Measures transaction push throughput and ping round-trip latency
//! against a running node. Run with: `cargo run --release --bin bench`
//!
//! The target address is read from `NODE_ADDR` (default `127.0.0.1:9000`).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use snowchain::core::transaction::{Transaction, TxTag};
use snowchain::crypto::key_pair::PrivateKey;
use snowchain::network::packet::{HEADER_LEN, Packet, PacketOp, PacketTag};
use snowchain::types::encoding::Encode;

/// Transactions packed into one push frame.
const TXS_PER_FRAME: usize = 64;

/// Distinct prebuilt frames cycled during the throughput run, so the node
/// sees fresh transaction ids without the client re-signing per iteration.
const PREBUILT_FRAMES: usize = 16;

// ---------------------------------------------------------------------------
// Benchmark harness
// ---------------------------------------------------------------------------

struct BenchResult {
    name: &'static str,
    iterations: u64,
    total: Duration,
    /// Work items per iteration (transactions per frame, 1 for pings).
    items_per_iter: u64,
}

impl BenchResult {
    fn avg(&self) -> Duration {
        self.total / self.iterations.max(1) as u32
    }

    fn print(&self) {
        let avg = self.avg();
        let items = self.iterations * self.items_per_iter;
        let rate = items as f64 / self.total.as_secs_f64();
        println!(
            "  {:<28} {:>8} iters {:>12.3} us/iter {:>14.0} items/s",
            self.name,
            self.iterations,
            avg.as_nanos() as f64 / 1000.0,
            rate,
        );
    }
}

/// Runs `f` for at least `min_duration`, returning aggregated results.
fn bench<F>(
    name: &'static str,
    min_duration: Duration,
    items_per_iter: u64,
    mut f: F,
) -> BenchResult
where
    F: FnMut(u64),
{
    // Warmup
    for i in 0..5 {
        f(i);
    }

    let mut iterations = 0u64;
    let start = Instant::now();
    while start.elapsed() < min_duration {
        f(iterations);
        iterations += 1;
    }
    let total = start.elapsed();

    BenchResult {
        name,
        iterations,
        total,
        items_per_iter,
    }
}

// ---------------------------------------------------------------------------
// Frame construction
// ---------------------------------------------------------------------------

/// Builds one `push_transaction` frame of [`TXS_PER_FRAME`] signed
/// transactions.
fn build_push_frame(key: &PrivateKey, base_nonce: u64) -> Vec<u8> {
    let mut payload = Vec::new();
    for i in 0..TXS_PER_FRAME as u64 {
        let tx = Transaction::new(b"benchmark payload", base_nonce + i, 0, TxTag::NoOp, key);
        tx.encode(&mut payload);
    }
    Packet::new(PacketOp::Command, PacketTag::PushTransaction, 0, payload)
        .to_frame()
        .to_vec()
}

/// Sends one ping and waits for the echoed response.
fn ping_roundtrip(stream: &mut TcpStream, nonce: u32) {
    let ping = Packet::new(PacketOp::Request, PacketTag::Ping, nonce, "hello world");
    stream
        .write_all(&ping.to_frame())
        .expect("ping write failed");

    let mut response = vec![0u8; HEADER_LEN + 11];
    stream
        .read_exact(&mut response)
        .expect("ping read failed");

    let pong = Packet::from_frame(&response).expect("malformed pong");
    assert_eq!(pong.nonce, nonce, "pong nonce mismatch");
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let addr = std::env::var("NODE_ADDR").unwrap_or_else(|_| "127.0.0.1:9000".to_string());
    let min = Duration::from_secs(2);

    let mut stream = match TcpStream::connect(&addr) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("failed to connect to node at {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    stream.set_nodelay(true).expect("set_nodelay failed");

    println!("Node benchmarks against {} (each runs for >= 2s)\n", addr);
    println!(
        "  {:<28} {:>8}       {:>15} {:>16}",
        "benchmark", "iters", "avg time", "rate"
    );
    println!("  {}", "-".repeat(76));

    // Pre-sign transaction frames (signing cost excluded from the run).
    let key = PrivateKey::new();
    let frames: Vec<Vec<u8>> = (0..PREBUILT_FRAMES as u64)
        .map(|i| build_push_frame(&key, i * TXS_PER_FRAME as u64))
        .collect();

    // 1. Push throughput: frames of 64 transactions, fire-and-forget.
    let r = bench("push_transaction(64)", min, TXS_PER_FRAME as u64, |i| {
        let frame = &frames[(i as usize) % frames.len()];
        stream.write_all(frame).expect("push write failed");
    });
    r.print();

    // 2. Ping round-trip latency.
    let r = bench("ping_roundtrip", min, 1, |i| {
        ping_roundtrip(&mut stream, i as u32);
    });
    r.print();

    println!();
}
