//! TCP server and ingress adapter.
//!
//! Accepts peer connections and splits each into a reader task and a
//! writer task. The reader frames packets off the stream and feeds
//! `push_transaction` payloads to the verifier; `ping` requests are
//! answered through a bounded response queue drained by the writer, so a
//! slow peer backpressures its own reader instead of growing a buffer.
//!
//! Errors are connection-scoped: a protocol violation or I/O error closes
//! that connection and the server keeps accepting.

use crate::core::transaction::Transaction;
use crate::core::verifier::{TransactionVerifier, VerifierError};
use crate::network::packet::{FrameHeader, HEADER_LEN, Packet, PacketOp, PacketTag, ProtocolError};
use crate::types::bytes::Bytes;
use crate::types::encoding::{Decode, DecodeError};
use crate::utils::log::Logger;
use crate::{info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio_util::sync::CancellationToken;

/// Address the node listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9000";

/// Listen backlog.
pub const LISTEN_BACKLOG: u32 = 128;

/// Per-connection writer queue bound, in frames. At the 64 KiB frame cap
/// this bounds queued responses to about 1 MiB per connection.
const WRITER_QUEUE_FRAMES: usize = 16;

/// Why a connection's read loop ended.
#[derive(Debug, Error)]
enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

/// TCP ingress server feeding the transaction verifier.
pub struct Server {
    listen_addr: SocketAddr,
    verifier: Arc<TransactionVerifier>,
}

impl Server {
    /// Creates a server that will listen on `listen_addr`.
    pub fn new(listen_addr: SocketAddr, verifier: Arc<TransactionVerifier>) -> Self {
        Self {
            listen_addr,
            verifier,
        }
    }

    /// Binds the listening socket with `SO_REUSEADDR`/`SO_REUSEPORT`.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let socket = match self.listen_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        #[cfg(unix)]
        socket.set_reuseport(true)?;
        socket.bind(self.listen_addr)?;
        socket.listen(LISTEN_BACKLOG)
    }

    /// Binds and serves until `ctx` fires.
    pub async fn run(&self, ctx: CancellationToken) -> io::Result<()> {
        let listener = self.bind()?;
        self.serve(listener, ctx).await;
        Ok(())
    }

    /// Accept loop over an already-bound listener.
    pub async fn serve(&self, listener: TcpListener, ctx: CancellationToken) {
        match listener.local_addr() {
            Ok(addr) => info!("listening on {}", addr),
            Err(_) => info!("listening on {}", self.listen_addr),
        }

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let verifier = Arc::clone(&self.verifier);
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, verifier, ctx).await;
                        });
                    }
                    Err(e) => warn!("accept failed: {}", e),
                }
            }
        }

        info!("server shut down");
    }
}

/// Runs one connection to completion.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    verifier: Arc<TransactionVerifier>,
    ctx: CancellationToken,
) {
    let log = Logger::new(peer.to_string());
    log.info("connection opened");

    if let Err(e) = stream.set_nodelay(true) {
        log.warn(&format!("failed to set TCP_NODELAY: {}", e));
    }

    let (reader, writer) = stream.into_split();
    let (responses, queue) = channel::<Bytes>(WRITER_QUEUE_FRAMES);
    let writer_task = tokio::spawn(write_loop(writer, queue));

    match read_loop(reader, &responses, &verifier, &ctx, &log).await {
        Ok(()) => log.info("connection closed"),
        Err(e) => log.warn(&format!("closing connection: {}", e)),
    }

    // Dropping the sender lets the writer drain its queue and exit.
    drop(responses);
    let _ = writer_task.await;
}

/// Frames packets off the stream until EOF, error, or cancellation.
async fn read_loop(
    mut reader: OwnedReadHalf,
    responses: &Sender<Bytes>,
    verifier: &Arc<TransactionVerifier>,
    ctx: &CancellationToken,
    log: &Logger,
) -> Result<(), ConnectionError> {
    let mut header_buf = [0u8; HEADER_LEN];

    loop {
        tokio::select! {
            _ = ctx.cancelled() => return Ok(()),
            result = reader.read_exact(&mut header_buf) => match result {
                Ok(_) => {}
                // A clean close between frames.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }

        let header = FrameHeader::parse(&header_buf)?;
        let mut payload = vec![0u8; header.payload_len];
        reader.read_exact(&mut payload).await?;

        match (header.op, header.tag) {
            (PacketOp::Command, PacketTag::PushTransaction) => {
                match ingest_transactions(&payload, verifier, ctx).await {
                    Ok(count) => log.info(&format!("ingested {} transactions", count)),
                    // A malformed transaction aborts this frame only.
                    Err(IngestError::Decode(e)) => {
                        log.warn(&format!("dropping push_transaction frame: {}", e));
                    }
                    Err(IngestError::Verifier(VerifierError::Cancelled)) => return Ok(()),
                }
            }
            (PacketOp::Request, PacketTag::Ping) => {
                let pong = Packet::new(PacketOp::Response, PacketTag::Ping, header.nonce, payload);
                if responses.send(pong.to_frame()).await.is_err() {
                    return Ok(());
                }
            }
            // Valid frame in the wrong direction, e.g. a response sent to
            // the server.
            _ => return Err(ProtocolError::UnexpectedPacket.into()),
        }
    }
}

/// Errors while ingesting a `push_transaction` payload.
#[derive(Debug, Error)]
enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Verifier(#[from] VerifierError),
}

/// Decodes consecutive transactions until end-of-frame, pushing each into
/// the verifier. Returns the number of transactions ingested.
async fn ingest_transactions(
    mut payload: &[u8],
    verifier: &Arc<TransactionVerifier>,
    ctx: &CancellationToken,
) -> Result<usize, IngestError> {
    let mut count = 0;
    while !payload.is_empty() {
        let tx = Transaction::decode(&mut payload)?;
        verifier.push(Arc::new(tx), ctx).await?;
        count += 1;
    }
    Ok(count)
}

/// Drains the response queue into the socket.
async fn write_loop(mut writer: OwnedWriteHalf, mut queue: Receiver<Bytes>) {
    while let Some(frame) = queue.recv().await {
        if writer.write_all(&frame).await.is_err() {
            return;
        }
        if writer.flush().await.is_err() {
            return;
        }
    }
}
