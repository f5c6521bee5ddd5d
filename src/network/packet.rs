//! Wire frame codec for peer connections.
//!
//! Every frame is a fixed 10-byte little-endian header followed by the
//! payload:
//!
//! ```text
//! len:u32 || nonce:u32 || op:u8 || tag:u8 || payload(len)
//! ```
//!
//! `nonce` correlates requests with responses on the same connection.
//! `push_transaction` is only valid as a command; its payload is a
//! concatenation of serialized transactions running to the end of the
//! frame. `ping` payloads are opaque bytes echoed back verbatim.

use crate::types::bytes::Bytes;
use crate::types::encoding::{Decode, Encode};
use thiserror::Error;

/// Maximum frame payload size in bytes.
pub const MAX_PAYLOAD_LEN: usize = 65536;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 10;

/// Direction discriminant of a frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOp {
    /// Expects a response carrying the same nonce.
    Request = 0,
    /// Answers a request.
    Response = 1,
    /// One-way; no response follows.
    Command = 2,
}

/// Payload discriminant of a frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketTag {
    /// Opaque payload echoed back by the peer.
    Ping = 0,
    /// Concatenated serialized transactions.
    PushTransaction = 1,
}

/// Protocol violations. All of them close the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer cannot hold a complete frame header.
    #[error("message of {0} bytes is smaller than a frame header")]
    MessageSizeTooSmall(usize),
    /// The declared payload exceeds the frame cap.
    #[error("payload of {0} bytes exceeds the frame cap")]
    MessageSizeTooLarge(usize),
    /// Unrecognized tag byte.
    #[error("unexpected packet tag {0}")]
    UnexpectedTag(u8),
    /// Unrecognized op byte, or a tag that is not valid for the op.
    #[error("unexpected packet op/tag combination")]
    UnexpectedPacket,
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes, validated against [`MAX_PAYLOAD_LEN`].
    pub payload_len: usize,
    /// Request/response correlation value.
    pub nonce: u32,
    pub op: PacketOp,
    pub tag: PacketTag,
}

impl FrameHeader {
    /// Parses and validates a header from exactly [`HEADER_LEN`] bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::MessageSizeTooSmall(bytes.len()));
        }

        let mut input = &bytes[..HEADER_LEN];
        // Infallible: the length was checked above.
        let payload_len = u32::decode(&mut input).unwrap() as usize;
        let nonce = u32::decode(&mut input).unwrap();
        let op_byte = u8::decode(&mut input).unwrap();
        let tag_byte = u8::decode(&mut input).unwrap();

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::MessageSizeTooLarge(payload_len));
        }

        let op = match op_byte {
            0 => PacketOp::Request,
            1 => PacketOp::Response,
            2 => PacketOp::Command,
            _ => return Err(ProtocolError::UnexpectedPacket),
        };
        let tag = match tag_byte {
            0 => PacketTag::Ping,
            1 => PacketTag::PushTransaction,
            other => return Err(ProtocolError::UnexpectedTag(other)),
        };

        // push_transaction is one-way only; ping never is.
        let combination_valid = match tag {
            PacketTag::PushTransaction => op == PacketOp::Command,
            PacketTag::Ping => op != PacketOp::Command,
        };
        if !combination_valid {
            return Err(ProtocolError::UnexpectedPacket);
        }

        Ok(FrameHeader {
            payload_len,
            nonce,
            op,
            tag,
        })
    }
}

/// A complete frame: validated header fields plus the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub nonce: u32,
    pub op: PacketOp,
    pub tag: PacketTag,
    pub payload: Bytes,
}

impl Packet {
    /// Creates a packet.
    ///
    /// # Panics
    ///
    /// Panics if the payload exceeds [`MAX_PAYLOAD_LEN`] bytes.
    pub fn new(op: PacketOp, tag: PacketTag, nonce: u32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        assert!(
            payload.len() <= MAX_PAYLOAD_LEN,
            "packet payload exceeds {} bytes",
            MAX_PAYLOAD_LEN
        );
        Self {
            nonce,
            op,
            tag,
            payload,
        }
    }

    /// Serializes the packet into a single framed buffer.
    pub fn to_frame(&self) -> Bytes {
        let mut out = Bytes::with_capacity(HEADER_LEN + self.payload.len());
        (self.payload.len() as u32).encode(&mut out);
        self.nonce.encode(&mut out);
        (self.op as u8).encode(&mut out);
        (self.tag as u8).encode(&mut out);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses a packet from a buffer holding exactly one frame.
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        let header = FrameHeader::parse(frame)?;
        let payload = &frame[HEADER_LEN..];

        if payload.len() < header.payload_len {
            return Err(ProtocolError::MessageSizeTooSmall(frame.len()));
        }
        if payload.len() > header.payload_len {
            return Err(ProtocolError::MessageSizeTooLarge(frame.len()));
        }

        Ok(Packet {
            nonce: header.nonce,
            op: header.op,
            tag: header.tag,
            payload: Bytes::new(payload),
        })
    }
}
