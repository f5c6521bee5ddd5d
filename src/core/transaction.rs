//! Transaction structure with reference-counted payload storage.

use crate::crypto::key_pair::{PrivateKey, PublicKey, SIGNATURE_LEN, Signature};
use crate::types::bytes::Bytes;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, read_bytes};
use crate::types::hash::Hash;

/// Maximum transaction payload length in bytes.
pub const MAX_DATA_LEN: usize = 65536;

/// Specifies the type of operation a transaction performs.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TxTag {
    /// Carries opaque data with no execution semantics.
    NoOp = 0,
}

impl TxTag {
    /// Parses a wire tag byte.
    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(TxTag::NoOp),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

/// A signed transaction, content-addressed by the BLAKE3 hash of its
/// canonical serialization.
///
/// Immutable after creation. The payload uses `Bytes` for zero-copy
/// sharing - a transaction is referenced by verifier batches, the pending
/// pool, and proposal snapshots at the same time, and holders share one
/// `Arc<Transaction>`.
///
/// # Wire layout
///
/// Little-endian, packed:
///
/// ```text
/// sender(32) || signature(64) || data_len:u32 || sender_nonce:u64
///            || created_at:u64 || tag:u8 || data(data_len)
/// ```
///
/// The signature covers the suffix starting at `sender_nonce` (the length
/// prefix is excluded). The id is always recomputed from the serialized
/// form and never read from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Sender's public key, also used for signature verification.
    pub sender: PublicKey,
    /// Ed25519 signature over the signing payload.
    pub signature: Signature,
    /// Monotonic per-sender counter. Not enforced by this node.
    pub sender_nonce: u64,
    /// Creation timestamp supplied by the sender. Opaque to the node.
    pub created_at: u64,
    /// Operation type.
    pub tag: TxTag,
    /// Arbitrary transaction payload.
    pub data: Bytes,

    /// Content id, computed once at construction or decode.
    id: Hash,
}

impl Transaction {
    /// Creates a new signed transaction.
    ///
    /// Signs the payload with the provided private key and computes the
    /// content id over the canonical serialization.
    ///
    /// # Panics
    ///
    /// Panics if `data` is longer than [`MAX_DATA_LEN`] bytes.
    pub fn new(
        data: impl Into<Bytes>,
        sender_nonce: u64,
        created_at: u64,
        tag: TxTag,
        key: &PrivateKey,
    ) -> Self {
        let data = data.into();
        assert!(
            data.len() <= MAX_DATA_LEN,
            "transaction data exceeds {} bytes",
            MAX_DATA_LEN
        );

        let payload = signing_payload(sender_nonce, created_at, tag, &data);
        let mut tx = Transaction {
            sender: key.public_key(),
            signature: key.sign(&payload),
            sender_nonce,
            created_at,
            tag,
            data,
            id: Hash::zero(),
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Returns the unique transaction identifier.
    pub fn id(&self) -> Hash {
        self.id
    }

    /// Returns the bytes that were signed to produce this transaction's
    /// signature.
    ///
    /// Used during verification to reconstruct the signed message.
    pub fn signing_payload(&self) -> Vec<u8> {
        signing_payload(self.sender_nonce, self.created_at, self.tag, &self.data)
    }

    /// Verifies the transaction signature against the sender's public key.
    pub fn verify(&self) -> bool {
        self.sender.verify(&self.signing_payload(), &self.signature)
    }

    /// Returns the serialized size in bytes.
    pub fn encoded_len(&self) -> usize {
        32 + SIGNATURE_LEN + 4 + 8 + 8 + 1 + self.data.len()
    }

    /// Computes the content id over the canonical serialization.
    fn compute_id(&self) -> Hash {
        let mut h = Hash::blake3();
        self.encode(&mut h);
        h.finalize()
    }
}

/// Builds the signed message: `sender_nonce || created_at || tag || data`.
fn signing_payload(sender_nonce: u64, created_at: u64, tag: TxTag, data: &Bytes) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + 8 + 1 + data.len());
    sender_nonce.encode(&mut buf);
    created_at.encode(&mut buf);
    (tag as u8).encode(&mut buf);
    buf.extend_from_slice(data);
    buf
}

impl Encode for Transaction {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.sender.encode(out);
        out.write(&self.signature.to_bytes());
        (self.data.len() as u32).encode(out);
        self.sender_nonce.encode(out);
        self.created_at.encode(out);
        (self.tag as u8).encode(out);
        out.write(&self.data);
    }
}

impl Decode for Transaction {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let sender = PublicKey::decode(input)?;
        let sig_bytes = <[u8; SIGNATURE_LEN]>::decode(input)?;
        let data_len = u32::decode(input)? as usize;
        if data_len > MAX_DATA_LEN {
            return Err(DecodeError::TransactionTooLarge(data_len));
        }
        let sender_nonce = u64::decode(input)?;
        let created_at = u64::decode(input)?;
        let tag = TxTag::from_byte(u8::decode(input)?)?;
        let data = Bytes::new(read_bytes(input, data_len)?);

        let mut tx = Transaction {
            sender,
            signature: Signature::from_bytes(&sig_bytes),
            sender_nonce,
            created_at,
            tag,
            data,
            id: Hash::zero(),
        };
        tx.id = tx.compute_id();
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tx(data: &[u8], key: &PrivateKey) -> Transaction {
        Transaction::new(data, 123, 456, TxTag::NoOp, key)
    }

    #[test]
    fn new_creates_valid_transaction() {
        let key = PrivateKey::new();
        let tx = new_tx(b"test data", &key);

        assert_eq!(tx.data.as_slice(), b"test data");
        assert_eq!(tx.sender, key.public_key());
        assert!(tx.verify());
    }

    #[test]
    fn verify_fails_with_wrong_public_key() {
        let key1 = PrivateKey::new();
        let key2 = PrivateKey::new();

        let tx = new_tx(b"payload", &key1);
        let mut tampered = tx.clone();
        tampered.sender = key2.public_key();

        assert!(!tampered.verify());
    }

    #[test]
    fn verify_fails_with_tampered_data() {
        let key = PrivateKey::new();
        let tx = new_tx(b"original", &key);
        let mut tampered = tx.clone();
        tampered.data = Bytes::new(b"tampered".as_slice());

        assert!(!tampered.verify());
    }

    #[test]
    fn verify_fails_with_corrupted_signature() {
        let key = PrivateKey::new();
        let tx = new_tx(b"payload", &key);

        let mut sig_bytes = tx.signature.to_bytes();
        sig_bytes[7] ^= 0x01;
        let mut tampered = tx.clone();
        tampered.signature = Signature::from_bytes(&sig_bytes);

        assert!(!tampered.verify());
    }

    #[test]
    fn verify_succeeds_with_empty_data() {
        let key = PrivateKey::new();
        let tx = new_tx(b"", &key);
        assert!(tx.verify());
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let key = PrivateKey::new();
        let tx = new_tx(b"hello world", &key);

        let encoded = tx.to_bytes();
        assert_eq!(encoded.len(), tx.encoded_len());

        let decoded = Transaction::from_bytes(&encoded).expect("deserialization failed");
        assert_eq!(tx, decoded);
        assert_eq!(tx.id(), decoded.id());
        assert!(decoded.verify());
    }

    #[test]
    fn wire_layout_is_packed_little_endian() {
        let key = PrivateKey::new();
        let tx = new_tx(b"abc", &key);
        let encoded = tx.to_bytes();

        assert_eq!(encoded.len(), 32 + 64 + 4 + 8 + 8 + 1 + 3);
        assert_eq!(&encoded[..32], tx.sender.to_bytes().as_slice());
        assert_eq!(&encoded[32..96], tx.signature.to_bytes().as_slice());
        assert_eq!(&encoded[96..100], &3u32.to_le_bytes());
        assert_eq!(&encoded[100..108], &123u64.to_le_bytes());
        assert_eq!(&encoded[108..116], &456u64.to_le_bytes());
        assert_eq!(encoded[116], 0); // NoOp
        assert_eq!(&encoded[117..], b"abc");
    }

    #[test]
    fn id_is_deterministic() {
        let key = PrivateKey::new();
        let tx = new_tx(b"hash test", &key);

        let id1 = tx.id();
        let id2 = tx.id();
        assert_eq!(id1, id2);

        let reencoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(reencoded.id(), id1);
    }

    #[test]
    fn same_data_different_keys_have_different_ids() {
        let key1 = PrivateKey::new();
        let key2 = PrivateKey::new();

        let tx1 = new_tx(b"identical data", &key1);
        let tx2 = new_tx(b"identical data", &key2);

        assert_ne!(tx1.id(), tx2.id());
    }

    #[test]
    fn decode_rejects_oversized_data_length() {
        let key = PrivateKey::new();
        let mut encoded = new_tx(b"x", &key).to_bytes();

        // Overwrite data_len with a value beyond the cap
        let oversized = (MAX_DATA_LEN as u32) + 1;
        encoded.make_mut()[96..100].copy_from_slice(&oversized.to_le_bytes());

        let result = Transaction::from_bytes(&encoded);
        assert_eq!(
            result,
            Err(DecodeError::TransactionTooLarge(MAX_DATA_LEN + 1))
        );
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let key = PrivateKey::new();
        let mut encoded = new_tx(b"x", &key).to_bytes();
        encoded.make_mut()[116] = 0x7F;

        let result = Transaction::from_bytes(&encoded);
        assert_eq!(result, Err(DecodeError::UnknownTag(0x7F)));
    }

    #[test]
    fn decode_fails_on_truncated_input() {
        let key = PrivateKey::new();
        let encoded = new_tx(b"truncate me", &key).to_bytes();

        for truncate_at in [0, 16, 32, 96, 100, encoded.len() - 1] {
            let result = Transaction::from_bytes(&encoded[..truncate_at]);
            assert_eq!(
                result,
                Err(DecodeError::UnexpectedEndOfStream),
                "should fail at truncation point {truncate_at}"
            );
        }
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let key = PrivateKey::new();
        let mut encoded = new_tx(b"x", &key).to_bytes();
        encoded.extend_from_slice(&[0xDE, 0xAD]);

        let result = Transaction::from_bytes(&encoded);
        assert_eq!(result, Err(DecodeError::InvalidValue));
    }

    #[test]
    fn multiple_transactions_decode_sequentially() {
        let key = PrivateKey::new();
        let tx1 = new_tx(b"first", &key);
        let tx2 = new_tx(b"second", &key);

        let mut buffer = Vec::new();
        tx1.encode(&mut buffer);
        tx2.encode(&mut buffer);

        let mut slice = buffer.as_slice();
        let decoded1 = Transaction::decode(&mut slice).expect("tx1 decode failed");
        let decoded2 = Transaction::decode(&mut slice).expect("tx2 decode failed");

        assert!(slice.is_empty(), "all bytes should be consumed");
        assert_eq!(tx1, decoded1);
        assert_eq!(tx2, decoded2);
    }
}
