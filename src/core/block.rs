//! Block structure: an immutable, content-addressed list of transaction ids.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::Hash;

/// Maximum number of transaction ids a block may carry.
pub const MAX_TRANSACTION_IDS: usize = 65535;

/// An immutable block referencing its transactions by id.
///
/// Blocks carry ids rather than full transactions; the bodies stay in the
/// pending pool until finalization removes them. The id is the BLAKE3 hash
/// of the canonical serialization, computed once at construction and
/// recomputed on decode - it is never read from the wire.
///
/// # Wire layout
///
/// Little-endian, packed:
///
/// ```text
/// height:u64 || merkle_root(32) || num_ids:u16 || ids(num_ids x 32)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position in the chain; the first proposed block has height 1.
    pub height: u64,
    /// Reserved commitment field. Always zero in this protocol revision.
    pub merkle_root: Hash,
    /// Ids of the transactions included in this block, in snapshot order.
    pub transaction_ids: Box<[Hash]>,

    /// Content id, computed once at construction or decode.
    id: Hash,
}

impl Block {
    /// Creates a new block from its fields, computing the content id.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_TRANSACTION_IDS`] ids are supplied.
    pub fn new(height: u64, merkle_root: Hash, transaction_ids: Vec<Hash>) -> Self {
        assert!(
            transaction_ids.len() <= MAX_TRANSACTION_IDS,
            "block exceeds {} transaction ids",
            MAX_TRANSACTION_IDS
        );

        let mut block = Block {
            height,
            merkle_root,
            transaction_ids: transaction_ids.into_boxed_slice(),
            id: Hash::zero(),
        };
        block.id = block.compute_id();
        block
    }

    /// Returns the unique block identifier.
    pub fn id(&self) -> Hash {
        self.id
    }

    /// Returns the serialized size in bytes.
    pub fn encoded_len(&self) -> usize {
        8 + 32 + 2 + self.transaction_ids.len() * 32
    }

    /// Computes the content id over the canonical serialization.
    fn compute_id(&self) -> Hash {
        let mut h = Hash::blake3();
        self.encode(&mut h);
        h.finalize()
    }
}

impl Encode for Block {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.height.encode(out);
        self.merkle_root.encode(out);
        (self.transaction_ids.len() as u16).encode(out);
        for id in self.transaction_ids.iter() {
            id.encode(out);
        }
    }
}

impl Decode for Block {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let height = u64::decode(input)?;
        let merkle_root = Hash::decode(input)?;
        let num_ids = u16::decode(input)? as usize;

        let mut transaction_ids = Vec::with_capacity(num_ids);
        for _ in 0..num_ids {
            transaction_ids.push(Hash::decode(input)?);
        }

        let mut block = Block {
            height,
            merkle_root,
            transaction_ids: transaction_ids.into_boxed_slice(),
            id: Hash::zero(),
        };
        block.id = block.compute_id();
        Ok(block)
    }
}
