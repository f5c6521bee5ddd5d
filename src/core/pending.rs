//! Pool of verified transactions awaiting block inclusion.
//!
//! Provides thread-safe storage with deterministic insertion-order
//! enumeration for proposal snapshots.

use crate::core::transaction::Transaction;
use crate::types::hash::Hash;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::RwLock;

/// Default pending pool capacity.
pub const PENDING_CAPACITY: usize = 100_000;

/// Thread-safe pool of verified transactions keyed by id.
///
/// Maintains insertion order for deterministic block construction while
/// providing O(1) lookup. Capacity is a hard bound: the verifier reserves
/// room for a whole accepted batch before inserting, and drops the batch
/// when the reservation fails.
///
/// Ids are BLAKE3 content addresses, so inserting a duplicate id overwrites
/// a byte-identical transaction; the original insertion-order slot is kept
/// and snapshots never contain duplicate ids.
pub struct PendingPool {
    /// Transactions indexed by id for fast lookup and deduplication.
    transactions: DashMap<Hash, Arc<Transaction>>,
    /// Insertion order for deterministic snapshot enumeration.
    order: RwLock<Vec<Hash>>,
    /// Maximum number of transactions the pool will hold.
    capacity: usize,
}

impl PendingPool {
    /// Creates a new pool with the given capacity.
    ///
    /// Uses `PENDING_CAPACITY` if `None` is provided.
    pub fn new(capacity: Option<usize>) -> Self {
        let cap = capacity.unwrap_or(PENDING_CAPACITY);

        Self {
            transactions: DashMap::with_capacity(cap),
            order: RwLock::new(Vec::with_capacity(cap)),
            capacity: cap,
        }
    }

    /// Returns the number of transactions in the pool.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Returns true if the pool holds no transactions.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Returns `true` if the pool contains a transaction with the given id.
    pub fn contains(&self, id: Hash) -> bool {
        self.transactions.contains_key(&id)
    }

    /// Checks that `additional` more transactions fit within capacity.
    ///
    /// The caller inserts immediately after a successful reservation;
    /// concurrent batches may interleave, so the bound is approximate by at
    /// most one in-flight batch per verification task.
    pub fn try_reserve(&self, additional: usize) -> bool {
        self.transactions.len() + additional <= self.capacity
    }

    /// Inserts a transaction keyed by its id.
    ///
    /// A duplicate id overwrites the stored value and keeps its original
    /// insertion-order slot.
    pub fn insert(&self, transaction: Arc<Transaction>) {
        let id = transaction.id();
        let mut order = self.order.write().unwrap();

        if self.transactions.insert(id, transaction).is_none() {
            order.push(id);
        }
    }

    /// Removes and returns the transaction with the given id.
    ///
    /// The insertion-order vector is compacted lazily by [`Self::snapshot`].
    pub fn remove(&self, id: Hash) -> Option<Arc<Transaction>> {
        self.transactions.remove(&id).map(|(_, tx)| tx)
    }

    /// Returns up to `max` transaction ids in insertion order.
    ///
    /// Also compacts insertion-order slots left behind by removals.
    pub fn snapshot(&self, max: usize) -> Vec<Hash> {
        let mut order = self.order.write().unwrap();
        order.retain(|id| self.transactions.contains_key(id));

        order.iter().take(max).copied().collect()
    }

    /// Removes all transactions from the pool.
    pub fn clear(&self) {
        self.transactions.clear();
        self.order.write().unwrap().clear();
    }
}
