//! Batched transaction signature verification pipeline.
//!
//! Transactions accumulate into batches that are verified on the blocking
//! thread pool with amortized Ed25519 batch verification. Parallelism is
//! bounded by a semaphore; producers pushing into a saturated pipeline
//! suspend until a verification task completes. A background loop flushes
//! partial batches on an adaptive timer so low traffic still clears
//! promptly.

use crate::core::pending::PendingPool;
use crate::core::transaction::Transaction;
use crate::crypto::key_pair::{self, PublicKey, Signature};
use crate::warn;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Number of transactions verified together in one batched pass.
pub const MAX_BATCH_SIZE: usize = 64;

/// Maximum number of verification tasks in flight.
pub const MAX_PARALLEL_TASKS: usize = 256;

/// Initial (and minimum) delay of the adaptive flush loop. Also the minimum
/// spacing between two flushes.
pub const FLUSH_DELAY_MIN: Duration = Duration::from_millis(100);

/// Upper bound of the adaptive flush delay.
pub const FLUSH_DELAY_MAX: Duration = Duration::from_millis(500);

/// Errors surfaced by the verification pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifierError {
    /// The supplied context fired while waiting for pipeline capacity.
    #[error("verification cancelled by shutdown")]
    Cancelled,
}

/// Batched, bounded-parallelism transaction verification pipeline.
///
/// Accepted transactions are committed to the pending pool in batch input
/// order; across concurrent batches no ordering is guaranteed.
pub struct TransactionVerifier {
    /// Accumulating batch of transactions awaiting verification.
    entries: Mutex<Vec<Arc<Transaction>>>,
    /// Task permits; doubles as the capacity parker for saturated producers.
    permits: Arc<Semaphore>,
    /// Completion time of the most recent dispatch.
    last_flush: Mutex<Instant>,
    /// Destination pool for verified transactions.
    pending: Arc<PendingPool>,
}

impl TransactionVerifier {
    /// Creates a verifier committing into the given pending pool.
    pub fn new(pending: Arc<PendingPool>) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(MAX_BATCH_SIZE)),
            permits: Arc::new(Semaphore::new(MAX_PARALLEL_TASKS)),
            last_flush: Mutex::new(Instant::now()),
            pending,
        }
    }

    /// Enqueues a transaction for verification.
    ///
    /// When the accumulating batch reaches [`MAX_BATCH_SIZE`] the batch is
    /// dispatched immediately; if all task permits are taken, this suspends
    /// until capacity is available and fails only if `ctx` fires first.
    pub async fn push(
        &self,
        tx: Arc<Transaction>,
        ctx: &CancellationToken,
    ) -> Result<(), VerifierError> {
        let batch = {
            let mut entries = self.entries.lock().unwrap();
            entries.push(tx);
            if entries.len() >= MAX_BATCH_SIZE {
                Some(mem::take(&mut *entries))
            } else {
                None
            }
        };

        match batch {
            Some(batch) => self.dispatch(batch, ctx).await,
            None => Ok(()),
        }
    }

    /// Dispatches whatever is buffered, regardless of batch fill.
    ///
    /// Returns `true` if a batch was dispatched.
    pub async fn flush(&self, ctx: &CancellationToken) -> Result<bool, VerifierError> {
        let batch = {
            let mut entries = self.entries.lock().unwrap();
            if entries.is_empty() {
                None
            } else {
                Some(mem::take(&mut *entries))
            }
        };

        match batch {
            Some(batch) => {
                self.dispatch(batch, ctx).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Background loop flushing partial batches on an adaptive timer.
    ///
    /// The delay starts at [`FLUSH_DELAY_MIN`] and doubles on every idle
    /// tick up to [`FLUSH_DELAY_MAX`]. A tick flushes only when entries are
    /// buffered and at least [`FLUSH_DELAY_MIN`] has passed since the
    /// previous flush; a successful flush resets the delay to the minimum.
    pub async fn run(&self, ctx: CancellationToken) {
        let mut delay = FLUSH_DELAY_MIN;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = sleep(delay) => {}
            }

            let due = {
                let entries = self.entries.lock().unwrap();
                !entries.is_empty() && self.last_flush.lock().unwrap().elapsed() >= FLUSH_DELAY_MIN
            };

            if due {
                match self.flush(&ctx).await {
                    Ok(_) => delay = FLUSH_DELAY_MIN,
                    Err(VerifierError::Cancelled) => break,
                }
            } else {
                delay = (delay * 2).min(FLUSH_DELAY_MAX);
            }
        }
    }

    /// Waits for every in-flight verification task to complete, then
    /// releases any transactions still buffered.
    pub async fn shutdown(&self) {
        let drained = self
            .permits
            .acquire_many(MAX_PARALLEL_TASKS as u32)
            .await
            .expect("verifier semaphore closed");
        drop(drained);

        let leftover = mem::take(&mut *self.entries.lock().unwrap());
        if !leftover.is_empty() {
            warn!("releasing {} unverified transactions at shutdown", leftover.len());
        }
    }

    /// Returns the number of verification tasks currently in flight.
    pub fn active_tasks(&self) -> usize {
        MAX_PARALLEL_TASKS - self.permits.available_permits()
    }

    /// Acquires a task permit and hands the batch to the blocking pool.
    async fn dispatch(
        &self,
        batch: Vec<Arc<Transaction>>,
        ctx: &CancellationToken,
    ) -> Result<(), VerifierError> {
        let permit = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(VerifierError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.expect("verifier semaphore closed")
            }
        };

        *self.last_flush.lock().unwrap() = Instant::now();

        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            // Signature verification is CPU-bound; keep it off the I/O
            // executors.
            let accepted = tokio::task::spawn_blocking(move || verify_entries(batch))
                .await
                .unwrap_or_default();

            commit(&pending, accepted);
            drop(permit);
        });

        Ok(())
    }
}

/// Verifies a dispatched batch, returning the accepted transactions in
/// input order.
///
/// Full windows of [`MAX_BATCH_SIZE`] go through amortized batch
/// verification; a failed window falls back to per-transaction checks to
/// locate the offenders. The residual tail is always verified one by one.
fn verify_entries(batch: Vec<Arc<Transaction>>) -> Vec<Arc<Transaction>> {
    let mut accepted = Vec::with_capacity(batch.len());

    let mut windows = batch.chunks_exact(MAX_BATCH_SIZE);
    for window in windows.by_ref() {
        let payloads: Vec<Vec<u8>> = window.iter().map(|tx| tx.signing_payload()).collect();
        let messages: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let signatures: Vec<Signature> = window.iter().map(|tx| tx.signature).collect();
        let senders: Vec<PublicKey> = window.iter().map(|tx| tx.sender).collect();

        if key_pair::verify_batch(&messages, &signatures, &senders) {
            accepted.extend_from_slice(window);
        } else {
            verify_single(window, &mut accepted);
        }
    }
    verify_single(windows.remainder(), &mut accepted);

    accepted
}

/// Per-transaction fallback; rejected transactions are released.
fn verify_single(window: &[Arc<Transaction>], accepted: &mut Vec<Arc<Transaction>>) {
    for tx in window {
        if tx.verify() {
            accepted.push(tx.clone());
        } else {
            warn!("rejecting transaction {} with invalid signature", tx.id());
        }
    }
}

/// Commits an accepted batch into the pending pool.
///
/// When the capacity reservation fails the whole batch is dropped: the
/// transactions are released and will only reappear if a peer resends them.
fn commit(pending: &PendingPool, accepted: Vec<Arc<Transaction>>) {
    if accepted.is_empty() {
        return;
    }

    if !pending.try_reserve(accepted.len()) {
        warn!(
            "pending pool at capacity, dropping {} verified transactions",
            accepted.len()
        );
        return;
    }

    for tx in accepted {
        pending.insert(tx);
    }
}
