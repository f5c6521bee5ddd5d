//! Block proposal and finalization driver.
//!
//! The chain owns the pending pool and the sampler. While the sampler has
//! no preferred block, an adaptive-delay proposer snapshots pending
//! transactions into a candidate block; once a preference exists, the
//! finalization loop feeds the sampler one self-vote per observation until
//! it either finalizes the candidate or abandons it.

use crate::core::block::{Block, MAX_TRANSACTION_IDS};
use crate::core::pending::PendingPool;
use crate::core::sampler::{Sampler, Vote};
use crate::info;
use crate::types::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Initial (and minimum) proposer delay, and the minimum spacing between
/// two proposals.
pub const PROPOSE_DELAY_MIN: Duration = Duration::ZERO;

/// Upper bound of the adaptive proposer delay.
pub const PROPOSE_DELAY_MAX: Duration = Duration::from_millis(500);

/// Additive growth per idle tick: 10% of the delay span.
const PROPOSE_DELAY_STEP: Duration = Duration::from_millis(50);

/// Pending-transaction ownership plus the propose/finalize state machine.
///
/// `run` drives both loops from a single task, so the sampler only ever
/// sees single-threaded updates.
pub struct Chain {
    /// Verified transactions awaiting inclusion. Populated by the verifier.
    pending: Arc<PendingPool>,
    /// Snowball state over proposed candidates.
    sampler: Mutex<Sampler>,
    /// Most recently finalized block.
    latest_block: RwLock<Option<Arc<Block>>>,
    /// Wall-clock mark of the previous proposal.
    last_propose: Mutex<Instant>,
}

impl Chain {
    /// Creates a chain over the given pending pool with no finalized block.
    pub fn new(pending: Arc<PendingPool>) -> Self {
        Self {
            pending,
            sampler: Mutex::new(Sampler::new()),
            latest_block: RwLock::new(None),
            last_propose: Mutex::new(Instant::now()),
        }
    }

    /// Returns the pending pool populated by the verifier.
    pub fn pending(&self) -> &Arc<PendingPool> {
        &self.pending
    }

    /// Returns the most recently finalized block, if any.
    pub fn latest_block(&self) -> Option<Arc<Block>> {
        self.latest_block.read().unwrap().clone()
    }

    /// Returns the height of the latest finalized block, or 0 before the
    /// first finalization.
    pub fn height(&self) -> u64 {
        self.latest_block
            .read()
            .unwrap()
            .as_ref()
            .map(|b| b.height)
            .unwrap_or(0)
    }

    /// Drives propose/finalize cycles until `ctx` fires.
    pub async fn run(&self, ctx: CancellationToken) {
        let mut propose_delay = PROPOSE_DELAY_MIN;

        loop {
            if ctx.is_cancelled() {
                break;
            }

            let has_preference = self.sampler.lock().unwrap().preferred().is_some();
            if has_preference {
                if let Some(finalized) = self.finalize_step() {
                    info!(
                        "finalized block {} at height {} with {} transactions",
                        finalized.id(),
                        finalized.height,
                        finalized.transaction_ids.len()
                    );
                }
                // Stay cooperative between observations.
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = sleep(propose_delay) => {}
            }

            match self.propose() {
                Some(block) => {
                    info!(
                        "proposed block {} at height {} with {} transactions",
                        block.id(),
                        block.height,
                        block.transaction_ids.len()
                    );
                    propose_delay = PROPOSE_DELAY_MIN;
                }
                None => {
                    propose_delay = (propose_delay + PROPOSE_DELAY_STEP).min(PROPOSE_DELAY_MAX);
                }
            }
        }
    }

    /// Releases chain state after the run loop has exited.
    pub fn shutdown(&self) {
        self.pending.clear();
        self.sampler.lock().unwrap().reset();
        *self.latest_block.write().unwrap() = None;
    }

    /// Attempts one proposal: snapshots pending ids into a candidate block
    /// and seeds the sampler with it.
    ///
    /// Returns `None` on an idle tick - nothing pending, or the minimum
    /// spacing since the previous proposal has not elapsed yet.
    pub fn propose(&self) -> Option<Arc<Block>> {
        if self.pending.is_empty()
            || self.last_propose.lock().unwrap().elapsed() < PROPOSE_DELAY_MIN
        {
            return None;
        }

        let ids = self.pending.snapshot(MAX_TRANSACTION_IDS);
        let block = Arc::new(Block::new(self.height() + 1, Hash::zero(), ids));

        self.sampler.lock().unwrap().prefer(block.clone());
        *self.last_propose.lock().unwrap() = Instant::now();
        Some(block)
    }

    /// One finalization observation: submits the single self-vote slate
    /// and applies the outcome.
    ///
    /// On finalization, every included transaction is removed from pending
    /// (a missing id means the consensus state is inconsistent and panics),
    /// the latest block is replaced, and the sampler round is reset.
    pub fn finalize_step(&self) -> Option<Arc<Block>> {
        let mut sampler = self.sampler.lock().unwrap();

        let preferred = sampler.preferred()?.clone();
        let votes = [Vote {
            block: Some(preferred),
            tally: 1.0,
        }];
        let finalized = sampler.update(&votes)?;

        for id in finalized.transaction_ids.iter() {
            if self.pending.remove(*id).is_none() {
                panic!("finalized transaction {id} missing from pending");
            }
        }
        *self.latest_block.write().unwrap() = Some(finalized.clone());
        sampler.reset();

        Some(finalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sampler::BETA;
    use crate::core::transaction::{Transaction, TxTag};
    use crate::crypto::key_pair::PrivateKey;

    fn fill_pending(pending: &PendingPool, count: u64) -> Vec<Hash> {
        let key = PrivateKey::new();
        let mut ids = Vec::new();
        for nonce in 0..count {
            let tx = Arc::new(Transaction::new(b"tx", nonce, 0, TxTag::NoOp, &key));
            ids.push(tx.id());
            pending.insert(tx);
        }
        ids
    }

    /// Runs finalize steps until a block is produced or the bound is hit.
    fn finalize_round(chain: &Chain) -> Arc<Block> {
        for _ in 0..=BETA {
            if let Some(block) = chain.finalize_step() {
                return block;
            }
        }
        panic!("round did not finalize within BETA + 1 observations");
    }

    #[test]
    fn propose_returns_none_when_pending_is_empty() {
        let chain = Chain::new(Arc::new(PendingPool::new(None)));
        assert!(chain.propose().is_none());
    }

    #[test]
    fn propose_snapshots_pending_in_order() {
        let pending = Arc::new(PendingPool::new(None));
        let chain = Chain::new(pending.clone());
        let ids = fill_pending(&pending, 5);

        let block = chain.propose().expect("should propose");
        assert_eq!(block.height, 1);
        assert_eq!(block.merkle_root, Hash::zero());
        assert_eq!(block.transaction_ids.as_ref(), ids.as_slice());
    }

    #[test]
    fn finalize_step_without_preference_is_none() {
        let chain = Chain::new(Arc::new(PendingPool::new(None)));
        assert!(chain.finalize_step().is_none());
    }

    #[test]
    fn round_finalizes_after_beta_plus_one_observations() {
        let pending = Arc::new(PendingPool::new(None));
        let chain = Chain::new(pending.clone());
        let ids = fill_pending(&pending, 3);

        let proposed = chain.propose().expect("should propose");

        for i in 0..BETA {
            assert!(
                chain.finalize_step().is_none(),
                "finalized early at observation {}",
                i + 1
            );
        }
        let finalized = chain.finalize_step().expect("should finalize");

        assert_eq!(finalized.id(), proposed.id());
        assert_eq!(chain.latest_block().unwrap().id(), finalized.id());
        assert_eq!(chain.height(), 1);
        for id in ids {
            assert!(!pending.contains(id));
        }
    }

    #[test]
    fn finalization_leaves_later_arrivals_pending() {
        let pending = Arc::new(PendingPool::new(None));
        let chain = Chain::new(pending.clone());
        fill_pending(&pending, 2);

        chain.propose().expect("should propose");
        // A transaction verified after the snapshot must survive the round.
        let late = fill_pending(&pending, 1);

        let finalized = finalize_round(&chain);
        assert_eq!(finalized.transaction_ids.len(), 2);
        assert!(pending.contains(late[0]));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn heights_increase_across_rounds() {
        let pending = Arc::new(PendingPool::new(None));
        let chain = Chain::new(pending.clone());

        fill_pending(&pending, 1);
        chain.propose().unwrap();
        finalize_round(&chain);
        assert_eq!(chain.height(), 1);

        fill_pending(&pending, 1);
        let second = chain.propose().unwrap();
        assert_eq!(second.height, 2);
        finalize_round(&chain);
        assert_eq!(chain.height(), 2);
    }

    #[test]
    fn shutdown_clears_state() {
        let pending = Arc::new(PendingPool::new(None));
        let chain = Chain::new(pending.clone());
        fill_pending(&pending, 4);
        chain.propose().unwrap();

        chain.shutdown();
        assert!(pending.is_empty());
        assert!(chain.latest_block().is_none());
        assert!(chain.propose().is_none());
    }

    #[tokio::test]
    async fn run_loop_proposes_and_finalizes() {
        let pending = Arc::new(PendingPool::new(None));
        let chain = Arc::new(Chain::new(pending.clone()));
        let ctx = CancellationToken::new();

        let runner = {
            let chain = chain.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { chain.run(ctx).await })
        };

        fill_pending(&pending, 8);

        tokio::time::timeout(Duration::from_secs(5), async {
            while chain.latest_block().is_none() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("run loop never finalized a block");

        ctx.cancel();
        runner.await.unwrap();

        let finalized = chain.latest_block().unwrap();
        assert_eq!(finalized.height, 1);
        assert_eq!(finalized.transaction_ids.len(), 8);
        assert!(pending.is_empty());
    }
}
