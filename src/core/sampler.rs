//! Snowball repeated-sampling consensus state machine.
//!
//! The sampler observes one vote slate per round. A slate whose strongest
//! vote reaches the confidence threshold counts toward the preferred block;
//! enough consecutive identical strong majorities finalize it, while a run
//! of weak majorities makes the sampler abandon its preference so the
//! proposer can try again.

use crate::core::block::Block;
use crate::types::hash::Hash;
use std::collections::HashMap;
use std::sync::Arc;

/// Minimum tally fraction qualifying a vote as a strong majority.
pub const ALPHA: f64 = 0.80;

/// Consecutive-observation threshold for finalization, and for abandoning
/// a preference under sustained weak majorities.
pub const BETA: u32 = 150;

/// A single sampled vote: a block candidate and the fraction of the sample
/// that endorsed it.
#[derive(Debug, Clone)]
pub struct Vote {
    /// The endorsed block, or `None` for an abstention.
    pub block: Option<Arc<Block>>,
    /// Endorsing fraction of the sample, in `[0.0, 1.0]`.
    pub tally: f64,
}

/// Snowball consensus state over block candidates.
///
/// `update` is driven from a single task; the struct itself is not
/// synchronized.
pub struct Sampler {
    /// Confidence counter per observed block id. Grows monotonically
    /// within a round.
    counts: HashMap<Hash, u64>,
    /// Consecutive observations of the same strong majority.
    consecutive_count: u32,
    /// Consecutive weak-majority observations.
    stalled: u32,
    /// Block with the highest observed confidence.
    preferred: Option<Arc<Block>>,
    /// Strong majority observed by the previous update.
    last: Option<Arc<Block>>,
}

impl Sampler {
    /// Creates an empty sampler.
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            consecutive_count: 0,
            stalled: 0,
            preferred: None,
            last: None,
        }
    }

    /// Returns the currently preferred block, if any.
    pub fn preferred(&self) -> Option<&Arc<Block>> {
        self.preferred.as_ref()
    }

    /// Returns the number of consecutive weak-majority observations.
    pub fn stalled(&self) -> u32 {
        self.stalled
    }

    /// Injects a proposal as the preferred block, replacing any previous
    /// preference.
    ///
    /// Used by the proposer to seed a round.
    pub fn prefer(&mut self, block: Arc<Block>) {
        self.preferred = Some(block);
    }

    /// Feeds one vote slate into the state machine.
    ///
    /// Returns the finalized block once the preferred block has been the
    /// strong majority for more than [`BETA`] consecutive observations;
    /// otherwise `None`.
    pub fn update(&mut self, votes: &[Vote]) -> Option<Arc<Block>> {
        let majority = match strongest(votes) {
            Some(vote) => vote,
            None => {
                // Nothing to sample, or every voter abstained.
                if !votes.is_empty() {
                    self.consecutive_count = 0;
                }
                return None;
            }
        };
        let block = majority.block.as_ref().expect("strongest vote has a block");

        if majority.tally < ALPHA {
            self.stalled += 1;
            if self.stalled >= BETA {
                self.preferred = None;
                self.stalled = 0;
            }
            self.consecutive_count = 0;
            return None;
        }

        let count = {
            let entry = self.counts.entry(block.id()).or_insert(0);
            *entry += 1;
            *entry
        };

        match &self.preferred {
            Some(preferred) => {
                let preferred_count = self.counts.get(&preferred.id()).copied().unwrap_or(0);
                if count > preferred_count {
                    self.preferred = Some(block.clone());
                }
            }
            None => self.preferred = Some(block.clone()),
        }

        let same_as_last = self
            .last
            .as_ref()
            .map(|last| last.id() == block.id())
            .unwrap_or(false);

        if !same_as_last {
            self.last = Some(block.clone());
            self.consecutive_count = 1;
            return None;
        }

        self.consecutive_count += 1;
        if self.consecutive_count > BETA {
            return self.preferred.clone();
        }

        None
    }

    /// Clears all round state: confidence counters, streak counters, and
    /// block references.
    pub fn reset(&mut self) {
        self.counts.clear();
        self.consecutive_count = 0;
        self.stalled = 0;
        self.preferred = None;
        self.last = None;
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the non-abstaining vote with the highest tally.
fn strongest(votes: &[Vote]) -> Option<&Vote> {
    votes
        .iter()
        .filter(|v| v.block.is_some())
        .max_by(|a, b| {
            a.tally
                .partial_cmp(&b.tally)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(height: u64) -> Arc<Block> {
        Arc::new(Block::new(height, Hash::zero(), vec![]))
    }

    fn vote(block: &Arc<Block>, tally: f64) -> Vote {
        Vote {
            block: Some(block.clone()),
            tally,
        }
    }

    #[test]
    fn empty_slate_is_no_decision() {
        let mut sampler = Sampler::new();
        assert!(sampler.update(&[]).is_none());
        assert!(sampler.preferred().is_none());
    }

    #[test]
    fn all_abstentions_reset_streak() {
        let mut sampler = Sampler::new();
        let b = block(1);
        sampler.prefer(b.clone());

        // Build a streak, then interrupt it with an abstaining slate.
        for _ in 0..10 {
            assert!(sampler.update(&[vote(&b, 1.0)]).is_none());
        }
        let abstain = [Vote {
            block: None,
            tally: 1.0,
        }];
        assert!(sampler.update(&abstain).is_none());

        // The streak restarts: BETA + 1 observations are needed again.
        for _ in 0..BETA {
            assert!(sampler.update(&[vote(&b, 1.0)]).is_none());
        }
        assert!(sampler.update(&[vote(&b, 1.0)]).is_some());
    }

    #[test]
    fn finalizes_after_beta_plus_one_strong_votes() {
        let mut sampler = Sampler::new();
        let b = block(1);
        sampler.prefer(b.clone());

        // The first BETA observations build the streak without deciding.
        for i in 0..BETA {
            assert!(
                sampler.update(&[vote(&b, 1.0)]).is_none(),
                "decided early at observation {}",
                i + 1
            );
        }

        let finalized = sampler.update(&[vote(&b, 1.0)]);
        assert_eq!(finalized.expect("should finalize").id(), b.id());
    }

    #[test]
    fn weak_majorities_clear_preference() {
        let mut sampler = Sampler::new();
        let b = block(1);
        sampler.prefer(b.clone());

        for i in 0..BETA {
            assert!(
                sampler.update(&[vote(&b, 0.5)]).is_none(),
                "decided at weak observation {}",
                i + 1
            );
        }

        assert!(sampler.preferred().is_none());
        assert_eq!(sampler.stalled(), 0);
    }

    #[test]
    fn weak_majority_resets_consecutive_streak() {
        let mut sampler = Sampler::new();
        let b = block(1);
        sampler.prefer(b.clone());

        for _ in 0..BETA {
            sampler.update(&[vote(&b, 1.0)]);
        }
        // One weak observation breaks the streak right before finalization.
        sampler.update(&[vote(&b, 0.5)]);

        for _ in 0..BETA {
            assert!(sampler.update(&[vote(&b, 1.0)]).is_none());
        }
        assert!(sampler.update(&[vote(&b, 1.0)]).is_some());
    }

    #[test]
    fn adopts_majority_when_no_preference() {
        let mut sampler = Sampler::new();
        let b = block(1);

        assert!(sampler.update(&[vote(&b, 1.0)]).is_none());
        assert_eq!(sampler.preferred().unwrap().id(), b.id());
    }

    #[test]
    fn switches_preference_when_count_exceeded() {
        let mut sampler = Sampler::new();
        let a = block(1);
        let b = block(2);

        sampler.update(&[vote(&a, 1.0)]);
        assert_eq!(sampler.preferred().unwrap().id(), a.id());

        // Two observations of b exceed a's single count.
        sampler.update(&[vote(&b, 1.0)]);
        sampler.update(&[vote(&b, 1.0)]);
        assert_eq!(sampler.preferred().unwrap().id(), b.id());
    }

    #[test]
    fn majority_switch_restarts_streak_at_one() {
        let mut sampler = Sampler::new();
        let a = block(1);
        let b = block(2);

        for _ in 0..100 {
            sampler.update(&[vote(&a, 1.0)]);
        }
        // Switch the majority; the streak restarts at 1, so b needs BETA
        // more observations after this one to finalize.
        sampler.update(&[vote(&b, 1.0)]);

        for i in 0..BETA - 1 {
            assert!(
                sampler.update(&[vote(&b, 1.0)]).is_none(),
                "decided early at observation {}",
                i + 2
            );
        }
        assert!(sampler.update(&[vote(&b, 1.0)]).is_some());
    }

    #[test]
    fn strongest_vote_wins_plural_slate() {
        let mut sampler = Sampler::new();
        let a = block(1);
        let b = block(2);

        let slate = [vote(&a, 0.3), vote(&b, 0.9)];
        sampler.update(&slate);
        assert_eq!(sampler.preferred().unwrap().id(), b.id());
    }

    #[test]
    fn reset_clears_all_state() {
        let mut sampler = Sampler::new();
        let b = block(1);
        sampler.prefer(b.clone());
        for _ in 0..10 {
            sampler.update(&[vote(&b, 1.0)]);
        }

        sampler.reset();
        assert!(sampler.preferred().is_none());
        assert_eq!(sampler.stalled(), 0);

        // A fresh round needs the full streak again.
        sampler.prefer(b.clone());
        for _ in 0..BETA {
            assert!(sampler.update(&[vote(&b, 1.0)]).is_none());
        }
        assert!(sampler.update(&[vote(&b, 1.0)]).is_some());
    }
}
