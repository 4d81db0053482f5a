//! Growing the window backwards from its oldest block.
//!
//! Blocks already present in the last persisted snapshot are taken from it
//! directly. Past the cached range, a single network fetch is made per
//! call so that live polling keeps its pace while history fills in.

use tracing::debug;

use crate::ingest_stats::INGEST_STATS;
use crate::models::{BlockTag, Snapshot};
use crate::normalize::FeeNormalizer;
use crate::provider::ChainDataProvider;
use crate::window::{Insertion, SampleSource, SampleWindow};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillProgress {
    /// Blocks restored from the snapshot, newest first.
    pub cached: Vec<u64>,
    /// Block fetched from the provider, if the fetch succeeded.
    pub fetched: Option<u64>,
    /// Block the provider was asked for, whatever the outcome.
    pub attempted: Option<u64>,
}

impl BackfillProgress {
    pub fn made_progress(&self) -> bool {
        !self.cached.is_empty() || self.fetched.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackfillController {
    cache: Option<Snapshot>,
    floor: u64,
}

impl BackfillController {
    pub fn new(cache: Option<Snapshot>) -> Self {
        Self { cache, floor: 0 }
    }

    /// Lowest block number backfill may reach.
    pub fn with_floor(mut self, floor: u64) -> Self {
        self.floor = floor;
        self
    }

    /// Replaces the cached snapshot with one that was just persisted.
    pub fn refresh_cache(&mut self, snapshot: Snapshot) {
        self.cache = Some(snapshot);
    }

    /// Next block to backfill. An empty window resumes from the top of the
    /// cached snapshot; without one there is nothing to walk back from.
    pub fn next_block(&self, window: &SampleWindow) -> Option<u64> {
        let next = match window.oldest_block() {
            Some(oldest) => oldest.checked_sub(1)?,
            None => self.cache.as_ref()?.last_block,
        };
        (next >= self.floor).then_some(next)
    }

    /// One backfill step towards `target` samples.
    ///
    /// A failed fetch, or a block without transactions, leaves the window
    /// untouched, so the same block is asked for again on the next call.
    pub async fn backfill(
        &mut self,
        window: &mut SampleWindow,
        target: usize,
        provider: &dyn ChainDataProvider,
        normalizer: &FeeNormalizer,
    ) -> BackfillProgress {
        let target = target.min(window.capacity());
        let mut progress = BackfillProgress::default();

        while window.size() < target {
            let Some(next) = self.next_block(window) else {
                return progress;
            };
            let Some(sample) = self.cache.as_ref().and_then(|c| c.cached_sample(next)) else {
                break;
            };
            note_insertion(&window.insert_cached(sample));
            progress.cached.push(next);
        }

        if window.size() >= target {
            return progress;
        }
        let Some(next) = self.next_block(window) else {
            return progress;
        };

        progress.attempted = Some(next);
        INGEST_STATS.inc_backfill_fetches(1);
        match provider.get_block(BlockTag::Number(next)).await {
            Ok(Some(block)) if block.transactions.is_empty() => {
                debug!(block = next, "backfill block has no transactions yet")
            }
            Ok(Some(block)) => {
                let sample = normalizer.sample(provider, block).await;
                progress.fetched = Some(sample.block_number);
                note_insertion(&window.insert(sample));
            }
            Ok(None) => debug!(block = next, "backfill block not available yet"),
            Err(err) => debug!(block = next, error = %err, "backfill fetch failed"),
        }
        progress
    }
}

fn note_insertion(insertion: &Insertion) {
    match insertion.source {
        SampleSource::Cache => {
            INGEST_STATS.inc_cache_hits(1);
            debug!(block = insertion.block_number, "block hit cache");
        }
        SampleSource::Network => {
            debug!(block = insertion.block_number, "block backfilled from provider");
        }
    }
}
