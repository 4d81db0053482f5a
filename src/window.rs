//! Bounded, block-number-ordered window of fee samples.

use std::collections::BTreeMap;

use crate::models::{Sample, Snapshot};

/// How a sample reached the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSource {
    Network,
    Cache,
}

/// Result of an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insertion {
    pub block_number: u64,
    pub source: SampleSource,
    /// Block pushed out to keep the window within capacity.
    pub evicted: Option<u64>,
}

/// Samples keyed by block number, holding at most `capacity` entries.
///
/// Eviction always removes the lowest block number, whatever the insertion
/// order was. Missing block numbers are simply absent.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: BTreeMap<u64, Sample>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, sample: Sample) -> Insertion {
        self.put(sample, SampleSource::Network)
    }

    /// Same as [`insert`](Self::insert) for a sample rebuilt from a
    /// previously persisted snapshot.
    pub fn insert_cached(&mut self, sample: Sample) -> Insertion {
        self.put(sample, SampleSource::Cache)
    }

    fn put(&mut self, sample: Sample, source: SampleSource) -> Insertion {
        let block_number = sample.block_number;
        self.samples.insert(block_number, sample);

        let evicted = if self.samples.len() > self.capacity {
            self.samples.pop_first().map(|(number, _)| number)
        } else {
            None
        };

        Insertion {
            block_number,
            source,
            evicted,
        }
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn oldest_block(&self) -> Option<u64> {
        self.samples.keys().next().copied()
    }

    pub fn newest_block(&self) -> Option<u64> {
        self.samples.keys().next_back().copied()
    }

    /// Sample with the highest block number.
    pub fn newest_sample(&self) -> Option<&Sample> {
        self.samples.values().next_back()
    }

    pub fn contains(&self, block_number: u64) -> bool {
        self.samples.contains_key(&block_number)
    }

    pub fn get(&self, block_number: u64) -> Option<&Sample> {
        self.samples.get(&block_number)
    }

    /// Column projection of the window, `None` while it is empty.
    ///
    /// Blocks without fee-bearing transactions are left out of the columns
    /// but still count for `last_block`.
    pub fn to_snapshot(&self, provider_id: &str) -> Option<Snapshot> {
        let (&last_block, last) = self.samples.iter().next_back()?;

        let mut retained: Vec<&Sample> = self.samples.values().filter(|s| s.has_fees()).collect();
        // stable sort keeps block order for equal timestamps
        retained.sort_by_key(|s| s.timestamp);

        let with_base_fee = retained.iter().any(|s| s.base_fee.is_some());

        Some(Snapshot {
            ntx: retained.iter().map(|s| s.transaction_count).collect(),
            timestamp: retained.iter().map(|s| s.timestamp).collect(),
            fee_list: retained.iter().map(|s| s.fee_list.clone()).collect(),
            average_gas: retained
                .iter()
                .map(|s| s.average_gas.unwrap_or_default())
                .collect(),
            base_fee: if with_base_fee {
                retained.iter().map(|s| s.base_fee).collect()
            } else {
                Vec::new()
            },
            block: retained.iter().map(|s| s.block_number).collect(),
            last_block,
            last_time: last.timestamp,
            provider_id: provider_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(block_number: u64, fees: &[f64]) -> Sample {
        Sample {
            block_number,
            transaction_count: fees.len(),
            fee_list: fees.to_vec(),
            average_gas: (!fees.is_empty()).then(|| 21_000.0),
            base_fee: None,
            timestamp: 1_000 + block_number * 12,
        }
    }

    #[test]
    fn eviction_drops_the_lowest_block() {
        let mut window = SampleWindow::new(3);
        for n in [1, 2, 3] {
            assert_eq!(window.insert(sample(n, &[1.0])).evicted, None);
        }
        let insertion = window.insert(sample(4, &[2.0, 3.0]));
        assert_eq!(insertion.evicted, Some(1));
        assert_eq!(window.size(), 3);
        assert_eq!(window.oldest_block(), Some(2));
        assert_eq!(window.newest_block(), Some(4));
        assert!(window.is_full());

        let snapshot = window.to_snapshot("node").unwrap();
        assert_eq!(snapshot.last_block, 4);
        assert_eq!(snapshot.last_time, 1_048);
        assert_eq!(window.newest_sample().map(|s| s.timestamp), Some(snapshot.last_time));
        assert_eq!(snapshot.ntx, vec![1, 1, 2]);
        assert_eq!(snapshot.block, vec![2, 3, 4]);
    }

    #[test]
    fn late_older_block_is_the_one_evicted() {
        let mut window = SampleWindow::new(2);
        window.insert(sample(10, &[1.0]));
        window.insert(sample(11, &[1.0]));
        let insertion = window.insert_cached(sample(5, &[1.0]));
        assert_eq!(insertion.source, SampleSource::Cache);
        assert_eq!(insertion.evicted, Some(5));
        assert!(!window.contains(5));
    }

    #[test]
    fn overwrite_does_not_grow_the_window() {
        let mut window = SampleWindow::new(2);
        window.insert(sample(1, &[1.0]));
        window.insert(sample(1, &[9.0]));
        assert_eq!(window.size(), 1);
        assert_eq!(window.get(1).unwrap().fee_list, vec![9.0]);
    }

    #[test]
    fn empty_blocks_count_for_last_block_but_not_columns() {
        let mut window = SampleWindow::new(3);
        window.insert(sample(1, &[1.0]));
        window.insert(sample(2, &[]));
        window.insert(sample(3, &[]));

        let snapshot = window.to_snapshot("node").unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.last_block, 3);
        assert!(snapshot.is_consistent());
        assert!(snapshot.base_fee.is_empty());
    }

    #[test]
    fn columns_follow_timestamp_order() {
        let mut window = SampleWindow::new(3);
        let mut early = sample(9, &[1.0]);
        early.timestamp = 10;
        let mut late = sample(8, &[2.0]);
        late.timestamp = 20;
        late.base_fee = Some(3.5);
        window.insert(early);
        window.insert(late);

        let snapshot = window.to_snapshot("node").unwrap();
        assert_eq!(snapshot.block, vec![9, 8]);
        assert_eq!(snapshot.base_fee, vec![None, Some(3.5)]);
        assert_eq!(snapshot.last_block, 9);
        assert_eq!(snapshot.last_time, 10);
    }

    #[test]
    fn empty_window_has_no_snapshot() {
        assert!(SampleWindow::new(5).to_snapshot("node").is_none());
    }

    proptest! {
        #[test]
        fn size_stays_bounded_and_evicts_minimum(
            capacity in 1usize..16,
            blocks in proptest::collection::vec(0u64..64, 1..200),
        ) {
            let mut window = SampleWindow::new(capacity);
            for n in blocks {
                let before_min = window.oldest_block();
                let already_present = window.contains(n);
                let insertion = window.insert(sample(n, &[1.0]));
                prop_assert!(window.size() <= capacity);
                if let Some(evicted) = insertion.evicted {
                    let expected = before_min.map_or(n, |m| m.min(n));
                    prop_assert_eq!(evicted, expected);
                    prop_assert!(!already_present);
                }
            }
        }

        #[test]
        fn snapshot_is_side_effect_free(
            blocks in proptest::collection::vec((0u64..64, 0usize..4), 1..50),
        ) {
            let mut window = SampleWindow::new(10);
            for (n, txs) in blocks {
                window.insert(sample(n, &vec![1.5; txs]));
            }
            let first = window.to_snapshot("node");
            let second = window.to_snapshot("node");
            prop_assert_eq!(first, second);
        }
    }
}
