use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use rust_gas_sampler::config::ConfigError;
use rust_gas_sampler::models::{BlockTag, RawBlock, RawTx, TxReceipt};
use rust_gas_sampler::normalize::{FeeMode, FeeNormalizer, FeeUnit};
use rust_gas_sampler::provider::{ChainDataProvider, ProviderError};
use rust_gas_sampler::scheduler::{IntervalPolicy, Scheduler, SchedulerSettings, TickState};
use rust_gas_sampler::selector::{CandidateSource, ProviderSelector};
use rust_gas_sampler::storage::{FileStore, SnapshotStore};

const NOW: u64 = 1_700_000_000;

/// A chain whose head can be moved forward between ticks.
struct Chain {
    head: Mutex<u64>,
    blocks: HashMap<u64, RawBlock>,
}

impl Chain {
    fn new(head: u64, range: std::ops::RangeInclusive<u64>) -> Self {
        let blocks = range
            .map(|n| {
                let block = RawBlock {
                    number: n,
                    timestamp: NOW - 100 + n,
                    gas_used: 42_000,
                    transactions: vec![
                        RawTx {
                            hash: format!("0x{:x}a", n),
                            fee: Some(format!("{}", n * 1_000_000_000)),
                        },
                        RawTx {
                            hash: format!("0x{:x}b", n),
                            fee: Some("2000000000".to_string()),
                        },
                    ],
                    base_fee: None,
                };
                (n, block)
            })
            .collect();
        Self {
            head: Mutex::new(head),
            blocks,
        }
    }

    fn advance_to(&self, head: u64) {
        *self.head.lock().unwrap() = head;
    }
}

#[async_trait]
impl ChainDataProvider for Chain {
    fn id(&self) -> &str {
        "http://scripted"
    }

    async fn get_height(&self) -> Result<u64, ProviderError> {
        Ok(*self.head.lock().unwrap())
    }

    async fn get_block(&self, tag: BlockTag) -> Result<Option<RawBlock>, ProviderError> {
        let head = *self.head.lock().unwrap();
        let number = match tag {
            BlockTag::Latest => head,
            BlockTag::Number(n) if n > head => return Ok(None),
            BlockTag::Number(n) => n,
        };
        Ok(self.blocks.get(&number).cloned())
    }

    async fn get_base_fee(&self, _tag: BlockTag) -> Result<Option<f64>, ProviderError> {
        Ok(Some(7.0))
    }

    async fn get_tx_receipt(&self, _hash: &str) -> Result<TxReceipt, ProviderError> {
        Err(ProviderError::Unsupported("receipts"))
    }
}

struct Fixed(Vec<Arc<dyn ChainDataProvider>>);

#[async_trait]
impl CandidateSource for Fixed {
    async fn refresh(&mut self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn candidates(&self) -> Vec<Arc<dyn ChainDataProvider>> {
        self.0.clone()
    }
}

fn settings(sample_size: usize) -> SchedulerSettings {
    SchedulerSettings {
        sample_size,
        base_interval_ms: 1000.0,
        policy: IntervalPolicy::new(100.0, 15000.0),
        resync_every: 100,
        selector: ProviderSelector::new(Duration::from_secs(300)),
        normalizer: FeeNormalizer::new(FeeUnit::Gwei, FeeMode::Nominal),
        legacy_gas: None,
        backfill_floor: 0,
    }
}

#[tokio::test]
async fn window_fills_persists_and_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blockStats_ethereum.json");
    let chain = Arc::new(Chain::new(20, 1..=30));
    let provider: Arc<dyn ChainDataProvider> = chain.clone();
    let store: Arc<dyn SnapshotStore> = Arc::new(FileStore::new(&path));

    let mut sampler = Scheduler::connect(
        settings(4),
        Box::new(Fixed(vec![provider.clone()])),
        store.clone(),
    )
    .await
    .unwrap();

    // head plus one backfilled block per tick
    assert_eq!(sampler.tick(NOW).await, TickState::Init);
    assert_eq!(sampler.window().size(), 2);
    assert_eq!(sampler.tick(NOW).await, TickState::Backfilling);
    assert_eq!(sampler.tick(NOW).await, TickState::Backfilling);
    assert_eq!(sampler.window().size(), 4);
    assert_eq!(sampler.window().oldest_block(), Some(17));
    assert!(store.read().await.unwrap().is_none());

    chain.advance_to(21);
    assert_eq!(sampler.tick(NOW).await, TickState::Success);
    assert_eq!(sampler.window().oldest_block(), Some(18));

    let raw = std::fs::read_to_string(&path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["lastBlock"], 21);
    assert_eq!(doc["ntx"].as_array().unwrap().len(), 4);
    assert_eq!(doc["minGwei"][3], serde_json::json!([2.0, 21.0]));
    assert_eq!(doc["avgGas"][3], 21_000.0);
    assert_eq!(doc["baseFee"][3], 7.0);
    assert_eq!(doc["rpc"], "http://scripted");

    // a restarted sampler takes history from the file instead of the network
    drop(sampler);
    chain.advance_to(22);
    let mut restarted = Scheduler::connect(
        settings(4),
        Box::new(Fixed(vec![provider.clone()])),
        store,
    )
    .await
    .unwrap();
    restarted.tick(NOW).await;
    assert_eq!(restarted.window().size(), 4);
    assert_eq!(restarted.window().oldest_block(), Some(19));
    assert_eq!(restarted.window().get(19).unwrap().fee_list, vec![2.0, 19.0]);
}
