use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::{Block, BlockNumber, Transaction, H256, U256};
use ethers_providers::{Http, Middleware, Provider};
use url::Url;

use super::{ChainDataProvider, ProviderError};
use crate::models::{BlockTag, RawBlock, RawTx, TxReceipt};

/// JSON-RPC provider for EVM chains.
#[derive(Clone)]
pub struct EvmProvider {
    endpoint: String,
    provider: Provider<Http>,
}

impl EvmProvider {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let invalid = |reason: String| ProviderError::InvalidEndpoint {
            endpoint: rpc_url.to_string(),
            reason,
        };
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(e.to_string()))?;
        let url = Url::parse(rpc_url).map_err(|e| invalid(e.to_string()))?;
        let transport = Http::new_with_client(url, client);
        Ok(Self {
            endpoint: rpc_url.to_string(),
            provider: Provider::new(transport),
        })
    }
}

#[async_trait]
impl ChainDataProvider for EvmProvider {
    fn id(&self) -> &str {
        &self.endpoint
    }

    async fn get_height(&self) -> Result<u64, ProviderError> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(transport)?;
        Ok(number.as_u64())
    }

    async fn get_block(&self, tag: BlockTag) -> Result<Option<RawBlock>, ProviderError> {
        let block = self
            .provider
            .get_block_with_txs(block_number(tag))
            .await
            .map_err(transport)?;
        Ok(block.and_then(raw_block))
    }

    async fn get_base_fee(&self, tag: BlockTag) -> Result<Option<f64>, ProviderError> {
        let history = self
            .provider
            .fee_history(1u64, block_number(tag), &[0.0])
            .await
            .map_err(transport)?;
        Ok(history
            .base_fee_per_gas
            .first()
            .copied()
            .filter(|fee| !fee.is_zero())
            .map(wei_to_gwei))
    }

    async fn get_tx_receipt(&self, hash: &str) -> Result<TxReceipt, ProviderError> {
        let tx_hash: H256 = hash
            .parse()
            .map_err(|_| ProviderError::Decode(format!("invalid tx hash {}", hash)))?;
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(transport)?
            .ok_or_else(|| ProviderError::Decode(format!("no receipt for {}", hash)))?;

        match (receipt.effective_gas_price, receipt.gas_used) {
            (Some(price), Some(gas)) => Ok(TxReceipt {
                effective_gas_price: u256_to_u128_saturating(price),
                gas_used: u256_to_u128_saturating(gas),
            }),
            _ => Err(ProviderError::Decode(format!(
                "receipt for {} lacks effectiveGasPrice or gasUsed",
                hash
            ))),
        }
    }
}

fn transport(err: ethers_providers::ProviderError) -> ProviderError {
    ProviderError::Transport(err.to_string())
}

fn block_number(tag: BlockTag) -> BlockNumber {
    match tag {
        BlockTag::Latest => BlockNumber::Latest,
        BlockTag::Number(n) => BlockNumber::Number(n.into()),
    }
}

// Pending blocks have no number and are not samplable.
fn raw_block(block: Block<Transaction>) -> Option<RawBlock> {
    let number = block.number?.as_u64();
    Some(RawBlock {
        number,
        timestamp: block.timestamp.low_u64(),
        gas_used: u256_to_u128_saturating(block.gas_used),
        transactions: block.transactions.into_iter().map(raw_tx).collect(),
        base_fee: block.base_fee_per_gas.filter(|f| !f.is_zero()).map(wei_to_gwei),
    })
}

fn raw_tx(tx: Transaction) -> RawTx {
    RawTx {
        hash: format!("0x{:x}", tx.hash),
        fee: tx.gas_price.map(|v| v.to_string()),
    }
}

fn wei_to_gwei(value: U256) -> f64 {
    u256_to_u128_saturating(value) as f64 / 1e9
}

fn u256_to_u128_saturating(value: U256) -> u128 {
    value.try_into().unwrap_or(u128::MAX)
}
