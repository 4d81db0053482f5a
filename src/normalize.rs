//! Conversion of provider blocks into chain-agnostic [`Sample`]s.

use futures_util::future::join_all;

use crate::models::{RawBlock, RawTx, Sample, TxReceipt};
use crate::provider::ChainDataProvider;

const WEI_PER_GWEI: f64 = 1e9;
const WEI_PER_ETHER: f64 = 1e18;

/// Unit the fee list is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeUnit {
    /// Price per gas, in gwei.
    Gwei,
    /// Total fee per transaction, in the chain's native unit.
    Native,
    /// The provider's amount, untouched (e.g. a Cosmos denom amount).
    Raw,
}

impl FeeUnit {
    fn divisor(self) -> f64 {
        match self {
            FeeUnit::Gwei => WEI_PER_GWEI,
            FeeUnit::Native => WEI_PER_ETHER,
            FeeUnit::Raw => 1.0,
        }
    }
}

/// Where each transaction's fee value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeMode {
    /// The nominal price carried by the transaction itself.
    Nominal,
    /// `effectiveGasPrice * gasUsed` from the transaction receipt. One
    /// receipt lookup per transaction; used by rollups that refund part of
    /// the quoted price.
    EffectivePrice,
}

#[derive(Debug, Clone, Copy)]
pub struct FeeNormalizer {
    pub unit: FeeUnit,
    pub mode: FeeMode,
}

impl FeeNormalizer {
    pub fn new(unit: FeeUnit, mode: FeeMode) -> Self {
        Self { unit, mode }
    }

    /// Builds the sample for `block`, doing whatever provider lookups the
    /// configured mode needs first. Each receipt is fetched at most once.
    pub async fn sample(&self, provider: &dyn ChainDataProvider, mut block: RawBlock) -> Sample {
        let repair_gas = block.gas_used == 0 && !block.transactions.is_empty();
        match self.mode {
            FeeMode::EffectivePrice => {
                let receipts = fetch_receipts(provider, &block.transactions, repair_gas).await;
                if repair_gas {
                    block.gas_used = total_gas(&receipts);
                }
                block.transactions = effective_fees(block.transactions, receipts);
            }
            FeeMode::Nominal if repair_gas => {
                let receipts = fetch_receipts(provider, &block.transactions, true).await;
                block.gas_used = total_gas(&receipts);
            }
            FeeMode::Nominal => {}
        }
        normalize(&block, self.unit)
    }
}

/// Projects a raw block onto a [`Sample`].
///
/// Transactions whose fee is missing, unparsable, zero or negative are
/// dropped; the rest are converted to `unit` and sorted ascending.
pub fn normalize(block: &RawBlock, unit: FeeUnit) -> Sample {
    let divisor = unit.divisor();
    let mut fee_list: Vec<f64> = block
        .transactions
        .iter()
        .filter_map(|tx| parse_fee(tx.fee.as_deref()))
        .map(|fee| fee / divisor)
        .collect();
    fee_list.sort_by(|a, b| a.total_cmp(b));

    let transaction_count = fee_list.len();
    let average_gas = if transaction_count > 0 {
        Some(block.gas_used as f64 / transaction_count as f64)
    } else {
        None
    };

    Sample {
        block_number: block.number,
        transaction_count,
        fee_list,
        average_gas,
        base_fee: block.base_fee,
        timestamp: block.timestamp,
    }
}

fn parse_fee(raw: Option<&str>) -> Option<f64> {
    let value: f64 = raw?.trim().parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Receipts for `txs` in order, `None` where the lookup failed or was
/// skipped. Zero-priced transactions never reach the fee list, so their
/// receipts are only fetched when `all` is set.
async fn fetch_receipts(
    provider: &dyn ChainDataProvider,
    txs: &[RawTx],
    all: bool,
) -> Vec<Option<TxReceipt>> {
    let lookups = txs.iter().map(|tx| async move {
        if !all && parse_fee(tx.fee.as_deref()).is_none() {
            return None;
        }
        match provider.get_tx_receipt(&tx.hash).await {
            Ok(receipt) => Some(receipt),
            Err(err) => {
                tracing::debug!(tx = %tx.hash, error = %err, "receipt lookup failed");
                None
            }
        }
    });
    join_all(lookups).await
}

fn effective_fees(txs: Vec<RawTx>, receipts: Vec<Option<TxReceipt>>) -> Vec<RawTx> {
    txs.into_iter()
        .zip(receipts)
        .map(|(tx, receipt)| {
            let fee = match receipt {
                Some(r) if parse_fee(tx.fee.as_deref()).is_some() => r
                    .effective_gas_price
                    .checked_mul(r.gas_used)
                    .map(|wei| wei.to_string()),
                _ => None,
            };
            RawTx { fee, ..tx }
        })
        .collect()
}

fn total_gas(receipts: &[Option<TxReceipt>]) -> u128 {
    receipts.iter().flatten().map(|r| r.gas_used).sum()
}
