use serde::{Deserialize, Serialize};

/// Block identifier accepted by a chain data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockTag::Latest => write!(f, "latest"),
            BlockTag::Number(n) => write!(f, "{}", n),
        }
    }
}

/// One transaction as handed over by a provider, before any fee decoding.
///
/// `fee` is the decimal string of the transaction's fee price in the chain's
/// smallest unit. It is kept undecoded so that a malformed value only costs
/// the transaction, never the block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTx {
    pub hash: String,
    pub fee: Option<String>,
}

/// A block as reported by a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBlock {
    pub number: u64,
    pub timestamp: u64,
    pub gas_used: u128,
    pub transactions: Vec<RawTx>,
    pub base_fee: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub effective_gas_price: u128,
    pub gas_used: u128,
}

/// Normalized fee observation for a single block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub block_number: u64,
    pub transaction_count: usize,
    pub fee_list: Vec<f64>,
    pub average_gas: Option<f64>,
    pub base_fee: Option<f64>,
    pub timestamp: u64,
}

impl Sample {
    pub fn has_fees(&self) -> bool {
        self.transaction_count > 0
    }
}

/// Column-oriented projection of the sample window, as persisted on disk.
///
/// Every array column has one entry per retained block and all of them are
/// ordered by ascending block timestamp. `block` and `base_fee` are optional
/// on read: documents written by older samplers carry neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ntx: Vec<usize>,
    pub timestamp: Vec<u64>,
    #[serde(rename = "minGwei")]
    pub fee_list: Vec<Vec<f64>>,
    #[serde(rename = "avgGas")]
    pub average_gas: Vec<f64>,
    #[serde(
        rename = "baseFee",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub base_fee: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block: Vec<u64>,
    #[serde(rename = "lastBlock")]
    pub last_block: u64,
    #[serde(rename = "lastTime")]
    pub last_time: u64,
    #[serde(rename = "rpc", default)]
    pub provider_id: String,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.ntx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ntx.is_empty()
    }

    /// True when every column agrees on the number of retained blocks.
    pub fn is_consistent(&self) -> bool {
        let len = self.ntx.len();
        self.timestamp.len() == len
            && self.fee_list.len() == len
            && self.average_gas.len() == len
            && (self.base_fee.is_empty() || self.base_fee.len() == len)
            && (self.block.is_empty() || self.block.len() == len)
    }

    /// Rebuilds the sample stored for `number`, if this snapshot holds it.
    ///
    /// With a `block` column the lookup is exact. Without one, the block is
    /// located by its distance from `last_block`, which only holds when the
    /// retained blocks are contiguous; any column disagreement or an index
    /// outside the arrays is reported as a miss.
    pub fn cached_sample(&self, number: u64) -> Option<Sample> {
        if self.is_empty() || !self.is_consistent() {
            return None;
        }

        let index = if !self.block.is_empty() {
            self.block.iter().position(|b| *b == number)?
        } else {
            let len = self.len() as u64;
            if number > self.last_block || number + len <= self.last_block {
                return None;
            }
            (len - (self.last_block - number) - 1) as usize
        };

        let fee_list = self.fee_list.get(index)?.clone();
        let transaction_count = *self.ntx.get(index)?;
        if transaction_count == 0 || fee_list.len() != transaction_count {
            return None;
        }

        Some(Sample {
            block_number: number,
            transaction_count,
            fee_list,
            average_gas: self.average_gas.get(index).copied(),
            base_fee: self.base_fee.get(index).copied().flatten(),
            timestamp: *self.timestamp.get(index)?,
        })
    }
}
