//! Chain data providers.
//!
//! Every upstream the sampler talks to sits behind [`ChainDataProvider`], so
//! the scheduler, backfill and selector never see a transport.

mod cosmos;
mod evm;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ChainFamily;
use crate::models::{BlockTag, RawBlock, TxReceipt};

pub use cosmos::CosmosProvider;
pub use evm::EvmProvider;

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),
}

#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    /// Endpoint identifier, recorded in the snapshot.
    fn id(&self) -> &str;

    async fn get_height(&self) -> Result<u64, ProviderError>;

    /// `Ok(None)` when the provider has no such block (yet).
    async fn get_block(&self, tag: BlockTag) -> Result<Option<RawBlock>, ProviderError>;

    /// Base fee per gas in gwei, `Ok(None)` on chains without one.
    async fn get_base_fee(&self, tag: BlockTag) -> Result<Option<f64>, ProviderError>;

    async fn get_tx_receipt(&self, hash: &str) -> Result<TxReceipt, ProviderError>;
}

/// Builds a provider for `endpoint`. No request is made here.
pub fn connect(
    family: ChainFamily,
    endpoint: &str,
    timeout: Duration,
) -> Result<Arc<dyn ChainDataProvider>, ProviderError> {
    Ok(match family {
        ChainFamily::Evm => Arc::new(EvmProvider::new(endpoint, timeout)?),
        ChainFamily::Cosmos => Arc::new(CosmosProvider::new(endpoint, timeout)?),
    })
}
