//! Choosing which upstream to sample from.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{read_provider_file, ChainFamily, Config, ConfigError, EndpointSource};
use crate::models::{BlockTag, Snapshot};
use crate::provider::{self, ChainDataProvider};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no provider candidates configured")]
    NoCandidates,
    #[error("none of the {0} provider candidates responded")]
    NoProvider(usize),
}

/// A provider together with the chain height it reported when chosen.
#[derive(Clone)]
pub struct Selection {
    pub provider: Arc<dyn ChainDataProvider>,
    pub height: u64,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("provider", &self.provider.id())
            .field("height", &self.height)
            .finish()
    }
}

/// Supplies provider candidates. The list only changes on `refresh`.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn refresh(&mut self) -> Result<(), ConfigError>;

    fn candidates(&self) -> Vec<Arc<dyn ChainDataProvider>>;
}

/// Endpoint list taken from the configuration.
#[derive(Debug, Clone)]
pub struct EndpointDirectory {
    network: String,
    family: ChainFamily,
    timeout: Duration,
    source: EndpointSource,
    client: reqwest::Client,
    endpoints: Vec<String>,
}

#[derive(Deserialize)]
struct ChainRegistry {
    apis: RegistryApis,
}

#[derive(Deserialize)]
struct RegistryApis {
    #[serde(default)]
    rest: Vec<RegistryEndpoint>,
}

#[derive(Deserialize)]
struct RegistryEndpoint {
    address: String,
}

impl EndpointDirectory {
    pub async fn load(config: &Config) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(config.rpc_timeout)
            .build()
            .map_err(|e| ConfigError::Registry {
                url: String::new(),
                reason: e.to_string(),
            })?;
        let mut directory = Self {
            network: config.network.clone(),
            family: config.profile.family,
            timeout: config.rpc_timeout,
            source: config.endpoint_source.clone(),
            client,
            endpoints: Vec::new(),
        };
        directory.refresh().await?;
        Ok(directory)
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn fetch_registry(&self, url: &str) -> Result<Vec<String>, ConfigError> {
        let registry_error = |reason: String| ConfigError::Registry {
            url: url.to_string(),
            reason,
        };
        let registry: ChainRegistry = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| registry_error(e.to_string()))?
            .json()
            .await
            .map_err(|e| registry_error(e.to_string()))?;
        Ok(registry
            .apis
            .rest
            .into_iter()
            .map(|api| api.address.trim_end_matches('/').to_string())
            .collect())
    }
}

#[async_trait]
impl CandidateSource for EndpointDirectory {
    /// Re-reads the provider file or the chain registry; a static list never
    /// changes.
    async fn refresh(&mut self) -> Result<(), ConfigError> {
        let endpoints = match &self.source {
            EndpointSource::Static(urls) => urls.clone(),
            EndpointSource::File(path) => read_provider_file(path, &self.network)?,
            EndpointSource::Registry(url) => self.fetch_registry(url).await?,
        };
        if endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints(self.network.clone()));
        }
        self.endpoints = endpoints;
        Ok(())
    }

    fn candidates(&self) -> Vec<Arc<dyn ChainDataProvider>> {
        self.endpoints
            .iter()
            .filter_map(|url| match provider::connect(self.family, url, self.timeout) {
                Ok(p) => Some(p),
                Err(err) => {
                    warn!(endpoint = %url, error = %err, "skipping provider");
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderSelector {
    stale_after: Duration,
}

impl Default for ProviderSelector {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl ProviderSelector {
    pub fn new(stale_after: Duration) -> Self {
        Self { stale_after }
    }

    /// Returns whichever candidate first serves the latest block.
    ///
    /// Favors a quick start over the freshest provider; a stale pick is
    /// corrected later through [`is_stale`](Self::is_stale).
    pub async fn select_initial(
        &self,
        candidates: &[Arc<dyn ChainDataProvider>],
    ) -> Result<Arc<dyn ChainDataProvider>, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }

        let mut pending: FuturesUnordered<_> = candidates
            .iter()
            .map(|candidate| async move {
                let latest = candidate.get_block(BlockTag::Latest).await;
                (candidate, latest)
            })
            .collect();

        while let Some((candidate, latest)) = pending.next().await {
            match latest {
                Ok(Some(_)) => return Ok(Arc::clone(candidate)),
                Ok(None) => debug!(provider = candidate.id(), "liveness check returned no block"),
                Err(err) => {
                    debug!(provider = candidate.id(), error = %err, "liveness check failed")
                }
            }
        }
        Err(SelectionError::NoProvider(candidates.len()))
    }

    /// Queries every candidate's height at once and keeps the highest.
    /// Ties go to the earlier candidate.
    pub async fn select_best(
        &self,
        candidates: &[Arc<dyn ChainDataProvider>],
    ) -> Result<Selection, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }

        let heights = join_all(candidates.iter().map(|c| c.get_height())).await;

        let mut best: Option<Selection> = None;
        for (candidate, height) in candidates.iter().zip(heights) {
            match height {
                Ok(height) => {
                    debug!(provider = candidate.id(), height, "provider height");
                    if best.as_ref().map_or(true, |b| height > b.height) {
                        best = Some(Selection {
                            provider: Arc::clone(candidate),
                            height,
                        });
                    }
                }
                Err(err) => debug!(provider = candidate.id(), error = %err, "height query failed"),
            }
        }
        best.ok_or(SelectionError::NoProvider(candidates.len()))
    }

    /// True when the snapshot's newest block is further than the staleness
    /// threshold from `now` (unix seconds), in either direction.
    pub fn is_stale(&self, snapshot: &Snapshot, now: u64) -> bool {
        self.is_lagging(snapshot.last_time, now)
    }

    /// Same check against a bare block timestamp.
    pub fn is_lagging(&self, last_time: u64, now: u64) -> bool {
        now.abs_diff(last_time) > self.stale_after.as_secs()
    }
}
