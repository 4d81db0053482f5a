use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::normalize::{FeeMode, FeeUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFamily {
    /// Ethereum-style JSON-RPC.
    Evm,
    /// Cosmos SDK REST.
    Cosmos,
}

/// Static facts about a supported network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkProfile {
    pub family: ChainFamily,
    pub fee_unit: FeeUnit,
    pub fee_mode: FeeMode,
    pub poll_interval_ms: f64,
    pub min_interval_ms: f64,
    pub max_interval_ms: f64,
}

impl NetworkProfile {
    const fn evm(fee_unit: FeeUnit, fee_mode: FeeMode) -> Self {
        Self {
            family: ChainFamily::Evm,
            fee_unit,
            fee_mode,
            poll_interval_ms: 1000.0,
            min_interval_ms: 100.0,
            max_interval_ms: 15000.0,
        }
    }

    const fn cosmos() -> Self {
        Self {
            family: ChainFamily::Cosmos,
            fee_unit: FeeUnit::Raw,
            fee_mode: FeeMode::Nominal,
            poll_interval_ms: 5000.0,
            min_interval_ms: 1000.0,
            max_interval_ms: 15000.0,
        }
    }

    pub fn for_network(network: &str) -> Option<Self> {
        let profile = match network {
            "ethereum" | "bsc" | "polygon" | "fantom" | "avax" | "optimism" | "base"
            | "aurora" | "goerli" | "sepolia" => Self::evm(FeeUnit::Gwei, FeeMode::Nominal),
            "arbitrum" => Self::evm(FeeUnit::Native, FeeMode::EffectivePrice),
            "cosmoshub" | "osmosis" | "juno" => Self::cosmos(),
            _ => return None,
        };
        Some(profile)
    }
}

/// Where the provider endpoint list comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointSource {
    /// Fixed list given on the command line or in `RPC_URLS`.
    Static(Vec<String>),
    /// JSON document mapping network names to one URL or a list of URLs.
    File(PathBuf),
    /// Chain registry document listing REST endpoints under `apis.rest`.
    Registry(String),
}

/// Chain registry consulted for Cosmos networks without an explicit list.
pub const CHAIN_REGISTRY_URL: &str = "https://registry.ping.pub";

#[derive(Debug, Clone)]
pub struct Config {
    pub network: String,
    pub profile: NetworkProfile,
    pub endpoint_source: EndpointSource,
    pub sample_size: usize,
    pub poll_interval_ms: f64,
    pub min_interval_ms: f64,
    pub max_interval_ms: f64,
    pub legacy_gas: Option<bool>,
    pub stale_after: Duration,
    pub resync_every: u64,
    pub backfill_floor: u64,
    pub rpc_timeout: Duration,
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub http_bind_addr: String,
}

/// Values given on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub network: Option<String>,
    pub sample_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub rpc_urls: Vec<String>,
    pub legacy_gas: Option<bool>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unknown network `{0}`")]
    UnknownNetwork(String),
    #[error("no provider endpoints configured for `{0}`")]
    NoEndpoints(String),
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("min interval {min}ms exceeds max interval {max}ms")]
    IntervalBounds { min: f64, max: f64 },
    #[error("min interval must be above 0ms, got {0}ms")]
    NonPositiveInterval(f64),
    #[error("sample size must be at least 1")]
    ZeroSampleSize,
    #[error("cannot read provider file {path:?}: {reason}")]
    ProviderFile { path: PathBuf, reason: String },
    #[error("cannot read chain registry {url}: {reason}")]
    Registry { url: String, reason: String },
}

impl Config {
    pub fn from_env(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok(), overrides)
    }

    pub fn from_lookup<F>(lookup: F, overrides: ConfigOverrides) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network = overrides
            .network
            .or_else(|| lookup("NETWORK"))
            .unwrap_or_else(|| "ethereum".to_string())
            .trim()
            .to_lowercase();
        let profile = NetworkProfile::for_network(&network)
            .ok_or_else(|| ConfigError::UnknownNetwork(network.clone()))?;

        let endpoint_source = if !overrides.rpc_urls.is_empty() {
            EndpointSource::Static(overrides.rpc_urls)
        } else if let Some(raw) = lookup("RPC_URLS") {
            EndpointSource::Static(parse_endpoint_list(&raw))
        } else if let Some(path) = lookup("RPC_FILE") {
            EndpointSource::File(PathBuf::from(path))
        } else if profile.family == ChainFamily::Cosmos {
            EndpointSource::Registry(lookup("RPC_REGISTRY").unwrap_or_else(|| {
                format!("{}/{}/chain.json", CHAIN_REGISTRY_URL, network)
            }))
        } else {
            EndpointSource::File(PathBuf::from("rpcs.json"))
        };

        let sample_size = match overrides.sample_size {
            Some(size) => size,
            None => parse_or(&lookup, "SAMPLE_SIZE", 1000usize)?,
        };
        let poll_interval_ms = match overrides.poll_interval_ms {
            Some(ms) => ms as f64,
            None => parse_or(&lookup, "POLL_INTERVAL_MS", profile.poll_interval_ms as u64)? as f64,
        };
        let min_interval_ms =
            parse_or(&lookup, "MIN_INTERVAL_MS", profile.min_interval_ms as u64)? as f64;
        let max_interval_ms =
            parse_or(&lookup, "MAX_INTERVAL_MS", profile.max_interval_ms as u64)? as f64;
        let legacy_gas = match overrides.legacy_gas {
            Some(flag) => Some(flag),
            None => lookup("LEGACY_GAS")
                .map(|raw| parse_value("LEGACY_GAS", &raw))
                .transpose()?,
        };

        let config = Self {
            network,
            profile,
            endpoint_source,
            sample_size,
            poll_interval_ms,
            min_interval_ms,
            max_interval_ms,
            legacy_gas,
            stale_after: Duration::from_secs(parse_or(&lookup, "STALE_AFTER_SECS", 300u64)?),
            resync_every: parse_or(&lookup, "RESYNC_EVERY", 100u64)?.max(1),
            backfill_floor: parse_or(&lookup, "BACKFILL_FLOOR", 0u64)?,
            rpc_timeout: Duration::from_secs(parse_or(&lookup, "RPC_TIMEOUT_SECS", 10u64)?),
            data_dir: lookup("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            http_bind_addr: lookup("HTTP_BIND").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_size == 0 {
            return Err(ConfigError::ZeroSampleSize);
        }
        if self.min_interval_ms <= 0.0 {
            return Err(ConfigError::NonPositiveInterval(self.min_interval_ms));
        }
        if self.min_interval_ms > self.max_interval_ms {
            return Err(ConfigError::IntervalBounds {
                min: self.min_interval_ms,
                max: self.max_interval_ms,
            });
        }
        Ok(())
    }

    /// Base poll interval, clamped into the configured bounds.
    pub fn base_interval_ms(&self) -> f64 {
        self.poll_interval_ms
            .clamp(self.min_interval_ms, self.max_interval_ms)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(format!("blockStats_{}.json", self.network))
    }
}

/// Reads the endpoints listed for `network` in a provider file.
pub fn read_provider_file(path: &Path, network: &str) -> Result<Vec<String>, ConfigError> {
    let file_error = |reason: String| ConfigError::ProviderFile {
        path: path.to_path_buf(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
    let registry: HashMap<String, serde_json::Value> =
        serde_json::from_str(&raw).map_err(|e| file_error(e.to_string()))?;

    let endpoints = match registry.get(network) {
        Some(serde_json::Value::String(url)) => vec![url.clone()],
        Some(serde_json::Value::Array(urls)) => urls
            .iter()
            .filter_map(|u| u.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    if endpoints.is_empty() {
        return Err(ConfigError::NoEndpoints(network.to_string()));
    }
    Ok(endpoints)
}

fn parse_endpoint_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}
