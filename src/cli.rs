use clap::{Args, Parser, Subcommand};

use crate::config::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(name = "rust-gas-sampler", version, about = "Rolling per-block gas fee sampler")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Network to sample, e.g. ethereum, polygon, arbitrum, osmosis
    #[arg(short = 'n', long, global = true)]
    pub network: Option<String>,

    /// Number of blocks kept in the window
    #[arg(short = 's', long, global = true)]
    pub sample_size: Option<usize>,

    /// Base polling interval in milliseconds
    #[arg(short = 't', long = "time-interval", global = true)]
    pub time_interval: Option<u64>,

    /// Provider endpoint, repeatable; replaces RPC_URLS and the provider file
    #[arg(long = "rpc", global = true)]
    pub rpc: Vec<String>,

    /// Force legacy fee mode (no base fee requests)
    #[arg(long, global = true)]
    pub legacy_gas: bool,
}

impl GlobalArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            network: self.network.clone(),
            sample_size: self.sample_size,
            poll_interval_ms: self.time_interval,
            rpc_urls: self.rpc.clone(),
            legacy_gas: self.legacy_gas.then_some(true),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sample blocks continuously and persist the snapshot
    Run {
        /// Also serve the HTTP API while sampling
        #[arg(long)]
        serve: bool,
    },
    /// Run the HTTP API server over the persisted snapshot
    Serve {
        /// Override bind address, e.g. 0.0.0.0:8080
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print the height reported by every configured provider
    Providers,
    /// Summarize the persisted snapshot
    Snapshot,
}
