use anyhow::Context;
use clap::Parser;
use futures_util::future::join_all;

use rust_gas_sampler::api::{self, AppState};
use rust_gas_sampler::cli::{Cli, Commands};
use rust_gas_sampler::config::Config;
use rust_gas_sampler::scheduler::{shutdown_on, Scheduler, SchedulerSettings};
use rust_gas_sampler::selector::{CandidateSource, EndpointDirectory};
use rust_gas_sampler::storage::{self, SnapshotStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config =
        Config::from_env(cli.global.overrides()).context("failed to load configuration")?;

    match cli.command {
        Commands::Run { serve } => {
            let store = storage::open_store(&config).await?;
            let directory = EndpointDirectory::load(&config)
                .await
                .context("failed to load provider list")?;
            tracing::info!(
                network = %config.network,
                providers = directory.endpoints().len(),
                store = %store.describe(),
                "starting sampler"
            );

            if serve {
                let state = AppState {
                    store: store.clone(),
                };
                let bind = config.http_bind_addr.clone();
                tokio::spawn(async move {
                    if let Err(err) = api::run_http_server(&bind, state).await {
                        tracing::error!(error = %err, "HTTP server stopped");
                    }
                });
            }

            let settings = SchedulerSettings::from_config(&config);
            let scheduler = Scheduler::connect(settings, Box::new(directory), store).await?;
            scheduler
                .run(shutdown_on(tokio::signal::ctrl_c()))
                .await;
        }
        Commands::Serve { addr } => {
            let bind = addr.unwrap_or_else(|| config.http_bind_addr.clone());
            let store = storage::open_store(&config).await?;
            api::run_http_server(&bind, AppState { store }).await?;
        }
        Commands::Providers => {
            let directory = EndpointDirectory::load(&config)
                .await
                .context("failed to load provider list")?;
            let candidates = directory.candidates();
            let heights = join_all(candidates.iter().map(|c| c.get_height())).await;
            for (candidate, height) in candidates.iter().zip(heights) {
                match height {
                    Ok(height) => println!("{:>12}  {}", height, candidate.id()),
                    Err(err) => println!("{:>12}  {} ({})", "-", candidate.id(), err),
                }
            }
        }
        Commands::Snapshot => {
            let store = storage::open_store(&config).await?;
            match store.read().await? {
                Some(snapshot) => {
                    let fees: usize = snapshot.fee_list.iter().map(Vec::len).sum();
                    println!("store:       {}", store.describe());
                    println!("provider:    {}", snapshot.provider_id);
                    println!("blocks:      {}", snapshot.len());
                    println!("fees:        {}", fees);
                    println!("last block:  {}", snapshot.last_block);
                    println!("last time:   {}", snapshot.last_time);
                    if !snapshot.is_consistent() {
                        println!("warning: snapshot arrays have mismatched lengths");
                    }
                }
                None => println!("no snapshot in {}", store.describe()),
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}
