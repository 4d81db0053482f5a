pub mod api;
pub mod backfill;
pub mod cli;
pub mod config;
pub mod ingest_stats;
pub mod models;
pub mod normalize;
pub mod provider;
pub mod scheduler;
pub mod selector;
pub mod storage;
pub mod window;
