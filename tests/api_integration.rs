use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::Client;
use tokio::task::JoinHandle;

use rust_gas_sampler::api::{app_router, AppState};
use rust_gas_sampler::ingest_stats::INGEST_STATS;
use rust_gas_sampler::models::Sample;
use rust_gas_sampler::storage::{FileStore, SnapshotStore};
use rust_gas_sampler::window::SampleWindow;

#[tokio::test]
async fn health_endpoint_works() {
    let dir = tempfile::tempdir().unwrap();
    let (base_url, handle) = spawn_app(FileStore::new(dir.path().join("blockStats_ethereum.json"))).await;
    let client = Client::new();
    let res = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body.get("status").and_then(|s| s.as_str()), Some("ok"));
    handle.abort();
}

#[tokio::test]
async fn snapshot_is_not_found_before_first_write() {
    let dir = tempfile::tempdir().unwrap();
    let (base_url, handle) = spawn_app(FileStore::new(dir.path().join("blockStats_ethereum.json"))).await;
    let res = Client::new()
        .get(format!("{}/snapshot", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::NOT_FOUND);
    handle.abort();
}

#[tokio::test]
async fn snapshot_returns_the_persisted_document() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("blockStats_ethereum.json"));
    seed_snapshot(&store).await.unwrap();

    let (base_url, handle) = spawn_app(store).await;
    let res = Client::new()
        .get(format!("{}/snapshot", base_url))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let body: serde_json::Value = res.json().await.unwrap();

    let ntx = body.get("ntx").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    assert_eq!(ntx.len(), 2);
    assert_eq!(body.get("lastBlock").and_then(|v| v.as_u64()), Some(11));
    assert_eq!(body.get("lastTime").and_then(|v| v.as_u64()), Some(1_700_000_012));
    assert_eq!(body.get("rpc").and_then(|v| v.as_str()), Some("http://node"));
    let min_gwei = body.get("minGwei").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    assert_eq!(min_gwei[0], serde_json::json!([1.5, 2.0]));
    assert!(body.get("avgGas").is_some());
    assert!(body.get("timestamp").is_some());
    handle.abort();
}

#[tokio::test]
async fn ingest_stats_returns_counters() {
    let dir = tempfile::tempdir().unwrap();
    let (base_url, handle) = spawn_app(FileStore::new(dir.path().join("blockStats_ethereum.json"))).await;
    INGEST_STATS.inc_samples(1);
    INGEST_STATS.inc_cache_hits(2);
    let res = Client::new()
        .get(format!("{}/stats/ingest", base_url))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body.get("samples").and_then(|v| v.as_u64()).unwrap_or(0) >= 1);
    assert!(body.get("cache_hits").and_then(|v| v.as_u64()).unwrap_or(0) >= 2);
    assert!(body.get("failed_ticks").is_some());
    assert!(body.get("provider_switches").is_some());
    handle.abort();
}

async fn spawn_app(store: FileStore) -> (String, JoinHandle<()>) {
    let state = AppState {
        store: Arc::new(store),
    };
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);
    let server = axum::serve(listener, app);
    let handle = tokio::spawn(async move {
        let _ = server.await;
    });

    (base_url, handle)
}

async fn seed_snapshot(store: &FileStore) -> anyhow::Result<()> {
    let mut window = SampleWindow::new(2);
    window.insert(Sample {
        block_number: 10,
        transaction_count: 2,
        fee_list: vec![1.5, 2.0],
        average_gas: Some(42_000.0),
        base_fee: Some(1.2),
        timestamp: 1_700_000_000,
    });
    window.insert(Sample {
        block_number: 11,
        transaction_count: 1,
        fee_list: vec![3.0],
        average_gas: Some(21_000.0),
        base_fee: Some(1.3),
        timestamp: 1_700_000_012,
    });
    let snapshot = window
        .to_snapshot("http://node")
        .ok_or_else(|| anyhow::anyhow!("empty window"))?;
    store.write(&snapshot).await
}
