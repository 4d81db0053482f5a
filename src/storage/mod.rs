use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::config::Config;
use crate::models::Snapshot;

pub type DbPool = SqlitePool;

/// Whole-document persistence for the snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing has been written yet.
    async fn read(&self) -> Result<Option<Snapshot>>;

    async fn write(&self, snapshot: &Snapshot) -> Result<()>;

    fn describe(&self) -> String;
}

/// Picks the SQLite store when `DATABASE_URL` is set, the JSON file otherwise.
pub async fn open_store(config: &Config) -> Result<Arc<dyn SnapshotStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = init_pool(url).await?;
            Ok(Arc::new(SqliteStore::new(pool, &config.network)))
        }
        None => Ok(Arc::new(FileStore::new(config.snapshot_path()))),
    }
}

/// JSON document on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn read(&self) -> Result<Option<Snapshot>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed reading {:?}", self.path));
            }
        };
        let snapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("malformed snapshot in {:?}", self.path))?;
        Ok(Some(snapshot))
    }

    async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed creating snapshot directory {:?}", dir))?;
        }
        let body = serde_json::to_vec(snapshot).context("failed encoding snapshot")?;

        // readers never observe a half-written document
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("failed writing {:?}", tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed replacing {:?}", self.path))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// One snapshot document per network in a SQLite table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
    network: String,
}

impl SqliteStore {
    pub fn new(pool: DbPool, network: &str) -> Self {
        Self {
            pool,
            network: network.to_string(),
        }
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn read(&self) -> Result<Option<Snapshot>> {
        let document: Option<String> =
            sqlx::query_scalar("SELECT document FROM snapshots WHERE network = ?1;")
                .bind(&self.network)
                .fetch_optional(&self.pool)
                .await
                .context("failed reading snapshot row")?;

        document
            .map(|doc| serde_json::from_str(&doc).context("malformed snapshot document"))
            .transpose()
    }

    async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let document = serde_json::to_string(snapshot).context("failed encoding snapshot")?;
        sqlx::query(
            r#"
            INSERT INTO snapshots (network, document, last_block, last_time)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(network) DO UPDATE SET
                document = excluded.document,
                last_block = excluded.last_block,
                last_time = excluded.last_time;
            "#,
        )
        .bind(&self.network)
        .bind(document)
        .bind(snapshot.last_block as i64)
        .bind(snapshot.last_time as i64)
        .execute(&self.pool)
        .await
        .context("failed writing snapshot row")?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite snapshots[{}]", self.network)
    }
}

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    ensure_dir_exists(database_url)?;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to SQLite")?;

    apply_schema(&pool).await?;
    Ok(pool)
}

fn ensure_dir_exists(database_url: &str) -> Result<()> {
    if let Some(path) = database_url.strip_prefix("sqlite://") {
        if path != ":memory:" {
            if let Some(dir) = Path::new(path).parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed creating db directory {:?}", dir))?;
            }
        }
    }
    Ok(())
}

async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            network TEXT PRIMARY KEY,
            document TEXT NOT NULL,
            last_block INTEGER NOT NULL,
            last_time INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
