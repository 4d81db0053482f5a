use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct IngestStats {
    samples: AtomicU64,
    cache_hits: AtomicU64,
    backfill_fetches: AtomicU64,
    failed_ticks: AtomicU64,
    snapshot_writes: AtomicU64,
    snapshot_write_errors: AtomicU64,
    provider_switches: AtomicU64,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestStats {
    pub const fn new() -> Self {
        Self {
            samples: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            backfill_fetches: AtomicU64::new(0),
            failed_ticks: AtomicU64::new(0),
            snapshot_writes: AtomicU64::new(0),
            snapshot_write_errors: AtomicU64::new(0),
            provider_switches: AtomicU64::new(0),
        }
    }

    pub fn inc_samples(&self, n: u64) {
        self.samples.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self, n: u64) {
        self.cache_hits.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_backfill_fetches(&self, n: u64) {
        self.backfill_fetches.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_failed_ticks(&self, n: u64) {
        self.failed_ticks.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_snapshot_writes(&self, n: u64) {
        self.snapshot_writes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_snapshot_write_errors(&self, n: u64) {
        self.snapshot_write_errors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_provider_switches(&self, n: u64) {
        self.provider_switches.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            backfill_fetches: self.backfill_fetches.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            snapshot_writes: self.snapshot_writes.load(Ordering::Relaxed),
            snapshot_write_errors: self.snapshot_write_errors.load(Ordering::Relaxed),
            provider_switches: self.provider_switches.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestSnapshot {
    pub samples: u64,
    pub cache_hits: u64,
    pub backfill_fetches: u64,
    pub failed_ticks: u64,
    pub snapshot_writes: u64,
    pub snapshot_write_errors: u64,
    pub provider_switches: u64,
}

pub static INGEST_STATS: IngestStats = IngestStats::new();
