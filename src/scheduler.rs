//! The polling loop.
//!
//! [`Scheduler`] owns the sample window, the backfill cursor and the
//! scheduler state outright. Ticks run strictly one after another: a tick
//! finishes all of its requests before the delay to the next one starts,
//! so nothing here is shared or locked.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::backfill::BackfillController;
use crate::config::Config;
use crate::ingest_stats::INGEST_STATS;
use crate::models::{BlockTag, RawBlock, Sample};
use crate::normalize::FeeNormalizer;
use crate::provider::{ChainDataProvider, ProviderError};
use crate::selector::{CandidateSource, ProviderSelector};
use crate::storage::SnapshotStore;
use crate::window::SampleWindow;

pub const SPEED_FACTOR: f64 = 1.1;
pub const INIT_DELAY_MS: f64 = 10.0;

/// What a tick achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    /// First tick after (re)connecting.
    Init,
    /// A new block was sampled.
    Success,
    /// Nothing new.
    Fail,
    /// Only history was filled in.
    Backfilling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalPolicy {
    pub min_ms: f64,
    pub max_ms: f64,
    pub speed_factor: f64,
}

impl IntervalPolicy {
    pub fn new(min_ms: f64, max_ms: f64) -> Self {
        Self {
            min_ms,
            max_ms,
            speed_factor: SPEED_FACTOR,
        }
    }

    /// Delay before the next tick. Successes speed polling up towards
    /// `min_ms`, anything else slows it down towards `max_ms`.
    pub fn next_interval(&self, current_ms: f64, state: TickState) -> f64 {
        match state {
            TickState::Init => INIT_DELAY_MS,
            TickState::Success => (current_ms / self.speed_factor).max(self.min_ms),
            TickState::Fail | TickState::Backfilling => {
                (current_ms * self.speed_factor).min(self.max_ms)
            }
        }
    }
}

/// Mutable scheduling state, carried from one tick to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerState {
    /// Current poll interval; stays within the policy bounds.
    pub current_interval_ms: f64,
    /// Block expected next, one past the last block sampled.
    pub next_block: u64,
    /// Set once at connect: the chain exposes no base fee.
    pub legacy_fee_mode: bool,
    /// Ticks since the last (re)connect.
    pub ticks: u64,
}

impl SchedulerState {
    pub fn new(current_interval_ms: f64, next_block: u64, legacy_fee_mode: bool) -> Self {
        Self {
            current_interval_ms,
            next_block,
            legacy_fee_mode,
            ticks: 0,
        }
    }

    /// Applies the outcome of a tick and returns the delay until the next.
    /// The fixed start-up delay leaves the running interval untouched.
    pub fn advance(&mut self, policy: &IntervalPolicy, state: TickState) -> Duration {
        let next = policy.next_interval(self.current_interval_ms, state);
        if state != TickState::Init {
            self.current_interval_ms = next;
        }
        Duration::from_secs_f64(next / 1000.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub sample_size: usize,
    pub base_interval_ms: f64,
    pub policy: IntervalPolicy,
    /// Ask for `latest` instead of the next number every this many ticks.
    pub resync_every: u64,
    pub selector: ProviderSelector,
    pub normalizer: FeeNormalizer,
    pub legacy_gas: Option<bool>,
    /// Backfill never walks below this block.
    pub backfill_floor: u64,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sample_size: config.sample_size,
            base_interval_ms: config.base_interval_ms(),
            policy: IntervalPolicy::new(config.min_interval_ms, config.max_interval_ms),
            resync_every: config.resync_every.max(1),
            selector: ProviderSelector::new(config.stale_after),
            normalizer: FeeNormalizer::new(config.profile.fee_unit, config.profile.fee_mode),
            legacy_gas: config.legacy_gas,
            backfill_floor: config.backfill_floor,
        }
    }
}

pub struct Scheduler {
    provider: Arc<dyn ChainDataProvider>,
    candidates: Box<dyn CandidateSource>,
    store: Arc<dyn SnapshotStore>,
    window: SampleWindow,
    backfill: BackfillController,
    settings: SchedulerSettings,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(
        provider: Arc<dyn ChainDataProvider>,
        candidates: Box<dyn CandidateSource>,
        store: Arc<dyn SnapshotStore>,
        backfill: BackfillController,
        settings: SchedulerSettings,
        state: SchedulerState,
    ) -> Self {
        Self {
            provider,
            candidates,
            store,
            window: SampleWindow::new(settings.sample_size),
            backfill,
            settings,
            state,
        }
    }

    /// Picks a provider, reads the chain head and the previous snapshot.
    ///
    /// Fails when no candidate answers: there is nothing to sample from.
    pub async fn connect(
        settings: SchedulerSettings,
        candidates: Box<dyn CandidateSource>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        let provider = settings
            .selector
            .select_initial(&candidates.candidates())
            .await
            .context("no provider available")?;
        let height = provider
            .get_height()
            .await
            .with_context(|| format!("failed to read chain height from {}", provider.id()))?;

        let legacy_fee_mode = match settings.legacy_gas {
            Some(flag) => flag,
            None => detect_legacy_fee_mode(provider.as_ref()).await,
        };
        if legacy_fee_mode {
            info!("using legacy gas");
        }

        let cache = match store.read().await {
            Ok(cache) => cache,
            Err(err) => {
                warn!(store = %store.describe(), error = %err, "ignoring unreadable snapshot");
                None
            }
        };
        if let Some(cache) = &cache {
            info!(last_block = cache.last_block, blocks = cache.len(), "loaded previous snapshot");
        }

        info!(
            provider = provider.id(),
            height,
            sample_size = settings.sample_size,
            "connected, fetching blocks before serving data"
        );

        let state = SchedulerState::new(settings.base_interval_ms, height, legacy_fee_mode);
        Ok(Self::new(
            provider,
            candidates,
            store,
            BackfillController::new(cache).with_floor(settings.backfill_floor),
            settings,
            state,
        ))
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Ticks until `shutdown` resolves. Shutdown is honored between ticks,
    /// never in the middle of one.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let outcome = self.tick(unix_now()).await;
            let delay = self.state.advance(&self.settings.policy, outcome);
            debug!(?outcome, delay_ms = delay.as_millis() as u64, "tick done");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => {
                    info!("shutdown requested, sampler stopped");
                    break;
                }
            }
        }
    }

    /// Runs one polling round; `now` is the wall clock in unix seconds.
    pub async fn tick(&mut self, now: u64) -> TickState {
        let first = self.state.ticks == 0;
        let tag = if self.state.ticks % self.settings.resync_every == 0 {
            BlockTag::Latest
        } else {
            BlockTag::Number(self.state.next_block)
        };
        self.state.ticks += 1;

        let mut outcome = TickState::Fail;

        let (block, base_fee) = self.fetch(tag).await;
        match block {
            Ok(Some(raw))
                if raw.number >= self.state.next_block && !raw.transactions.is_empty() =>
            {
                let raw = self.with_base_fee(raw, base_fee);
                let sample = self
                    .settings
                    .normalizer
                    .sample(self.provider.as_ref(), raw)
                    .await;
                self.state.next_block = sample.block_number + 1;
                self.record(sample).await;
                outcome = TickState::Success;
            }
            Ok(Some(raw)) if raw.number >= self.state.next_block => {
                debug!(block = raw.number, "block has no transactions yet")
            }
            Ok(Some(raw)) => debug!(
                block = raw.number,
                expected = self.state.next_block,
                "block already sampled"
            ),
            Ok(None) => debug!(%tag, "block not available yet"),
            Err(err) => debug!(%tag, error = %err, "block fetch failed"),
        }

        if !self.window.is_full() {
            let progress = self
                .backfill
                .backfill(
                    &mut self.window,
                    self.settings.sample_size,
                    self.provider.as_ref(),
                    &self.settings.normalizer,
                )
                .await;
            if progress.made_progress() {
                info!(
                    cached = progress.cached.len(),
                    fetched = ?progress.fetched,
                    filled = self.window.size(),
                    target = self.settings.sample_size,
                    "backfilled"
                );
                if outcome != TickState::Success {
                    outcome = TickState::Backfilling;
                }
            }
        }

        if outcome == TickState::Fail {
            INGEST_STATS.inc_failed_ticks(1);
            info!(
                "failed to fetch new blocks, retrying in about {:.1}ms",
                self.state.current_interval_ms
            );
            self.check_staleness(now).await;
        }

        if first {
            TickState::Init
        } else {
            outcome
        }
    }

    async fn fetch(
        &self,
        tag: BlockTag,
    ) -> (
        Result<Option<RawBlock>, ProviderError>,
        Result<Option<f64>, ProviderError>,
    ) {
        if self.state.legacy_fee_mode {
            (self.provider.get_block(tag).await, Ok(None))
        } else {
            tokio::join!(self.provider.get_block(tag), self.provider.get_base_fee(tag))
        }
    }

    fn with_base_fee(
        &self,
        mut raw: RawBlock,
        base_fee: Result<Option<f64>, ProviderError>,
    ) -> RawBlock {
        if self.state.legacy_fee_mode {
            raw.base_fee = None;
            return raw;
        }
        match base_fee {
            Ok(Some(fee)) => raw.base_fee = Some(fee),
            Ok(None) => {}
            Err(err) => debug!(block = raw.number, error = %err, "base fee unavailable"),
        }
        raw
    }

    async fn record(&mut self, sample: Sample) {
        let block = sample.block_number;
        let transactions = sample.transaction_count;
        let insertion = self.window.insert(sample);
        INGEST_STATS.inc_samples(1);
        debug!(block, source = ?insertion.source, evicted = ?insertion.evicted, "sample inserted");

        if insertion.evicted.is_some() {
            self.persist().await;
            info!(
                block,
                transactions,
                next_update_ms = self.state.current_interval_ms.round() as u64,
                "new block read"
            );
        } else {
            info!(
                block,
                transactions,
                filled = self.window.size(),
                target = self.settings.sample_size,
                "new block read while filling window"
            );
        }
    }

    async fn persist(&mut self) {
        let Some(snapshot) = self.window.to_snapshot(self.provider.id()) else {
            return;
        };
        match self.store.write(&snapshot).await {
            Ok(()) => {
                INGEST_STATS.inc_snapshot_writes(1);
                self.backfill.refresh_cache(snapshot);
            }
            Err(err) => {
                INGEST_STATS.inc_snapshot_write_errors(1);
                error!(
                    store = %self.store.describe(),
                    error = %err,
                    "failed to persist snapshot, keeping samples in memory"
                );
            }
        }
    }

    async fn check_staleness(&mut self, now: u64) {
        let Some(last_time) = self.window.newest_sample().map(|s| s.timestamp) else {
            return;
        };
        if self.settings.selector.is_lagging(last_time, now) {
            warn!(
                provider = self.provider.id(),
                last_time,
                "provider looks stale, selecting another"
            );
            self.reselect().await;
        }
    }

    async fn reselect(&mut self) {
        if let Err(err) = self.candidates.refresh().await {
            warn!(error = %err, "could not refresh provider list, using the previous one");
        }
        let candidates = self.candidates.candidates();
        match self.settings.selector.select_best(&candidates).await {
            Ok(selection) => {
                info!(
                    from = self.provider.id(),
                    to = selection.provider.id(),
                    height = selection.height,
                    "switching provider"
                );
                INGEST_STATS.inc_provider_switches(1);
                self.provider = selection.provider;
                self.state.next_block = selection.height;
                self.state.current_interval_ms = self.settings.base_interval_ms;
                self.state.ticks = 0;
            }
            Err(err) => warn!(error = %err, "re-selection failed, keeping current provider"),
        }
    }
}

/// Resolves once `signal` fires. A signal that could not be registered never
/// resolves, so the loop keeps running until the process is killed.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        error!(error = %err, "cannot listen for shutdown signal, running until killed");
        std::future::pending::<()>().await;
    }
}

/// A chain is sampled in legacy mode when it reports no usable base fee.
pub async fn detect_legacy_fee_mode(provider: &dyn ChainDataProvider) -> bool {
    match provider.get_base_fee(BlockTag::Latest).await {
        Ok(Some(fee)) => fee <= 0.0,
        Ok(None) => true,
        Err(err) => {
            debug!(error = %err, "base fee lookup failed");
            true
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
