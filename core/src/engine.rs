//! Engine facade: wires the store, cache, ledger, and reconciler
//! together and owns the batch ingestion and query entry points.
//!
//! The store sits behind a mutex shared by request handlers and the
//! background timers; holding it across each record's ingest is the
//! serialization point that keeps the pending-trip close and the
//! monthly increment race-free.

use crate::cache::ReferenceCache;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::jobs::{self, JobHandle};
use crate::ledger::{IngestOutcome, TripLedger};
use crate::penalty::PenaltyReconciler;
use crate::record::BatchRecord;
use crate::store::{FareStore, TripRow};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct FareEngine {
    store: Arc<Mutex<FareStore>>,
    cache: Arc<ReferenceCache>,
    ledger: TripLedger,
    reconciler: Arc<PenaltyReconciler>,
    config: EngineConfig,
}

/// Outcome of one batch upload: how many records were processed out of
/// the total submitted. Never all-or-nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub accepted: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct TripPage {
    pub trips: Vec<TripRow>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl FareEngine {
    /// Open (or create) the database at `path` and build a fully wired
    /// engine. The reference cache is warmed before returning.
    pub fn open(path: &str, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let store = FareStore::open(path)?;
        store.migrate()?;
        Self::build(store, config)
    }

    /// In-memory engine (used in tests).
    pub fn in_memory(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let store = FareStore::in_memory()?;
        store.migrate()?;
        Self::build(store, config)
    }

    fn build(store: FareStore, config: EngineConfig) -> EngineResult<Self> {
        let cache = Arc::new(ReferenceCache::new(config.cache_ttl()));
        cache.refresh_all(&store)?;
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            cache,
            ledger: TripLedger::new(&config),
            reconciler: Arc::new(PenaltyReconciler::new(&config)),
            config,
        })
    }

    /// Process one ordered gateway batch. Individual record failures
    /// are isolated: rejected or failed records are logged and skipped,
    /// and the rest of the batch continues.
    pub fn ingest_batch(&self, records: &[BatchRecord]) -> BatchSummary {
        let total = records.len();
        let mut accepted = 0usize;

        for (index, record) in records.iter().enumerate() {
            // Lock per record so sweeps and other batches interleave.
            let outcome = {
                let store = self.lock_store();
                self.ledger.ingest(&store, &self.cache, record)
            };
            match outcome {
                Ok(IngestOutcome::Created)
                | Ok(IngestOutcome::Completed)
                | Ok(IngestOutcome::Duplicate) => accepted += 1,
                Ok(IngestOutcome::Rejected(reason)) => {
                    log::info!(
                        "batch record {index} (card {}) rejected: {reason}",
                        record.card_id
                    );
                }
                Err(e) => {
                    log::warn!(
                        "batch record {index} (card {}) failed: {e}",
                        record.card_id
                    );
                }
            }
        }

        log::info!("batch processed: {accepted}/{total} records");
        BatchSummary { accepted, total }
    }

    /// Ingest a single record and report its outcome. Test and tooling
    /// convenience over the batch path.
    pub fn ingest_one(&self, record: &BatchRecord) -> EngineResult<IngestOutcome> {
        let store = self.lock_store();
        self.ledger.ingest(&store, &self.cache, record)
    }

    /// Paginated priced-trip query, newest boardings first.
    pub fn trips(
        &self,
        card_id: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> EngineResult<TripPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, self.config.max_page_size);
        let store = self.lock_store();
        let trips = store.trips_page(card_id, per_page, (page - 1) * per_page)?;
        let total = store.trip_count(card_id)?;
        Ok(TripPage {
            trips,
            total,
            page,
            per_page,
        })
    }

    /// Run one penalty sweep at `now`. Returns the number of trips
    /// closed at the penalty fare.
    pub fn sweep_penalties(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let store = self.lock_store();
        self.reconciler.sweep(&store, &self.cache, now)
    }

    /// Force a reference-cache rebuild outside the refresh timer.
    pub fn refresh_cache(&self) -> EngineResult<()> {
        let store = self.lock_store();
        self.cache.refresh_all(&store)
    }

    /// Start the cache-refresh and penalty-sweep timers. Dropping (or
    /// stopping) the returned handles shuts the jobs down.
    pub fn start_background_jobs(&self) -> Vec<JobHandle> {
        let cache = Arc::clone(&self.cache);
        let store = Arc::clone(&self.store);
        let refresh = jobs::spawn_periodic(
            "cache-refresh",
            self.config.cache_refresh_interval(),
            move || {
                let guard = lock(&store);
                if let Err(e) = cache.refresh_all(&guard) {
                    log::warn!("cache refresh failed: {e}");
                }
            },
        );

        let cache = Arc::clone(&self.cache);
        let store = Arc::clone(&self.store);
        let reconciler = Arc::clone(&self.reconciler);
        let sweep = jobs::spawn_periodic(
            "penalty-sweep",
            self.config.penalty_sweep_interval(),
            move || {
                let guard = lock(&store);
                if let Err(e) = reconciler.sweep(&guard, &cache, Utc::now()) {
                    log::warn!("penalty sweep failed: {e}");
                }
            },
        );

        vec![refresh, sweep]
    }

    /// Direct store access for seeding and assertions.
    pub fn with_store<T>(&self, f: impl FnOnce(&FareStore) -> T) -> T {
        let store = self.lock_store();
        f(&store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock_store(&self) -> MutexGuard<'_, FareStore> {
        lock(&self.store)
    }
}

fn lock(store: &Mutex<FareStore>) -> MutexGuard<'_, FareStore> {
    // A poisoned lock means a panic mid-write; the store itself is
    // still consistent (every mutation is a single SQL statement).
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
