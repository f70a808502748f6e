//! Penalty-fare reconciliation sweep.
//!
//! Pending trips whose boarding is older than the timeout are closed
//! at the undiscounted penalty fare, with no alighting ever recorded.
//! Each sweep is independent and idempotent; a trip a late tap-out
//! already closed loses the status compare-and-swap and is skipped.

use crate::cache::ReferenceCache;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::pricer::FarePricer;
use crate::store::{FareStore, TripClose};
use crate::types::TapMode;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct PenaltyReconciler {
    pricer: FarePricer,
    timeout: Duration,
    running: AtomicBool,
}

impl PenaltyReconciler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            pricer: FarePricer::new(config),
            timeout: Duration::minutes(config.penalty_timeout_minutes),
            running: AtomicBool::new(false),
        }
    }

    /// Run one sweep at `now`. Returns the number of trips closed.
    /// A sweep that finds the previous one still running does nothing.
    pub fn sweep(
        &self,
        store: &FareStore,
        cache: &ReferenceCache,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        if self.running.swap(true, Ordering::AcqRel) {
            log::debug!("penalty sweep skipped: previous sweep still running");
            return Ok(0);
        }
        let result = self.sweep_inner(store, cache, now);
        self.running.store(false, Ordering::Release);
        result
    }

    fn sweep_inner(
        &self,
        store: &FareStore,
        cache: &ReferenceCache,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let cutoff = now - self.timeout;
        let stale = store.stale_pending_trips(cutoff)?;
        let mut closed = 0usize;

        for trip in &stale {
            match self.close_one(store, cache, trip) {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => {
                    log::warn!("penalty close failed for trip {}: {e}", trip.record_id);
                }
            }
        }

        if closed > 0 {
            log::info!("penalty sweep closed {closed} of {} stale trips", stale.len());
        }
        Ok(closed)
    }

    fn close_one(
        &self,
        store: &FareStore,
        cache: &ReferenceCache,
        trip: &crate::store::TripRow,
    ) -> EngineResult<bool> {
        let Some(route) = cache.route(store, trip.route_id)? else {
            log::warn!("stale trip {} references unknown route {}", trip.record_id, trip.route_id);
            return Ok(false);
        };
        // A pending trip on a single-tap route is inconsistent data;
        // skip it rather than guess a repair.
        if route.tap_mode() != TapMode::TapInOut {
            log::warn!(
                "stale trip {} on {} route {}, skipping",
                trip.record_id,
                route.tap_mode().as_str(),
                route.route_code
            );
            return Ok(false);
        }

        let breakdown = self.pricer.price(
            store,
            &trip.card_id,
            &route,
            trip.start_station,
            None,
            trip.board_time,
            true,
        )?;

        // End station and alight time stay null: the trip is closed
        // without a known destination. Penalty fares never accrue to
        // the monthly aggregate.
        let closed = store.complete_trip_if_pending(
            trip.id,
            &TripClose {
                end_station: None,
                end_station_name: String::new(),
                alight_time: None,
                fare: breakdown.base_fare,
                actual_fare: breakdown.actual_fare,
                discount_type: breakdown.discount_type,
                discount_amount: breakdown.discount_amount,
                penalty_fare: true,
            },
        )?;
        Ok(closed)
    }
}
