//! Trip ledger: ingests tap events, owns the pending/completed state
//! machine, deduplicates repeated taps, and finalizes trips through
//! the pricer.

use crate::aggregate::MonthlyAccumulator;
use crate::cache::ReferenceCache;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::pricer::{FareBreakdown, FarePricer};
use crate::record::BatchRecord;
use crate::store::{FareStore, NewTrip, RouteRow, StationRow, TapEventRow, TripClose};
use crate::types::{TapMode, TripStatus};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use uuid::Uuid;

/// Result of ingesting one gateway record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A pending trip was opened (tap-in on a tap_in_out route).
    Created,
    /// A trip was priced and finalized.
    Completed,
    /// Idempotency-key collision or rapid re-tap; success no-op.
    Duplicate,
    /// The record is skipped; the batch continues.
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    UnknownStation(String),
    UnknownRoute,
    Blacklisted,
    InactiveCard(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::UnknownStation(token) => write!(f, "unknown station: {token}"),
            RejectReason::UnknownRoute => write!(f, "route could not be resolved"),
            RejectReason::Blacklisted => write!(f, "card is blacklisted"),
            RejectReason::InactiveCard(status) => write!(f, "card status is {status}"),
        }
    }
}

pub struct TripLedger {
    pricer: FarePricer,
    retap_window: Duration,
    retap_duplicate: Duration,
}

impl TripLedger {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            pricer: FarePricer::new(config),
            retap_window: Duration::seconds(config.retap_window_secs),
            retap_duplicate: Duration::seconds(config.retap_duplicate_secs),
        }
    }

    /// Process one gateway record. Rejections and duplicates are
    /// outcomes, not errors; `Err` means a persistence failure.
    pub fn ingest(
        &self,
        store: &FareStore,
        cache: &ReferenceCache,
        record: &BatchRecord,
    ) -> EngineResult<IngestOutcome> {
        let board_time = record.board_time.0;

        let Some(start) = cache.station_by_token(store, &record.board_station)? else {
            return Ok(IngestOutcome::Rejected(RejectReason::UnknownStation(
                record.board_station.clone(),
            )));
        };

        // An unresolvable alight token rejects the record; an absent
        // one just means the alighting is unknown.
        let alight_token = record.alight_station.as_deref().filter(|s| !s.is_empty());
        let end: Option<StationRow> = match alight_token {
            Some(token) => match cache.station_by_token(store, token)? {
                Some(station) => Some(station),
                None => {
                    return Ok(IngestOutcome::Rejected(RejectReason::UnknownStation(
                        token.to_string(),
                    )))
                }
            },
            None => None,
        };
        let alight_time = record.alight_time.map(|t| t.0);

        let route_id = match record.route_id.filter(|id| *id > 0) {
            Some(id) => Some(id),
            None => store.route_for_station(start.id)?,
        };
        let route = match route_id {
            Some(id) => cache.route(store, id)?,
            None => None,
        };
        let Some(route) = route else {
            return Ok(IngestOutcome::Rejected(RejectReason::UnknownRoute));
        };

        if cache.is_blacklisted(store, &record.card_id)? {
            return Ok(IngestOutcome::Rejected(RejectReason::Blacklisted));
        }
        let card = store.first_or_create_card(&record.card_id)?;
        if !card.is_active() {
            return Ok(IngestOutcome::Rejected(RejectReason::InactiveCard(
                card.status,
            )));
        }

        let record_id = match &record.record_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!(
                "{}_{}_{}",
                record.gateway(),
                record.card_id,
                board_time.timestamp()
            ),
        };
        if store.find_trip_by_record_id(&record_id)?.is_some() {
            return Ok(IngestOutcome::Duplicate);
        }

        // Rapid re-tap heuristic for boarding-only events: a prior trip
        // on the same card+route inside the candidate window, boarded
        // under the duplicate threshold ago, is the same physical tap.
        if alight_time.is_none() {
            if let Some(prior) =
                store.latest_trip_since(&record.card_id, route.id, board_time - self.retap_window)?
            {
                if board_time.signed_duration_since(prior.board_time) < self.retap_duplicate {
                    log::debug!(
                        "record {record_id}: re-tap within {}s of trip {}, dropping",
                        self.retap_duplicate.num_seconds(),
                        prior.record_id
                    );
                    return Ok(IngestOutcome::Duplicate);
                }
            }
        }

        match route.tap_mode() {
            TapMode::SingleTap => self.ingest_single_tap(
                store, record, &record_id, &route, &start, end.as_ref(), board_time,
            ),
            TapMode::TapInOut => self.ingest_tap_in_out(
                store,
                record,
                &record_id,
                &route,
                &start,
                end.as_ref(),
                board_time,
                alight_time,
            ),
        }
    }

    /// single_tap: the boarding tap prices and finalizes the trip.
    fn ingest_single_tap(
        &self,
        store: &FareStore,
        record: &BatchRecord,
        record_id: &str,
        route: &RouteRow,
        start: &StationRow,
        end: Option<&StationRow>,
        board_time: DateTime<Utc>,
    ) -> EngineResult<IngestOutcome> {
        self.record_tap(store, record, record_id, route, start, "tap_in", board_time);

        let breakdown = self.pricer.price(
            store,
            &record.card_id,
            route,
            start.id,
            end.map(|s| s.id),
            board_time,
            false,
        )?;

        store.insert_trip(&NewTrip {
            record_id: record_id.to_string(),
            card_id: record.card_id.clone(),
            route_id: route.id,
            start_station: start.id,
            end_station: end.map(|s| s.id),
            start_station_name: start.name.clone(),
            end_station_name: end.map(|s| s.name.clone()).unwrap_or_default(),
            board_time,
            alight_time: None,
            fare: breakdown.base_fare,
            actual_fare: breakdown.actual_fare,
            discount_type: breakdown.discount_type.clone(),
            discount_amount: breakdown.discount_amount,
            penalty_fare: breakdown.penalty_fare,
            status: TripStatus::Completed,
            gateway_id: record.gateway().to_string(),
        })?;

        self.accrue(store, &record.card_id, &breakdown)?;
        Ok(IngestOutcome::Completed)
    }

    /// tap_in_out: a boarding opens a pending trip; an alighting closes
    /// the newest pending one, or synthesizes a complete trip when the
    /// single upload already carries both taps.
    #[allow(clippy::too_many_arguments)]
    fn ingest_tap_in_out(
        &self,
        store: &FareStore,
        record: &BatchRecord,
        record_id: &str,
        route: &RouteRow,
        start: &StationRow,
        end: Option<&StationRow>,
        board_time: DateTime<Utc>,
        alight_time: Option<DateTime<Utc>>,
    ) -> EngineResult<IngestOutcome> {
        let (Some(alight_time), Some(end)) = (alight_time, end) else {
            return self.open_pending(store, record, record_id, route, start, board_time);
        };

        if let Some(pending) = store.latest_pending_trip(&record.card_id, route.id)? {
            self.record_tap(store, record, &pending.record_id, route, end, "tap_out", alight_time);

            let breakdown = self.pricer.price(
                store,
                &record.card_id,
                route,
                pending.start_station,
                Some(end.id),
                pending.board_time,
                false,
            )?;
            let closed = store.complete_trip_if_pending(
                pending.id,
                &TripClose {
                    end_station: Some(end.id),
                    end_station_name: end.name.clone(),
                    alight_time: Some(alight_time),
                    fare: breakdown.base_fare,
                    actual_fare: breakdown.actual_fare,
                    discount_type: breakdown.discount_type.clone(),
                    discount_amount: breakdown.discount_amount,
                    penalty_fare: breakdown.penalty_fare,
                },
            )?;
            if !closed {
                // Lost the close race: another tap-out or the penalty
                // sweep finalized this trip first.
                log::warn!(
                    "trip {} already closed, dropping tap-out {record_id}",
                    pending.record_id
                );
                return Ok(IngestOutcome::Duplicate);
            }
            self.accrue(store, &record.card_id, &breakdown)?;
            return Ok(IngestOutcome::Completed);
        }

        // No pending trip: the upload covers the whole ride.
        self.record_tap(store, record, record_id, route, start, "tap_in", board_time);
        self.record_tap(store, record, record_id, route, end, "tap_out", alight_time);

        let breakdown = self.pricer.price(
            store,
            &record.card_id,
            route,
            start.id,
            Some(end.id),
            board_time,
            false,
        )?;
        store.insert_trip(&NewTrip {
            record_id: record_id.to_string(),
            card_id: record.card_id.clone(),
            route_id: route.id,
            start_station: start.id,
            end_station: Some(end.id),
            start_station_name: start.name.clone(),
            end_station_name: end.name.clone(),
            board_time,
            alight_time: Some(alight_time),
            fare: breakdown.base_fare,
            actual_fare: breakdown.actual_fare,
            discount_type: breakdown.discount_type.clone(),
            discount_amount: breakdown.discount_amount,
            penalty_fare: breakdown.penalty_fare,
            status: TripStatus::Completed,
            gateway_id: record.gateway().to_string(),
        })?;
        self.accrue(store, &record.card_id, &breakdown)?;
        Ok(IngestOutcome::Completed)
    }

    fn open_pending(
        &self,
        store: &FareStore,
        record: &BatchRecord,
        record_id: &str,
        route: &RouteRow,
        start: &StationRow,
        board_time: DateTime<Utc>,
    ) -> EngineResult<IngestOutcome> {
        if let Some(pending) = store.latest_pending_trip(&record.card_id, route.id)? {
            if board_time.signed_duration_since(pending.board_time) < self.retap_window {
                log::debug!(
                    "record {record_id}: pending trip {} is younger than {}s, dropping",
                    pending.record_id,
                    self.retap_window.num_seconds()
                );
                return Ok(IngestOutcome::Duplicate);
            }
        }

        self.record_tap(store, record, record_id, route, start, "tap_in", board_time);

        store.insert_trip(&NewTrip {
            record_id: record_id.to_string(),
            card_id: record.card_id.clone(),
            route_id: route.id,
            start_station: start.id,
            end_station: None,
            start_station_name: start.name.clone(),
            end_station_name: String::new(),
            board_time,
            alight_time: None,
            fare: 0.0,
            actual_fare: 0.0,
            discount_type: String::new(),
            discount_amount: 0.0,
            penalty_fare: false,
            status: TripStatus::Pending,
            gateway_id: record.gateway().to_string(),
        })?;
        Ok(IngestOutcome::Created)
    }

    /// Audit record of one physical tap. Write failures are logged,
    /// never fatal to the ingest.
    fn record_tap(
        &self,
        store: &FareStore,
        record: &BatchRecord,
        trip_record_id: &str,
        route: &RouteRow,
        station: &StationRow,
        tap_type: &str,
        tap_time: DateTime<Utc>,
    ) {
        let event = TapEventRow {
            id: None,
            record_id: format!("{trip_record_id}_{tap_type}_{}", Uuid::new_v4()),
            card_id: record.card_id.clone(),
            route_id: route.id,
            station_id: station.id,
            station_name: station.name.clone(),
            tap_type: tap_type.to_string(),
            tap_time,
            gateway_id: record.gateway().to_string(),
            raw_payload: None,
        };
        if let Err(e) = store.insert_tap_event(&event) {
            log::warn!("tap event write failed for {trip_record_id}: {e}");
        }
    }

    /// Monthly accumulation for completed trips. Penalty fares never
    /// accrue.
    fn accrue(&self, store: &FareStore, card_id: &str, breakdown: &FareBreakdown) -> EngineResult<()> {
        if breakdown.penalty_fare {
            return Ok(());
        }
        MonthlyAccumulator::increment(store, card_id, breakdown.actual_fare)
    }
}
