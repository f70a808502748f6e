//! Trip and tap-event persistence: the ledger's write path plus the
//! queries the re-tap heuristic, transfer matcher, and penalty sweep
//! depend on.

use super::{FareStore, TapEventRow, TripRow};
use crate::error::EngineResult;
use crate::types::TripStatus;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

/// A trip about to be inserted. The store assigns the row id.
#[derive(Debug, Clone)]
pub struct NewTrip {
    pub record_id: String,
    pub card_id: String,
    pub route_id: i64,
    pub start_station: i64,
    pub end_station: Option<i64>,
    pub start_station_name: String,
    pub end_station_name: String,
    pub board_time: DateTime<Utc>,
    pub alight_time: Option<DateTime<Utc>>,
    pub fare: f64,
    pub actual_fare: f64,
    pub discount_type: String,
    pub discount_amount: f64,
    pub penalty_fare: bool,
    pub status: TripStatus,
    pub gateway_id: String,
}

/// The priced fields written when a pending trip closes.
#[derive(Debug, Clone)]
pub struct TripClose {
    pub end_station: Option<i64>,
    pub end_station_name: String,
    pub alight_time: Option<DateTime<Utc>>,
    pub fare: f64,
    pub actual_fare: f64,
    pub discount_type: String,
    pub discount_amount: f64,
    pub penalty_fare: bool,
}

const TRIP_COLUMNS: &str = "id, record_id, card_id, route_id, start_station, end_station,
    start_station_name, end_station_name, board_time, alight_time, fare, actual_fare,
    discount_type, discount_amount, penalty_fare, status, gateway_id";

impl FareStore {
    pub fn insert_trip(&self, t: &NewTrip) -> EngineResult<i64> {
        let now = Utc::now();
        self.conn().execute(
            "INSERT INTO trip (record_id, card_id, route_id, start_station, end_station,
                 start_station_name, end_station_name, board_time, alight_time, fare,
                 actual_fare, discount_type, discount_amount, penalty_fare, status,
                 gateway_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)",
            params![
                t.record_id,
                t.card_id,
                t.route_id,
                t.start_station,
                t.end_station,
                t.start_station_name,
                t.end_station_name,
                t.board_time,
                t.alight_time,
                t.fare,
                t.actual_fare,
                t.discount_type,
                t.discount_amount,
                t.penalty_fare,
                t.status.as_str(),
                t.gateway_id,
                now,
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn find_trip_by_record_id(&self, record_id: &str) -> EngineResult<Option<TripRow>> {
        let sql = format!("SELECT {TRIP_COLUMNS} FROM trip WHERE record_id = ?1");
        let row = self
            .conn()
            .query_row(&sql, params![record_id], map_trip_row)
            .optional()?;
        Ok(row)
    }

    /// Most recent pending trip for a card on a route.
    pub fn latest_pending_trip(
        &self,
        card_id: &str,
        route_id: i64,
    ) -> EngineResult<Option<TripRow>> {
        let sql = format!(
            "SELECT {TRIP_COLUMNS} FROM trip
             WHERE card_id = ?1 AND route_id = ?2 AND status = 'pending'
             ORDER BY board_time DESC LIMIT 1"
        );
        let row = self
            .conn()
            .query_row(&sql, params![card_id, route_id], map_trip_row)
            .optional()?;
        Ok(row)
    }

    /// Most recent trip for a card on a route boarded after `since`.
    /// Drives the rapid re-tap heuristic.
    pub fn latest_trip_since(
        &self,
        card_id: &str,
        route_id: i64,
        since: DateTime<Utc>,
    ) -> EngineResult<Option<TripRow>> {
        let sql = format!(
            "SELECT {TRIP_COLUMNS} FROM trip
             WHERE card_id = ?1 AND route_id = ?2 AND board_time > ?3
             ORDER BY board_time DESC LIMIT 1"
        );
        let row = self
            .conn()
            .query_row(&sql, params![card_id, route_id, since], map_trip_row)
            .optional()?;
        Ok(row)
    }

    /// Most recent completed trip with known alight data, for transfer
    /// matching.
    pub fn latest_completed_trip_with_alight(
        &self,
        card_id: &str,
    ) -> EngineResult<Option<TripRow>> {
        let sql = format!(
            "SELECT {TRIP_COLUMNS} FROM trip
             WHERE card_id = ?1 AND status = 'completed'
               AND alight_time IS NOT NULL AND end_station IS NOT NULL
             ORDER BY alight_time DESC LIMIT 1"
        );
        let row = self
            .conn()
            .query_row(&sql, params![card_id], map_trip_row)
            .optional()?;
        Ok(row)
    }

    /// Close a pending trip with priced fields. Compare-and-swap on the
    /// status column: returns false when another writer already moved
    /// the trip out of pending.
    pub fn complete_trip_if_pending(&self, trip_id: i64, close: &TripClose) -> EngineResult<bool> {
        let changed = self.conn().execute(
            "UPDATE trip SET end_station = ?2, end_station_name = ?3, alight_time = ?4,
                 fare = ?5, actual_fare = ?6, discount_type = ?7, discount_amount = ?8,
                 penalty_fare = ?9, status = 'completed', updated_at = ?10
             WHERE id = ?1 AND status = 'pending'",
            params![
                trip_id,
                close.end_station,
                close.end_station_name,
                close.alight_time,
                close.fare,
                close.actual_fare,
                close.discount_type,
                close.discount_amount,
                close.penalty_fare,
                Utc::now(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Pending trips boarded before the cutoff, oldest first. Feeds the
    /// penalty sweep.
    pub fn stale_pending_trips(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<TripRow>> {
        let sql = format!(
            "SELECT {TRIP_COLUMNS} FROM trip
             WHERE status = 'pending' AND board_time < ?1
             ORDER BY board_time ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(params![cutoff], map_trip_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn trips_page(
        &self,
        card_id: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> EngineResult<Vec<TripRow>> {
        let rows = match card_id {
            Some(card) => {
                let sql = format!(
                    "SELECT {TRIP_COLUMNS} FROM trip WHERE card_id = ?1
                     ORDER BY board_time DESC LIMIT ?2 OFFSET ?3"
                );
                let mut stmt = self.conn().prepare(&sql)?;
                let rows = stmt
                    .query_map(params![card, limit, offset], map_trip_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!(
                    "SELECT {TRIP_COLUMNS} FROM trip
                     ORDER BY board_time DESC LIMIT ?1 OFFSET ?2"
                );
                let mut stmt = self.conn().prepare(&sql)?;
                let rows = stmt
                    .query_map(params![limit, offset], map_trip_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    pub fn trip_count(&self, card_id: Option<&str>) -> EngineResult<i64> {
        let count = match card_id {
            Some(card) => self.conn().query_row(
                "SELECT COUNT(*) FROM trip WHERE card_id = ?1",
                params![card],
                |row| row.get(0),
            )?,
            None => self
                .conn()
                .query_row("SELECT COUNT(*) FROM trip", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    // ── Tap events (write-only audit trail) ────────────────────

    pub fn insert_tap_event(&self, e: &TapEventRow) -> EngineResult<()> {
        self.conn().execute(
            "INSERT INTO tap_event (record_id, card_id, route_id, station_id, station_name,
                 tap_type, tap_time, gateway_id, raw_payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                e.record_id,
                e.card_id,
                e.route_id,
                e.station_id,
                e.station_name,
                e.tap_type,
                e.tap_time,
                e.gateway_id,
                e.raw_payload,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn tap_event_count(&self, card_id: &str) -> EngineResult<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM tap_event WHERE card_id = ?1",
            params![card_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn map_trip_row(row: &rusqlite::Row) -> rusqlite::Result<TripRow> {
    let status_raw: String = row.get(15)?;
    let status = TripStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            15,
            rusqlite::types::Type::Text,
            format!("unknown trip status: {status_raw}").into(),
        )
    })?;
    Ok(TripRow {
        id: row.get(0)?,
        record_id: row.get(1)?,
        card_id: row.get(2)?,
        route_id: row.get(3)?,
        start_station: row.get(4)?,
        end_station: row.get(5)?,
        start_station_name: row.get(6)?,
        end_station_name: row.get(7)?,
        board_time: row.get(8)?,
        alight_time: row.get(9)?,
        fare: row.get(10)?,
        actual_fare: row.get(11)?,
        discount_type: row.get(12)?,
        discount_amount: row.get(13)?,
        penalty_fare: row.get(14)?,
        status,
        gateway_id: row.get(16)?,
    })
}
