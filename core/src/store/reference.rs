//! Reference-data queries: routes, stations, fares, transfer rules,
//! discount policies. Read by the cache and the pricer; written only
//! by configuration tooling and the seed helpers.

use super::{
    DiscountPolicyRow, FareRow, FareStore, RouteRow, RouteStationRow, StationRow, TransferRuleRow,
};
use crate::error::EngineResult;
use rusqlite::{params, OptionalExtension};

impl FareStore {
    // ── Routes ─────────────────────────────────────────────────

    pub fn get_route(&self, route_id: i64) -> EngineResult<Option<RouteRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, route_code, name, status, fare_type, tap_mode, max_fare, direction_mode
                 FROM route WHERE id = ?1",
                params![route_id],
                map_route_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn all_active_routes(&self) -> EngineResult<Vec<RouteRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, route_code, name, status, fare_type, tap_mode, max_fare, direction_mode
             FROM route WHERE status = 'active' ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], map_route_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Stations ───────────────────────────────────────────────

    pub fn get_station(&self, station_id: i64) -> EngineResult<Option<StationRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, station_code, name, latitude, longitude, address, is_transfer
                 FROM station WHERE id = ?1",
                params![station_id],
                map_station_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Resolve a free-text gateway token: exact station code or name.
    pub fn find_station_by_token(&self, token: &str) -> EngineResult<Option<StationRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, station_code, name, latitude, longitude, address, is_transfer
                 FROM station WHERE station_code = ?1 OR name = ?1",
                params![token],
                map_station_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn all_stations(&self) -> EngineResult<Vec<StationRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, station_code, name, latitude, longitude, address, is_transfer
             FROM station ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], map_station_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Route membership ───────────────────────────────────────

    /// First route that serves the given station, for route inference
    /// when the gateway omitted the route id.
    pub fn route_for_station(&self, station_id: i64) -> EngineResult<Option<i64>> {
        let row = self
            .conn()
            .query_row(
                "SELECT route_id FROM route_station WHERE station_id = ?1
                 ORDER BY id ASC LIMIT 1",
                params![station_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row)
    }

    pub fn route_station(
        &self,
        route_id: i64,
        station_id: i64,
    ) -> EngineResult<Option<RouteStationRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, route_id, station_id, sequence, direction, zone_id, distance_km
                 FROM route_station WHERE route_id = ?1 AND station_id = ?2",
                params![route_id, station_id],
                |row| {
                    Ok(RouteStationRow {
                        id: row.get(0)?,
                        route_id: row.get(1)?,
                        station_id: row.get(2)?,
                        sequence: row.get(3)?,
                        direction: row.get(4)?,
                        zone_id: row.get(5)?,
                        distance_km: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ── Fare rules ─────────────────────────────────────────────

    pub fn uniform_fare(&self, route_id: i64) -> EngineResult<Option<FareRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, route_id, start_station, end_station, base_price, fare_type,
                        segment_count, extra_price, status
                 FROM fare
                 WHERE route_id = ?1 AND fare_type = 'uniform' AND status = 'active'
                 LIMIT 1",
                params![route_id],
                map_fare_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn station_pair_fare(
        &self,
        route_id: i64,
        start_station: i64,
        end_station: i64,
    ) -> EngineResult<Option<FareRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, route_id, start_station, end_station, base_price, fare_type,
                        segment_count, extra_price, status
                 FROM fare
                 WHERE route_id = ?1 AND start_station = ?2 AND end_station = ?3
                   AND status = 'active'
                 LIMIT 1",
                params![route_id, start_station, end_station],
                map_fare_row,
            )
            .optional()?;
        Ok(row)
    }

    /// The route's generic tiered-pricing rule (start/end of 0 = any).
    pub fn segment_fare_rule(&self, route_id: i64) -> EngineResult<Option<FareRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, route_id, start_station, end_station, base_price, fare_type,
                        segment_count, extra_price, status
                 FROM fare
                 WHERE route_id = ?1 AND fare_type = 'segment' AND status = 'active'
                   AND start_station = 0 AND end_station = 0
                 LIMIT 1",
                params![route_id],
                map_fare_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Zone-priced fare anchored at the boarding station.
    pub fn zone_fare(&self, route_id: i64, start_station: i64) -> EngineResult<Option<FareRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, route_id, start_station, end_station, base_price, fare_type,
                        segment_count, extra_price, status
                 FROM fare
                 WHERE route_id = ?1 AND start_station = ?2 AND status = 'active'
                 LIMIT 1",
                params![route_id, start_station],
                map_fare_row,
            )
            .optional()?;
        Ok(row)
    }

    // ── Transfer rules ─────────────────────────────────────────

    pub fn find_transfer_rule(
        &self,
        from_route_id: i64,
        from_station_id: i64,
        to_route_id: i64,
        to_station_id: i64,
    ) -> EngineResult<Option<TransferRuleRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, from_route_id, from_station_id, to_route_id, to_station_id,
                        discount_amount, discount_rate, time_window, status
                 FROM transfer_rule
                 WHERE from_route_id = ?1 AND from_station_id = ?2
                   AND to_route_id = ?3 AND to_station_id = ?4 AND status = 'active'
                 LIMIT 1",
                params![from_route_id, from_station_id, to_route_id, to_station_id],
                |row| {
                    Ok(TransferRuleRow {
                        id: row.get(0)?,
                        from_route_id: row.get(1)?,
                        from_station_id: row.get(2)?,
                        to_route_id: row.get(3)?,
                        to_station_id: row.get(4)?,
                        discount_amount: row.get(5)?,
                        discount_rate: row.get(6)?,
                        time_window: row.get(7)?,
                        status: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ── Discount policies ──────────────────────────────────────

    pub fn policy_for_card_type(&self, card_type: &str) -> EngineResult<Option<DiscountPolicyRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, policy_name, policy_type, threshold, discount_rate,
                        discount_amount, card_type_filter, status
                 FROM discount_policy
                 WHERE policy_type = ?1 AND (card_type_filter = ?1 OR card_type_filter = '')
                   AND status = 'active'
                 LIMIT 1",
                params![card_type],
                map_policy_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Monthly accumulation tiers, highest threshold first.
    pub fn monthly_policies(&self) -> EngineResult<Vec<DiscountPolicyRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, policy_name, policy_type, threshold, discount_rate,
                    discount_amount, card_type_filter, status
             FROM discount_policy
             WHERE policy_type = 'monthly_accumulate' AND status = 'active'
             ORDER BY threshold DESC",
        )?;
        let rows = stmt
            .query_map([], map_policy_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Card ids that are blocked or lost. Feeds the blacklist cache.
    pub fn blacklisted_card_ids(&self) -> EngineResult<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT card_id FROM card WHERE status = 'blocked' OR status = 'lost'")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Seed inserts (tooling and tests) ───────────────────────

    pub fn insert_route(
        &self,
        route_code: &str,
        name: &str,
        fare_type: &str,
        tap_mode: &str,
        max_fare: f64,
    ) -> EngineResult<i64> {
        self.conn().execute(
            "INSERT INTO route (route_code, name, status, fare_type, tap_mode, max_fare, direction_mode)
             VALUES (?1, ?2, 'active', ?3, ?4, ?5, 'both')",
            params![route_code, name, fare_type, tap_mode, max_fare],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn insert_station(&self, station_code: &str, name: &str) -> EngineResult<i64> {
        self.conn().execute(
            "INSERT INTO station (station_code, name, latitude, longitude, address, is_transfer)
             VALUES (?1, ?2, 0, 0, '', 0)",
            params![station_code, name],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn insert_route_station(
        &self,
        route_id: i64,
        station_id: i64,
        sequence: i64,
        zone_id: Option<&str>,
    ) -> EngineResult<i64> {
        self.conn().execute(
            "INSERT INTO route_station (route_id, station_id, sequence, direction, zone_id)
             VALUES (?1, ?2, ?3, 'up', ?4)",
            params![route_id, station_id, sequence, zone_id],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_fare(
        &self,
        route_id: i64,
        start_station: i64,
        end_station: i64,
        base_price: f64,
        fare_type: &str,
        segment_count: i64,
        extra_price: f64,
    ) -> EngineResult<i64> {
        self.conn().execute(
            "INSERT INTO fare (route_id, start_station, end_station, base_price, fare_type,
                               segment_count, extra_price, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active')",
            params![
                route_id,
                start_station,
                end_station,
                base_price,
                fare_type,
                segment_count,
                extra_price
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_transfer_rule(
        &self,
        from_route_id: i64,
        from_station_id: i64,
        to_route_id: i64,
        to_station_id: i64,
        discount_amount: f64,
        discount_rate: f64,
        time_window: i64,
    ) -> EngineResult<i64> {
        self.conn().execute(
            "INSERT INTO transfer_rule (from_route_id, from_station_id, to_route_id, to_station_id,
                                        discount_amount, discount_rate, time_window, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active')",
            params![
                from_route_id,
                from_station_id,
                to_route_id,
                to_station_id,
                discount_amount,
                discount_rate,
                time_window
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn insert_discount_policy(
        &self,
        policy_name: &str,
        policy_type: &str,
        threshold: f64,
        discount_rate: f64,
        discount_amount: f64,
        card_type_filter: &str,
    ) -> EngineResult<i64> {
        self.conn().execute(
            "INSERT INTO discount_policy (policy_name, policy_type, threshold, discount_rate,
                                          discount_amount, card_type_filter, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active')",
            params![
                policy_name,
                policy_type,
                threshold,
                discount_rate,
                discount_amount,
                card_type_filter
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }
}

fn map_route_row(row: &rusqlite::Row) -> rusqlite::Result<RouteRow> {
    Ok(RouteRow {
        id: row.get(0)?,
        route_code: row.get(1)?,
        name: row.get(2)?,
        status: row.get(3)?,
        fare_type: row.get(4)?,
        tap_mode: row.get(5)?,
        max_fare: row.get(6)?,
        direction_mode: row.get(7)?,
    })
}

fn map_fare_row(row: &rusqlite::Row) -> rusqlite::Result<FareRow> {
    Ok(FareRow {
        id: row.get(0)?,
        route_id: row.get(1)?,
        start_station: row.get(2)?,
        end_station: row.get(3)?,
        base_price: row.get(4)?,
        fare_type: row.get(5)?,
        segment_count: row.get(6)?,
        extra_price: row.get(7)?,
        status: row.get(8)?,
    })
}

fn map_station_row(row: &rusqlite::Row) -> rusqlite::Result<StationRow> {
    Ok(StationRow {
        id: row.get(0)?,
        station_code: row.get(1)?,
        name: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        address: row.get(5)?,
        is_transfer: row.get(6)?,
    })
}

fn map_policy_row(row: &rusqlite::Row) -> rusqlite::Result<DiscountPolicyRow> {
    Ok(DiscountPolicyRow {
        id: row.get(0)?,
        policy_name: row.get(1)?,
        policy_type: row.get(2)?,
        threshold: row.get(3)?,
        discount_rate: row.get(4)?,
        discount_amount: row.get(5)?,
        card_type_filter: row.get(6)?,
        status: row.get(7)?,
    })
}
