//! SQLite persistence layer.
//!
//! RULE: Only the store modules talk to the database.
//! Engine components call store methods — they never execute SQL
//! directly.

mod aggregate;
mod reference;
mod trip;

pub use trip::{NewTrip, TripClose};

use crate::error::EngineResult;
use crate::types::{FareType, TapMode, TripStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

pub struct FareStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl FareStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases this returns a fresh, isolated database.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Card ───────────────────────────────────────────────────

    pub fn find_card(&self, card_id: &str) -> EngineResult<Option<CardRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, card_id, holder_name, card_type, status, balance
                 FROM card WHERE card_id = ?1",
                params![card_id],
                map_card_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn insert_card(
        &self,
        card_id: &str,
        holder_name: &str,
        card_type: &str,
        status: &str,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO card (card_id, holder_name, card_type, status, balance, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![card_id, holder_name, card_type, status, Utc::now()],
        )?;
        Ok(())
    }

    /// Auto-provision a normal, active card on first sight.
    pub fn first_or_create_card(&self, card_id: &str) -> EngineResult<CardRow> {
        self.conn.execute(
            "INSERT OR IGNORE INTO card (card_id, holder_name, card_type, status, balance, created_at)
             VALUES (?1, '', 'normal', 'active', 0, ?2)",
            params![card_id, Utc::now()],
        )?;
        let row = self.conn.query_row(
            "SELECT id, card_id, holder_name, card_type, status, balance
             FROM card WHERE card_id = ?1",
            params![card_id],
            map_card_row,
        )?;
        Ok(row)
    }

    pub fn set_card_status(&self, card_id: &str, status: &str) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE card SET status = ?2 WHERE card_id = ?1",
            params![card_id, status],
        )?;
        Ok(())
    }

    pub fn set_card_type(&self, card_id: &str, card_type: &str) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE card SET card_type = ?2 WHERE card_id = ?1",
            params![card_id, card_type],
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Row types ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CardRow {
    pub id: i64,
    pub card_id: String,
    pub holder_name: String,
    pub card_type: String,
    pub status: String,
    pub balance: f64,
}

impl CardRow {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone)]
pub struct RouteRow {
    pub id: i64,
    pub route_code: String,
    pub name: String,
    pub status: String,
    pub fare_type: String,
    pub tap_mode: String,
    pub max_fare: f64,
    pub direction_mode: String,
}

impl RouteRow {
    pub fn fare_type(&self) -> FareType {
        FareType::parse(&self.fare_type)
    }

    pub fn tap_mode(&self) -> TapMode {
        TapMode::parse(&self.tap_mode)
    }
}

#[derive(Debug, Clone)]
pub struct StationRow {
    pub id: i64,
    pub station_code: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub is_transfer: bool,
}

#[derive(Debug, Clone)]
pub struct RouteStationRow {
    pub id: i64,
    pub route_id: i64,
    pub station_id: i64,
    pub sequence: i64,
    pub direction: String,
    pub zone_id: Option<String>,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct FareRow {
    pub id: i64,
    pub route_id: i64,
    pub start_station: i64,
    pub end_station: i64,
    pub base_price: f64,
    pub fare_type: String,
    pub segment_count: i64,
    pub extra_price: f64,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct TransferRuleRow {
    pub id: i64,
    pub from_route_id: i64,
    pub from_station_id: i64,
    pub to_route_id: i64,
    pub to_station_id: i64,
    pub discount_amount: f64,
    pub discount_rate: f64,
    pub time_window: i64,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct DiscountPolicyRow {
    pub id: i64,
    pub policy_name: String,
    pub policy_type: String,
    pub threshold: f64,
    pub discount_rate: f64,
    pub discount_amount: f64,
    pub card_type_filter: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct TripRow {
    pub id: i64,
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

#[derive(Debug, Clone)]
pub struct TapEventRow {
    pub id: Option<i64>,
    pub record_id: String,
    pub card_id: String,
    pub route_id: i64,
    pub station_id: i64,
    pub station_name: String,
    pub tap_type: String,
    pub tap_time: DateTime<Utc>,
    pub gateway_id: String,
    pub raw_payload: Option<String>,
}

fn map_card_row(row: &rusqlite::Row) -> rusqlite::Result<CardRow> {
    Ok(CardRow {
        id: row.get(0)?,
        card_id: row.get(1)?,
        holder_name: row.get(2)?,
        card_type: row.get(3)?,
        status: row.get(4)?,
        balance: row.get(5)?,
    })
}
