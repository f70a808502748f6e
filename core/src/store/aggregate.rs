//! Monthly aggregate persistence. The increment is an atomic upsert so
//! two concurrent completions for the same card cannot lose an update.

use super::FareStore;
use crate::error::EngineResult;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

impl FareStore {
    pub fn monthly_total(&self, card_id: &str, month: &str) -> EngineResult<f64> {
        let total = self
            .conn()
            .query_row(
                "SELECT total_amount FROM monthly_aggregate WHERE card_id = ?1 AND month = ?2",
                params![card_id, month],
                |row| row.get(0),
            )
            .optional()?;
        Ok(total.unwrap_or(0.0))
    }

    pub fn increment_monthly(&self, card_id: &str, month: &str, amount: f64) -> EngineResult<()> {
        self.conn().execute(
            "INSERT INTO monthly_aggregate (card_id, month, total_amount, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(card_id, month) DO UPDATE SET
                 total_amount = total_amount + excluded.total_amount,
                 updated_at = excluded.updated_at",
            params![card_id, month, amount, Utc::now()],
        )?;
        Ok(())
    }
}
