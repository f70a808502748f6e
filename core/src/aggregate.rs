//! Monthly spend accumulator.
//!
//! Keyed by (card, calendar month of the *processing* time). A trip
//! boarded at 23:59 on the last day of a month but processed after
//! midnight accrues to the new month; that matches the upstream
//! behavior and is flagged in DESIGN.md. Penalty trips never pass
//! through here.

use crate::error::EngineResult;
use crate::store::FareStore;
use chrono::{DateTime, Utc};

pub struct MonthlyAccumulator;

impl MonthlyAccumulator {
    /// `%Y-%m` key for a processing instant.
    pub fn month_key(at: DateTime<Utc>) -> String {
        at.format("%Y-%m").to_string()
    }

    /// Running total of actual fares billed to this card this month.
    pub fn current_total(store: &FareStore, card_id: &str) -> EngineResult<f64> {
        store.monthly_total(card_id, &Self::month_key(Utc::now()))
    }

    /// Add a completed trip's actual fare to the running total.
    pub fn increment(store: &FareStore, card_id: &str, amount: f64) -> EngineResult<()> {
        store.increment_monthly(card_id, &Self::month_key(Utc::now()), amount)
    }
}
