//! Transfer-discount matcher.
//!
//! A new boarding earns a transfer discount when the card's most
//! recent completed trip alighted at a station with a configured rule
//! to the new (route, station), and the boarding falls inside the
//! rule's time window.

use crate::error::EngineResult;
use crate::store::FareStore;
use chrono::{DateTime, Utc};

pub const TRANSFER_LABEL: &str = "transfer";

/// Default window in minutes when the rule stores 0.
const DEFAULT_TIME_WINDOW_MINUTES: i64 = 60;

pub struct TransferMatcher;

impl TransferMatcher {
    /// Returns the discount amount for this boarding, or 0.0 when no
    /// rule matches or the window has lapsed.
    pub fn match_discount(
        store: &FareStore,
        card_id: &str,
        route_id: i64,
        station_id: i64,
        board_time: DateTime<Utc>,
        current_fare: f64,
    ) -> EngineResult<f64> {
        let Some(prior) = store.latest_completed_trip_with_alight(card_id)? else {
            return Ok(0.0);
        };
        let (Some(alight_time), Some(end_station)) = (prior.alight_time, prior.end_station) else {
            return Ok(0.0);
        };

        let Some(rule) =
            store.find_transfer_rule(prior.route_id, end_station, route_id, station_id)?
        else {
            return Ok(0.0);
        };

        let window_minutes = if rule.time_window == 0 {
            DEFAULT_TIME_WINDOW_MINUTES
        } else {
            rule.time_window
        };
        let elapsed = board_time.signed_duration_since(alight_time);
        if elapsed.num_seconds() > window_minutes * 60 {
            return Ok(0.0);
        }

        // Fixed amount takes priority over the rate.
        let amount = if rule.discount_amount > 0.0 {
            rule.discount_amount
        } else if rule.discount_rate >= 0.0 {
            current_fare * rule.discount_rate
        } else {
            0.0
        };
        Ok(amount)
    }
}
