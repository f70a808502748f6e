//! Fare pricing pipeline.
//!
//! Evaluation order is fixed and must not be reordered — each discount
//! applies to the fare *remaining after* the previous one:
//!
//!   1. base fare by route pricing mode
//!   2. penalty short-circuit (ceiling, no discounts)
//!   3. card-class discount (student / elder / disabled)
//!   4. transfer discount
//!   5. monthly accumulation discount
//!   6. floor to 2 decimals, cap at the route ceiling
//!
//! Every subtraction clamps at zero. Missing fare rows fall through to
//! documented defaults, never to an error.

use crate::aggregate::MonthlyAccumulator;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::store::{FareStore, RouteRow};
use crate::transfer::{TransferMatcher, TRANSFER_LABEL};
use crate::types::FareType;
use chrono::{DateTime, Utc};

pub const MONTHLY_LABEL: &str = "monthly_discount";

#[derive(Debug, Clone, PartialEq)]
pub struct FareBreakdown {
    pub base_fare: f64,
    pub actual_fare: f64,
    pub discount_amount: f64,
    pub discount_type: String,
    pub penalty_fare: bool,
}

pub struct FarePricer {
    default_base_fare: f64,
    monthly_tiers: Vec<(f64, f64)>,
}

impl FarePricer {
    pub fn new(config: &EngineConfig) -> Self {
        let mut monthly_tiers: Vec<(f64, f64)> = config
            .monthly_tiers
            .iter()
            .map(|t| (t.threshold, t.rate))
            .collect();
        monthly_tiers.sort_by(|a, b| b.0.total_cmp(&a.0));
        Self {
            default_base_fare: config.default_base_fare,
            monthly_tiers,
        }
    }

    /// Price one trip. `end_station` is None when the alighting is
    /// unknown (single-tap routes, penalty closures).
    pub fn price(
        &self,
        store: &FareStore,
        card_id: &str,
        route: &RouteRow,
        start_station: i64,
        end_station: Option<i64>,
        board_time: DateTime<Utc>,
        is_penalty: bool,
    ) -> EngineResult<FareBreakdown> {
        let base_fare = self.base_fare(store, route, start_station, end_station)?;

        // Penalty rides pay the undiscounted ceiling.
        if is_penalty {
            let charged = if route.max_fare > 0.0 {
                route.max_fare
            } else {
                base_fare
            };
            return Ok(FareBreakdown {
                base_fare: charged,
                actual_fare: round_down(charged),
                discount_amount: 0.0,
                discount_type: String::new(),
                penalty_fare: true,
            });
        }

        let mut actual = base_fare;
        let mut discount_total = 0.0;
        let mut labels: Vec<String> = Vec::new();

        // Card-class discount fires first; a free fare short-circuits
        // the rest of the stack.
        if let Some(card) = store.find_card(card_id)? {
            let (amount, label, is_free) = self.card_class_discount(store, &card.card_type, actual)?;
            if amount > 0.0 {
                actual = (actual - amount).max(0.0);
                discount_total += amount;
                labels.push(label);
                if is_free {
                    return Ok(finish(base_fare, actual, discount_total, labels, route));
                }
            }
        }

        let transfer_amount = TransferMatcher::match_discount(
            store,
            card_id,
            route.id,
            start_station,
            board_time,
            actual,
        )?;
        if transfer_amount > 0.0 {
            actual = (actual - transfer_amount).max(0.0);
            discount_total += transfer_amount;
            labels.push(TRANSFER_LABEL.to_string());
        }

        let monthly_rate = self.monthly_rate(store, card_id, actual)?;
        if monthly_rate > 0.0 {
            let amount = actual * monthly_rate;
            actual = (actual - amount).max(0.0);
            discount_total += amount;
            labels.push(MONTHLY_LABEL.to_string());
        }

        Ok(finish(base_fare, actual, discount_total, labels, route))
    }

    // ── Base fare ──────────────────────────────────────────────

    fn base_fare(
        &self,
        store: &FareStore,
        route: &RouteRow,
        start_station: i64,
        end_station: Option<i64>,
    ) -> EngineResult<f64> {
        match route.fare_type() {
            FareType::Uniform => self.uniform_fare(store, route),
            FareType::Segment => match end_station {
                Some(end) if end > 0 => {
                    if let Some(pair) = store.station_pair_fare(route.id, start_station, end)? {
                        return Ok(pair.base_price);
                    }
                    self.tiered_fare(store, route, start_station, end)
                }
                _ => self.zone_fare(store, route, start_station),
            },
            FareType::Distance => match end_station {
                Some(end) if end > 0 => self.tiered_fare(store, route, start_station, end),
                _ => self.uniform_fare(store, route),
            },
        }
    }

    /// Uniform fare row, falling back to the ceiling, falling back to
    /// the configured default.
    fn uniform_fare(&self, store: &FareStore, route: &RouteRow) -> EngineResult<f64> {
        if let Some(fare) = store.uniform_fare(route.id)? {
            return Ok(fare.base_price);
        }
        if route.max_fare > 0.0 {
            return Ok(route.max_fare);
        }
        Ok(self.default_base_fare)
    }

    /// Zone pricing for boarding-only segment routes: a fare row
    /// anchored at the boarding station's zone, else uniform fallback.
    fn zone_fare(
        &self,
        store: &FareStore,
        route: &RouteRow,
        start_station: i64,
    ) -> EngineResult<f64> {
        let membership = store.route_station(route.id, start_station)?;
        let has_zone = membership.is_some_and(|rs| rs.zone_id.is_some());
        if !has_zone {
            return self.uniform_fare(store, route);
        }
        if let Some(fare) = store.zone_fare(route.id, start_station)? {
            return Ok(fare.base_price);
        }
        if route.max_fare > 0.0 {
            return Ok(route.max_fare);
        }
        self.uniform_fare(store, route)
    }

    /// Tiered pricing by stop-count difference against the route's
    /// generic segment rule: `included` stops at `base`, then `extra`
    /// per additional stop.
    fn tiered_fare(
        &self,
        store: &FareStore,
        route: &RouteRow,
        start_station: i64,
        end_station: i64,
    ) -> EngineResult<f64> {
        let segments = self.segment_count(store, route.id, start_station, end_station)?;
        if segments <= 0 {
            return Ok(self.default_base_fare);
        }
        let Some(rule) = store.segment_fare_rule(route.id)? else {
            return Ok(self.default_base_fare);
        };
        let base = if rule.base_price > 0.0 {
            rule.base_price
        } else {
            self.default_base_fare
        };
        let included = if rule.segment_count > 0 {
            rule.segment_count
        } else {
            1
        };
        if segments <= included || rule.extra_price <= 0.0 {
            return Ok(base);
        }
        Ok(base + (segments - included) as f64 * rule.extra_price)
    }

    /// |sequence(end) - sequence(start)| on the route, 0 when either
    /// station is not on it.
    fn segment_count(
        &self,
        store: &FareStore,
        route_id: i64,
        start_station: i64,
        end_station: i64,
    ) -> EngineResult<i64> {
        let start = store.route_station(route_id, start_station)?;
        let end = store.route_station(route_id, end_station)?;
        match (start, end) {
            (Some(s), Some(e)) => Ok((e.sequence - s.sequence).abs()),
            _ => Ok(0),
        }
    }

    // ── Discounts ──────────────────────────────────────────────

    /// Card-class discount: a policy row when configured (fixed amount
    /// beats rate), else the built-in defaults. Returns
    /// (amount, label, covers-the-whole-fare).
    fn card_class_discount(
        &self,
        store: &FareStore,
        card_type: &str,
        current_fare: f64,
    ) -> EngineResult<(f64, String, bool)> {
        if card_type == "normal" {
            return Ok((0.0, String::new(), false));
        }
        let label = format!("{card_type}_discount");
        let amount = match store.policy_for_card_type(card_type)? {
            Some(policy) => {
                if policy.discount_amount > 0.0 {
                    policy.discount_amount
                } else if policy.discount_rate >= 0.0 {
                    current_fare * policy.discount_rate
                } else {
                    0.0
                }
            }
            None => match card_type {
                "student" => current_fare * 0.2,
                "elder" => current_fare * 0.5,
                "disabled" => current_fare,
                _ => return Ok((0.0, String::new(), false)),
            },
        };
        let is_free = amount >= current_fare;
        Ok((amount, label, is_free))
    }

    /// Monthly accumulation rate for this card, given the fare left
    /// after the earlier discounts. Policy rows when present, built-in
    /// tiers otherwise.
    fn monthly_rate(
        &self,
        store: &FareStore,
        card_id: &str,
        current_fare: f64,
    ) -> EngineResult<f64> {
        let prior = MonthlyAccumulator::current_total(store, card_id)?;
        let total = prior + current_fare;

        let policies = store.monthly_policies()?;
        if !policies.is_empty() {
            for policy in &policies {
                if total >= policy.threshold && policy.discount_rate > 0.0 {
                    return Ok(policy.discount_rate);
                }
            }
            return Ok(0.0);
        }

        for (threshold, rate) in &self.monthly_tiers {
            if total >= *threshold {
                return Ok(*rate);
            }
        }
        Ok(0.0)
    }
}

fn finish(
    base_fare: f64,
    actual: f64,
    discount_total: f64,
    labels: Vec<String>,
    route: &RouteRow,
) -> FareBreakdown {
    let mut actual = round_down(actual);
    if route.max_fare > 0.0 && actual > route.max_fare {
        actual = route.max_fare;
    }
    FareBreakdown {
        base_fare,
        actual_fare: actual,
        discount_amount: discount_total,
        discount_type: labels.join(","),
        penalty_fare: false,
    }
}

/// Floor to 2 decimal places. Never round-to-nearest.
pub fn round_down(value: f64) -> f64 {
    (value * 100.0).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_down_floors() {
        assert_eq!(round_down(1.999), 1.99);
        assert_eq!(round_down(2.0), 2.0);
        assert_eq!(round_down(0.005), 0.0);
        assert_eq!(round_down(3.141), 3.14);
    }
}
