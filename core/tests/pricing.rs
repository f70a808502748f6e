//! Integration tests for the fare pricing pipeline: base-fare modes,
//! discount ordering, floor rounding, ceiling capping, and the monthly
//! accumulation tiers.

use taptransit_core::{
    config::EngineConfig,
    engine::FareEngine,
    pricer::FarePricer,
    store::RouteRow,
};
use chrono::Utc;

fn engine() -> FareEngine {
    FareEngine::in_memory(EngineConfig::default()).expect("in-memory engine")
}

/// Seed a uniform-fare single_tap route with one station and return
/// (route_id, station_id).
fn seed_uniform(engine: &FareEngine, base: f64, max_fare: f64) -> (i64, i64) {
    engine.with_store(|store| {
        let route = store
            .insert_route("U1", "Uniform Line", "uniform", "single_tap", max_fare)
            .unwrap();
        let station = store.insert_station("S1", "First Stop").unwrap();
        store.insert_route_station(route, station, 1, None).unwrap();
        store
            .insert_fare(route, 0, 0, base, "uniform", 0, 0.0)
            .unwrap();
        (route, station)
    })
}

fn route_row(engine: &FareEngine, route_id: i64) -> RouteRow {
    engine.with_store(|store| store.get_route(route_id).unwrap().unwrap())
}

fn price_for(engine: &FareEngine, card: &str, route_id: i64, station: i64) -> taptransit_core::pricer::FareBreakdown {
    let route = route_row(engine, route_id);
    let pricer = FarePricer::new(engine.config());
    engine.with_store(|store| {
        pricer
            .price(store, card, &route, station, None, Utc::now(), false)
            .unwrap()
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Card-class discounts
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn elder_card_pays_half_of_a_two_dollar_fare() {
    let engine = engine();
    let (route, station) = seed_uniform(&engine, 2.0, 0.0);
    engine.with_store(|store| store.insert_card("C-ELDER", "", "elder", "active").unwrap());

    let result = price_for(&engine, "C-ELDER", route, station);
    assert_eq!(result.base_fare, 2.0);
    assert_eq!(result.actual_fare, 1.0);
    assert_eq!(result.discount_type, "elder_discount");
}

#[test]
fn disabled_card_rides_free_and_no_further_discounts_apply() {
    let engine = engine();
    let (route, station) = seed_uniform(&engine, 2.0, 0.0);
    engine.with_store(|store| {
        store.insert_card("C-DIS", "", "disabled", "active").unwrap();
        // A prior monthly total that would otherwise trigger a tier.
        store
            .increment_monthly(
                "C-DIS",
                &taptransit_core::aggregate::MonthlyAccumulator::month_key(Utc::now()),
                600.0,
            )
            .unwrap();
    });

    let result = price_for(&engine, "C-DIS", route, station);
    assert_eq!(result.actual_fare, 0.0);
    assert_eq!(result.discount_type, "disabled_discount");
}

#[test]
fn policy_row_overrides_the_default_card_discount() {
    let engine = engine();
    let (route, station) = seed_uniform(&engine, 4.0, 0.0);
    engine.with_store(|store| {
        store.insert_card("C-STU", "", "student", "active").unwrap();
        // Configured fixed amount beats the default 20% rate.
        store
            .insert_discount_policy("Student flat", "student", 0.0, 0.0, 1.5, "student")
            .unwrap();
    });

    let result = price_for(&engine, "C-STU", route, station);
    assert_eq!(result.actual_fare, 2.5);
    assert_eq!(result.discount_type, "student_discount");
}

#[test]
fn normal_card_gets_no_class_discount() {
    let engine = engine();
    let (route, station) = seed_uniform(&engine, 2.0, 0.0);
    engine.with_store(|store| store.insert_card("C-N", "", "normal", "active").unwrap());

    let result = price_for(&engine, "C-N", route, station);
    assert_eq!(result.actual_fare, 2.0);
    assert_eq!(result.discount_type, "");
}

// ─────────────────────────────────────────────────────────────────────────────
// Rounding and capping
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn actual_fare_is_always_floored_to_two_decimals() {
    let engine = engine();
    let (route, station) = seed_uniform(&engine, 1.99, 0.0);
    engine.with_store(|store| store.insert_card("C-STU2", "", "student", "active").unwrap());

    // 1.99 - 20% = 1.592 -> floors to 1.59, never 1.60.
    let result = price_for(&engine, "C-STU2", route, station);
    assert_eq!(result.actual_fare, 1.59);
    let cents = result.actual_fare * 100.0;
    assert!((cents - cents.round()).abs() < 1e-9, "fare {cents} is not whole cents");
}

#[test]
fn actual_fare_is_capped_at_the_route_ceiling() {
    let engine = engine();
    let (route, station) = seed_uniform(&engine, 5.0, 2.5);

    let result = price_for(&engine, "C-ANY", route, station);
    assert_eq!(result.base_fare, 5.0);
    assert_eq!(result.actual_fare, 2.5);
}

#[test]
fn uniform_fare_falls_back_to_ceiling_then_default() {
    let engine = engine();
    // No fare row at all; ceiling of 3.25 wins.
    let (with_ceiling, s1) = engine.with_store(|store| {
        let route = store
            .insert_route("F1", "Fallback A", "uniform", "single_tap", 3.25)
            .unwrap();
        let station = store.insert_station("FS1", "Fallback Stop").unwrap();
        store.insert_route_station(route, station, 1, None).unwrap();
        (route, station)
    });
    let result = price_for(&engine, "C-ANY", with_ceiling, s1);
    assert_eq!(result.actual_fare, 3.25);

    // No fare row and no ceiling; fixed default of 2.00.
    let (bare, s2) = engine.with_store(|store| {
        let route = store
            .insert_route("F2", "Fallback B", "uniform", "single_tap", 0.0)
            .unwrap();
        let station = store.insert_station("FS2", "Bare Stop").unwrap();
        store.insert_route_station(route, station, 1, None).unwrap();
        (route, station)
    });
    let result = price_for(&engine, "C-ANY", bare, s2);
    assert_eq!(result.actual_fare, 2.0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tiered (stop-count) pricing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn tiered_pricing_charges_extra_beyond_included_segments() {
    let engine = engine();
    let (route, origin, near, far) = engine.with_store(|store| {
        let route = store
            .insert_route("M1", "Metro 1", "segment", "tap_in_out", 0.0)
            .unwrap();
        let a = store.insert_station("M-A", "Alpha").unwrap();
        let b = store.insert_station("M-B", "Bravo").unwrap();
        let c = store.insert_station("M-C", "Charlie").unwrap();
        store.insert_route_station(route, a, 1, None).unwrap();
        store.insert_route_station(route, b, 4, None).unwrap();
        store.insert_route_station(route, c, 9, None).unwrap();
        // 3.00 covers 5 stops, 0.50 per extra stop.
        store.insert_fare(route, 0, 0, 3.0, "segment", 5, 0.5).unwrap();
        (route, a, b, c)
    });
    let row = route_row(&engine, route);
    let pricer = FarePricer::new(engine.config());

    // sequence 1 -> 4: 3 stops, inside the included count.
    let short = engine.with_store(|store| {
        pricer
            .price(store, "C-ANY", &row, origin, Some(near), Utc::now(), false)
            .unwrap()
    });
    assert_eq!(short.actual_fare, 3.0);

    // sequence 1 -> 9: 8 stops, 3 over -> 3.00 + 3 * 0.50.
    let long = engine.with_store(|store| {
        pricer
            .price(store, "C-ANY", &row, origin, Some(far), Utc::now(), false)
            .unwrap()
    });
    assert_eq!(long.actual_fare, 4.5);
}

#[test]
fn station_pair_fare_overrides_tiered_pricing() {
    let engine = engine();
    let (route, a, b) = engine.with_store(|store| {
        let route = store
            .insert_route("M2", "Metro 2", "segment", "tap_in_out", 0.0)
            .unwrap();
        let a = store.insert_station("P-A", "Pair A").unwrap();
        let b = store.insert_station("P-B", "Pair B").unwrap();
        store.insert_route_station(route, a, 1, None).unwrap();
        store.insert_route_station(route, b, 8, None).unwrap();
        store.insert_fare(route, 0, 0, 3.0, "segment", 5, 0.5).unwrap();
        store.insert_fare(route, a, b, 1.25, "segment", 0, 0.0).unwrap();
        (route, a, b)
    });
    let row = route_row(&engine, route);
    let pricer = FarePricer::new(engine.config());
    let result = engine.with_store(|store| {
        pricer
            .price(store, "C-ANY", &row, a, Some(b), Utc::now(), false)
            .unwrap()
    });
    assert_eq!(result.actual_fare, 1.25);
}

// ─────────────────────────────────────────────────────────────────────────────
// Monthly accumulation tiers — boundary cases
// ─────────────────────────────────────────────────────────────────────────────

fn priced_with_prior_total(prior: f64) -> f64 {
    let engine = engine();
    let (route, station) = seed_uniform(&engine, 3.0, 0.0);
    engine.with_store(|store| {
        store.insert_card("C-M", "", "normal", "active").unwrap();
        if prior > 0.0 {
            store
                .increment_monthly(
                    "C-M",
                    &taptransit_core::aggregate::MonthlyAccumulator::month_key(Utc::now()),
                    prior,
                )
                .unwrap();
        }
    });
    price_for(&engine, "C-M", route, station).actual_fare
}

#[test]
fn monthly_tier_boundaries() {
    // Prior + 3.00 fare lands exactly on / just under each threshold.
    assert_eq!(priced_with_prior_total(196.99), 3.0); // 199.99: below 200
    assert_eq!(priced_with_prior_total(197.00), 2.40); // 200.00: 20% off
    assert_eq!(priced_with_prior_total(496.99), 2.40); // 499.99: still 20%
    assert_eq!(priced_with_prior_total(497.00), 1.50); // 500.00: 50% off
}

#[test]
fn monthly_policy_rows_override_built_in_tiers() {
    let engine = engine();
    let (route, station) = seed_uniform(&engine, 3.0, 0.0);
    engine.with_store(|store| {
        store.insert_card("C-P", "", "normal", "active").unwrap();
        // A configured single tier at 100 with 10% off.
        store
            .insert_discount_policy("Loyalty", "monthly_accumulate", 100.0, 0.1, 0.0, "")
            .unwrap();
        store
            .increment_monthly(
                "C-P",
                &taptransit_core::aggregate::MonthlyAccumulator::month_key(Utc::now()),
                250.0,
            )
            .unwrap();
    });
    // Built-in 20% tier would fire at 200; the policy row wins.
    let result = price_for(&engine, "C-P", route, station);
    assert_eq!(result.actual_fare, 2.70);
    assert_eq!(result.discount_type, "monthly_discount");
}
