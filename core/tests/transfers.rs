//! Integration tests for the transfer-discount matcher: rule lookup,
//! the time window boundary, and amount-over-rate priority.

use chrono::{Duration, Utc};
use taptransit_core::{
    config::EngineConfig,
    engine::FareEngine,
    store::NewTrip,
    transfer::TransferMatcher,
    types::TripStatus,
};

struct Net {
    bus: i64,
    metro: i64,
    interchange: i64,
    downtown: i64,
}

/// Bus route ending at an interchange, metro route boarding there,
/// with a transfer rule between them (2.00 off, 30-minute window).
fn seed(engine: &FareEngine) -> Net {
    engine.with_store(|store| {
        let bus = store
            .insert_route("B1", "Bus 1", "uniform", "tap_in_out", 0.0)
            .unwrap();
        let metro = store
            .insert_route("M1", "Metro 1", "uniform", "single_tap", 0.0)
            .unwrap();
        let downtown = store.insert_station("T-DT", "Downtown").unwrap();
        let interchange = store.insert_station("T-IX", "Interchange").unwrap();
        store.insert_route_station(bus, downtown, 1, None).unwrap();
        store.insert_route_station(bus, interchange, 5, None).unwrap();
        store.insert_route_station(metro, interchange, 1, None).unwrap();
        store.insert_fare(bus, 0, 0, 2.0, "uniform", 0, 0.0).unwrap();
        store.insert_fare(metro, 0, 0, 3.0, "uniform", 0, 0.0).unwrap();
        store
            .insert_transfer_rule(bus, interchange, metro, interchange, 2.0, 0.0, 30)
            .unwrap();
        Net {
            bus,
            metro,
            interchange,
            downtown,
        }
    })
}

/// A completed bus trip alighting at the interchange at `alight_time`.
fn prior_trip(engine: &FareEngine, net: &Net, card: &str, alight_time: chrono::DateTime<Utc>) {
    engine.with_store(|store| {
        store
            .insert_trip(&NewTrip {
                record_id: format!("prior-{card}"),
                card_id: card.to_string(),
                route_id: net.bus,
                start_station: net.downtown,
                end_station: Some(net.interchange),
                start_station_name: "Downtown".into(),
                end_station_name: "Interchange".into(),
                board_time: alight_time - Duration::minutes(20),
                alight_time: Some(alight_time),
                fare: 2.0,
                actual_fare: 2.0,
                discount_type: String::new(),
                discount_amount: 0.0,
                penalty_fare: false,
                status: TripStatus::Completed,
                gateway_id: String::new(),
            })
            .unwrap();
    });
}

fn discount_at(engine: &FareEngine, net: &Net, card: &str, board: chrono::DateTime<Utc>) -> f64 {
    engine.with_store(|store| {
        TransferMatcher::match_discount(store, card, net.metro, net.interchange, board, 3.0)
            .unwrap()
    })
}

#[test]
fn transfer_inside_the_window_earns_the_fixed_discount() {
    let engine = FareEngine::in_memory(EngineConfig::default()).unwrap();
    let net = seed(&engine);
    let alight = Utc::now() - Duration::hours(1);
    prior_trip(&engine, &net, "C-T1", alight);

    let amount = discount_at(&engine, &net, "C-T1", alight + Duration::minutes(10));
    assert_eq!(amount, 2.0);
}

#[test]
fn window_boundary_is_inclusive_and_one_minute_late_is_rejected() {
    let engine = FareEngine::in_memory(EngineConfig::default()).unwrap();
    let net = seed(&engine);
    let alight = Utc::now() - Duration::hours(2);
    prior_trip(&engine, &net, "C-T2", alight);

    // Exactly at the 30-minute window: still eligible.
    assert_eq!(discount_at(&engine, &net, "C-T2", alight + Duration::minutes(30)), 2.0);
    // One minute past: no discount.
    assert_eq!(discount_at(&engine, &net, "C-T2", alight + Duration::minutes(31)), 0.0);
}

#[test]
fn no_rule_for_the_boarding_means_no_discount() {
    let engine = FareEngine::in_memory(EngineConfig::default()).unwrap();
    let net = seed(&engine);
    let alight = Utc::now() - Duration::minutes(30);
    prior_trip(&engine, &net, "C-T3", alight);

    // Boarding the bus (not the metro) at the interchange: rule keys
    // on (to-route, to-station), so nothing matches.
    let amount = engine.with_store(|store| {
        TransferMatcher::match_discount(
            store,
            "C-T3",
            net.bus,
            net.interchange,
            alight + Duration::minutes(5),
            3.0,
        )
        .unwrap()
    });
    assert_eq!(amount, 0.0);
}

#[test]
fn rate_applies_when_no_fixed_amount_is_configured() {
    let engine = FareEngine::in_memory(EngineConfig::default()).unwrap();
    let net = seed(&engine);
    // A second rule from metro back to the bus with a 50% rate.
    engine.with_store(|store| {
        store
            .insert_transfer_rule(net.metro, net.interchange, net.bus, net.interchange, 0.0, 0.5, 30)
            .unwrap();
        store
            .insert_trip(&NewTrip {
                record_id: "prior-metro".into(),
                card_id: "C-T4".into(),
                route_id: net.metro,
                start_station: net.interchange,
                end_station: Some(net.interchange),
                start_station_name: "Interchange".into(),
                end_station_name: "Interchange".into(),
                board_time: Utc::now() - Duration::minutes(25),
                alight_time: Some(Utc::now() - Duration::minutes(10)),
                fare: 3.0,
                actual_fare: 3.0,
                discount_type: String::new(),
                discount_amount: 0.0,
                penalty_fare: false,
                status: TripStatus::Completed,
                gateway_id: String::new(),
            })
            .unwrap();
    });

    let amount = engine.with_store(|store| {
        TransferMatcher::match_discount(store, "C-T4", net.bus, net.interchange, Utc::now(), 3.0)
            .unwrap()
    });
    assert_eq!(amount, 1.5);
}

#[test]
fn card_with_no_completed_trips_gets_no_discount() {
    let engine = FareEngine::in_memory(EngineConfig::default()).unwrap();
    let net = seed(&engine);
    assert_eq!(discount_at(&engine, &net, "C-NEW", Utc::now()), 0.0);
}
