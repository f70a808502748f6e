//! fare-runner: headless demo runner for the TapTransit fare engine.
//!
//! Usage:
//!   fare-runner --db fares.db
//!   fare-runner --db fares.db --batch records.json
//!   fare-runner --config engine.json --sweep
//!
//! With no --batch file it seeds a small demo network and ingests a
//! demo batch so a fresh database has something to show.

use anyhow::{Context, Result};
use chrono::Utc;
use std::env;
use std::path::Path;
use taptransit_core::{
    config::EngineConfig,
    engine::FareEngine,
    record::BatchRecord,
};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = str_arg(&args, "--db").unwrap_or(":memory:");
    let batch_path = str_arg(&args, "--batch");
    let config_path = str_arg(&args, "--config");
    let run_sweep = args.iter().any(|a| a == "--sweep");

    let config = match config_path {
        Some(path) => EngineConfig::from_file(Path::new(path))
            .with_context(|| format!("loading config from {path}"))?,
        None => EngineConfig::default(),
    };

    println!("TapTransit — fare-runner");
    println!("  db:     {db}");
    println!("  batch:  {}", batch_path.unwrap_or("(built-in demo)"));
    println!();

    let engine = FareEngine::open(db, config)?;

    let records: Vec<BatchRecord> = match batch_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading batch file {path}"))?;
            serde_json::from_str(&raw).context("parsing batch file")?
        }
        None => {
            seed_demo_network(&engine)?;
            engine.refresh_cache()?;
            demo_batch()
        }
    };

    let summary = engine.ingest_batch(&records);
    println!("batch: {}/{} records processed", summary.accepted, summary.total);

    if run_sweep {
        let closed = engine.sweep_penalties(Utc::now())?;
        println!("penalty sweep: {closed} stale trips closed");
    }

    print_trips(&engine)?;
    Ok(())
}

/// A two-route demo network: a flat-fare bus line and a tiered-fare
/// metro line with a transfer rule between them.
fn seed_demo_network(engine: &FareEngine) -> Result<()> {
    engine.with_store(|store| -> Result<()> {
        if !store.all_active_routes()?.is_empty() {
            return Ok(()); // already seeded
        }
        let bus = store.insert_route("B7", "Bus 7", "uniform", "single_tap", 4.0)?;
        let metro = store.insert_route("M1", "Metro 1", "segment", "tap_in_out", 9.0)?;

        let plaza = store.insert_station("ST-01", "Central Plaza")?;
        let harbor = store.insert_station("ST-02", "Harbor Square")?;
        let museum = store.insert_station("ST-03", "Museum Gate")?;
        let airport = store.insert_station("ST-04", "Airport West")?;

        store.insert_route_station(bus, plaza, 1, None)?;
        store.insert_route_station(bus, harbor, 2, None)?;
        store.insert_route_station(metro, harbor, 1, None)?;
        store.insert_route_station(metro, museum, 4, None)?;
        store.insert_route_station(metro, airport, 9, None)?;

        store.insert_fare(bus, 0, 0, 2.0, "uniform", 0, 0.0)?;
        store.insert_fare(metro, 0, 0, 3.0, "segment", 5, 0.5)?;

        // Alight Bus 7 at Harbor Square, board Metro 1 there within
        // 45 minutes: 1.50 off.
        store.insert_transfer_rule(bus, harbor, metro, harbor, 1.5, 0.0, 45)?;

        store.insert_discount_policy("Student fare", "student", 0.0, 0.2, 0.0, "student")?;
        store.insert_card("CARD-STU-01", "Demo Student", "student", "active")?;
        Ok(())
    })?;
    log::info!("demo network seeded");
    Ok(())
}

fn demo_batch() -> Vec<BatchRecord> {
    let now = Utc::now();
    let raw = serde_json::json!([
        {
            "record_id": "demo-001",
            "card_id": "CARD-STU-01",
            "board_time": now.timestamp() - 3600,
            "board_station": "Central Plaza",
            "gateway_id": "GW-BUS-7"
        },
        {
            "record_id": "demo-002",
            "card_id": "CARD-STU-01",
            "board_time": now.timestamp() - 3000,
            "board_station": "Harbor Square",
            "alight_time": now.timestamp() - 1800,
            "alight_station": "Airport West",
            "gateway_id": "GW-M1"
        },
        {
            "record_id": "demo-003",
            "card_id": "CARD-74F2",
            "board_time": now.timestamp() - 600,
            "board_station": "ST-02",
            "gateway_id": "GW-M1"
        }
    ]);
    serde_json::from_value(raw).expect("demo batch is well-formed")
}

fn print_trips(engine: &FareEngine) -> Result<()> {
    let page = engine.trips(None, 1, 20)?;
    println!();
    println!("trips ({} total):", page.total);
    for trip in &page.trips {
        let end = if trip.end_station_name.is_empty() {
            "?"
        } else {
            trip.end_station_name.as_str()
        };
        println!(
            "  {:<12} {:<10} {} -> {:<14} base {:>5.2}  actual {:>5.2}  [{}]{}",
            trip.record_id,
            trip.card_id,
            trip.start_station_name,
            end,
            trip.fare,
            trip.actual_fare,
            trip.status.as_str(),
            if trip.penalty_fare { " PENALTY" } else { "" },
        );
    }
    Ok(())
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
