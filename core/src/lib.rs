//! TapTransit fare computation & reconciliation engine.
//!
//! Gateway batches flow in through [`engine::FareEngine::ingest_batch`],
//! which drives the trip ledger. Completed trips are priced by the fare
//! pricer (base fare by pricing mode, then the ordered discount stack)
//! and accumulated into per-card monthly totals. A background sweep
//! closes trips whose riders never tapped out at the penalty fare.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod penalty;
pub mod pricer;
pub mod record;
pub mod store;
pub mod transfer;
pub mod types;
