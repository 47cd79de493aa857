//! Whale-activity detection pipeline core.
//!
//! Exposes every core module so binaries and integration tests can
//! drive the pipeline through its public API. Venue HTTP surfaces,
//! notification channels and durable storage remain out of scope; the
//! traits in [`sinks`] are the seams external collaborators plug into.

pub mod cluster;
pub mod config;
pub mod consolidator;
pub mod detectors;
pub mod digest;
pub mod errors;
pub mod ingestion;
pub mod market_cache;
pub mod market_stats;
pub mod models;
pub mod pipeline;
pub mod sinks;
pub mod venues;
pub mod wallet_store;
