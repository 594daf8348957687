// Feedmill - feed crawl orchestration
//
// This crate is the engine behind scheduled content crawls: persisted task
// definitions bound to cron triggers, job records with resume cursors, a
// rate-limited resilient request layer, and per-source crawl sessions that
// pull new items down to the last known baseline.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::Config;
