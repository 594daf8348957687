//! Crawl execution: the incremental paging algorithm, the per-run
//! orchestrator, the synchronous trigger API, and startup resume.

pub mod incremental;
pub mod orchestrator;
pub mod startup;
pub mod trigger;
