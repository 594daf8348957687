//! Task definitions and job records.

pub mod admin;
pub mod filter;
pub mod models;
pub mod store;
pub mod testing;
