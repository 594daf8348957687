// Common utilities shared across the application

pub mod id;

pub use id::db_id;
