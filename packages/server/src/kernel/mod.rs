//! Kernel module - infrastructure shared by all domains.

pub mod credentials;
pub mod deps;
pub mod helper_pool;
pub mod notify;
pub mod rate_limit;
pub mod request;
pub mod scheduler;

pub use deps::ServerDeps;
pub use scheduler::CronScheduler;
