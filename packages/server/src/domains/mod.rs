// Business domains
pub mod content;
pub mod crawler;
pub mod sources;
pub mod tasks;
