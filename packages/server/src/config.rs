use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Optional webhook for operator notifications (credential expiry,
    /// end-of-run failures). When unset, notifications are logged only.
    pub notify_webhook_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok(),
        })
    }
}
