//! Per-source credentials (cookies, bearer tokens).
//!
//! Each source type has at most one credential on file. When an upstream
//! rejects a credential mid-crawl the orchestrator deletes it here, so the
//! next run fails fast at session open instead of burning rate-gate slots.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::domains::sources::SourceType;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize, serde::Deserialize)]
pub struct Credential {
    pub source_type: SourceType,
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, source: SourceType) -> Result<Option<Credential>>;
    async fn put(
        &self,
        source: SourceType,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn delete(&self, source: SourceType) -> Result<()>;
    /// Whether the stored credential expires inside the given window.
    /// Missing credentials and credentials without an expiry report false.
    async fn expires_within(&self, source: SourceType, window: Duration) -> Result<bool>;
}

pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn get(&self, source: SourceType) -> Result<Option<Credential>> {
        let credential = sqlx::query_as::<_, Credential>(
            "SELECT * FROM credentials WHERE source_type = $1",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credential)
    }

    async fn put(
        &self,
        source: SourceType,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credentials (source_type, value, expires_at, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (source_type)
            DO UPDATE SET value = $2, expires_at = $3, updated_at = NOW()
            "#,
        )
        .bind(source)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, source: SourceType) -> Result<()> {
        sqlx::query("DELETE FROM credentials WHERE source_type = $1")
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn expires_within(&self, source: SourceType, window: Duration) -> Result<bool> {
        let deadline = Utc::now() + window;
        let expiring = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM credentials
                WHERE source_type = $1 AND expires_at IS NOT NULL AND expires_at <= $2
            )
            "#,
        )
        .bind(source)
        .bind(deadline)
        .fetch_one(&self.pool)
        .await?;
        Ok(expiring)
    }
}

/// In-memory credential store for tests.
pub struct InMemoryCredentialStore {
    inner: RwLock<HashMap<SourceType, Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn contains(&self, source: SourceType) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&source)
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, source: SourceType) -> Result<Option<Credential>> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&source)
            .cloned())
    }

    async fn put(
        &self,
        source: SourceType,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.inner.write().unwrap_or_else(|e| e.into_inner()).insert(
            source,
            Credential {
                source_type: source,
                value: value.to_string(),
                expires_at,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, source: SourceType) -> Result<()> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&source);
        Ok(())
    }

    async fn expires_within(&self, source: SourceType, window: Duration) -> Result<bool> {
        let deadline = Utc::now() + window;
        Ok(self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&source)
            .and_then(|c| c.expires_at)
            .map(|at| at <= deadline)
            .unwrap_or(false))
    }
}
