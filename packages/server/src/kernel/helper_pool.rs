//! Pool of request-proxying helper services.
//!
//! Some upstreams sign requests in ways we cannot reproduce locally, so
//! fetches for those sources are routed through registered helper services.
//! The pool tracks usage and failures per helper and acts as a light
//! circuit breaker: selection always prefers the least-used available
//! helper, and a helper that proves compromised is flipped unavailable
//! until an operator re-activates it.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::common::db_id;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct HelperService {
    pub id: Uuid,
    pub url: String,
    pub used_count: i64,
    pub failed_count: i64,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum HelperPoolError {
    #[error("no available helper service")]
    NoneAvailable,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct HelperPool {
    pool: PgPool,
}

impl HelperPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pick the least-used available helper and count the use.
    pub async fn select(&self) -> Result<HelperService, HelperPoolError> {
        let helper = sqlx::query_as::<_, HelperService>(
            r#"
            UPDATE helper_services
            SET used_count = used_count + 1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM helper_services
                WHERE available
                ORDER BY used_count ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HelperPoolError::NoneAvailable)?;
        Ok(helper)
    }

    /// Count a failed request against a helper without benching it.
    pub async fn mark_failed(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE helper_services SET failed_count = failed_count + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bench a helper that is itself broken (not the upstream).
    pub async fn mark_unavailable(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE helper_services
            SET available = FALSE, failed_count = failed_count + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Operator action: put a benched helper back into rotation.
    pub async fn reactivate(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE helper_services SET available = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn register(&self, url: &str) -> Result<HelperService, sqlx::Error> {
        let helper = sqlx::query_as::<_, HelperService>(
            r#"
            INSERT INTO helper_services (id, url, used_count, failed_count, available, created_at, updated_at)
            VALUES ($1, $2, 0, 0, TRUE, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(db_id())
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(helper)
    }

    pub async fn list(&self) -> Result<Vec<HelperService>, sqlx::Error> {
        sqlx::query_as::<_, HelperService>(
            "SELECT * FROM helper_services ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
    }
}
