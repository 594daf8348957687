//! Content storage seam.
//!
//! The orchestration engine only needs three things from content storage:
//! the entity universe per source (who are we subscribed to), the newest
//! known publish time per entity and category (the crawl baseline), and an
//! idempotent item upsert. Feed rendering reads the same tables but lives
//! outside this crate.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domains::sources::SourceType;

/// One crawled item, ready to persist.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContentItem {
    /// Upstream id, unique within (source, category).
    pub id: String,
    pub published_at: DateTime<Utc>,
    /// Raw upstream payload; rendering happens elsewhere.
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// All subscribed entity ids for a source.
    async fn list_entities(&self, source: SourceType) -> Result<Vec<String>>;

    /// Publish time of the newest stored item, the crawl baseline.
    /// None means nothing stored yet.
    async fn latest_known_time(
        &self,
        source: SourceType,
        entity: &str,
        category: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Insert or overwrite by upstream id. Re-crawling a window must be
    /// safe to repeat.
    async fn upsert_item(
        &self,
        source: SourceType,
        entity: &str,
        category: &str,
        item: &ContentItem,
    ) -> Result<()>;
}

pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn list_entities(&self, source: SourceType) -> Result<Vec<String>> {
        let entities = sqlx::query_scalar::<_, String>(
            "SELECT entity_id FROM subscriptions WHERE source_type = $1 ORDER BY entity_id ASC",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        Ok(entities)
    }

    async fn latest_known_time(
        &self,
        source: SourceType,
        entity: &str,
        category: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let latest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(published_at) FROM content_items
            WHERE source_type = $1 AND entity_id = $2 AND category = $3
            "#,
        )
        .bind(source)
        .bind(entity)
        .bind(category)
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }

    async fn upsert_item(
        &self,
        source: SourceType,
        entity: &str,
        category: &str,
        item: &ContentItem,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_items
                (source_type, entity_id, category, item_id, published_at, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (source_type, category, item_id)
            DO UPDATE SET published_at = $5, payload = $6, updated_at = NOW()
            "#,
        )
        .bind(source)
        .bind(entity)
        .bind(category)
        .bind(&item.id)
        .bind(item.published_at)
        .bind(&item.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

type ItemKey = (SourceType, String, String);

/// In-memory content store for tests.
pub struct InMemoryContentStore {
    entities: RwLock<HashMap<SourceType, Vec<String>>>,
    items: RwLock<HashMap<ItemKey, BTreeMap<String, ContentItem>>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_entity(&self, source: SourceType, entity: &str) {
        self.entities
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(source)
            .or_default()
            .push(entity.to_string());
    }

    /// Seed an already-known item, establishing a baseline.
    pub fn seed_item(&self, source: SourceType, entity: &str, category: &str, item: ContentItem) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry((source, entity.to_string(), category.to_string()))
            .or_default()
            .insert(item.id.clone(), item);
    }

    pub fn items_for(&self, source: SourceType, entity: &str, category: &str) -> Vec<ContentItem> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(source, entity.to_string(), category.to_string()))
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn list_entities(&self, source: SourceType) -> Result<Vec<String>> {
        let mut entities = self
            .entities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&source)
            .cloned()
            .unwrap_or_default();
        entities.sort();
        Ok(entities)
    }

    async fn latest_known_time(
        &self,
        source: SourceType,
        entity: &str,
        category: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(source, entity.to_string(), category.to_string()))
            .and_then(|items| items.values().map(|i| i.published_at).max()))
    }

    async fn upsert_item(
        &self,
        source: SourceType,
        entity: &str,
        category: &str,
        item: &ContentItem,
    ) -> Result<()> {
        self.seed_item(source, entity, category, item.clone());
        Ok(())
    }
}
