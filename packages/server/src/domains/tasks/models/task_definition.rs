//! Task definitions: the persisted description of a recurring crawl.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domains::sources::SourceType;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize, serde::Deserialize)]
pub struct TaskDefinition {
    pub id: Uuid,
    pub source_type: SourceType,
    /// Cron expression driving the trigger.
    pub schedule: String,
    /// Entity ids to crawl; empty or `["*"]` means the whole universe.
    pub include: Vec<String>,
    /// Entity ids never crawled, even when included.
    pub exclude: Vec<String>,
    /// Handle of the registered cron job, written back after registration
    /// so a later patch or delete can deregister the trigger.
    pub scheduler_handle: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTaskDefinition {
    pub source_type: SourceType,
    pub schedule: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl NewTaskDefinition {
    /// Drop empty-string filter members before they reach storage.
    pub fn normalized(mut self) -> Self {
        self.include.retain(|s| !s.is_empty());
        self.exclude.retain(|s| !s.is_empty());
        self
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskDefinitionPatch {
    pub schedule: Option<String>,
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    /// `Some(None)` clears the handle, `Some(Some(h))` sets it.
    pub scheduler_handle: Option<Option<Uuid>>,
}

impl TaskDefinitionPatch {
    pub fn apply(self, definition: &mut TaskDefinition) {
        if let Some(schedule) = self.schedule {
            definition.schedule = schedule;
        }
        if let Some(mut include) = self.include {
            include.retain(|s| !s.is_empty());
            definition.include = include;
        }
        if let Some(mut exclude) = self.exclude {
            exclude.retain(|s| !s.is_empty());
            definition.exclude = exclude;
        }
        if let Some(handle) = self.scheduler_handle {
            definition.scheduler_handle = handle;
        }
        definition.updated_at = Utc::now();
    }
}
