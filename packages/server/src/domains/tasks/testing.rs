//! In-memory store doubles for orchestration tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::common::db_id;
use crate::domains::tasks::models::{
    JobRecord, JobStatus, NewTaskDefinition, TaskDefinition, TaskDefinitionPatch,
};
use crate::domains::tasks::store::{JobStore, StoreError, TaskStore};

pub struct InMemoryTaskStore {
    inner: RwLock<HashMap<Uuid, TaskDefinition>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn add(&self, new: NewTaskDefinition) -> Result<TaskDefinition, StoreError> {
        let new = new.normalized();
        let now = Utc::now();
        let definition = TaskDefinition {
            id: db_id(),
            source_type: new.source_type,
            schedule: new.schedule,
            include: new.include,
            exclude: new.exclude,
            scheduler_handle: None,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(definition.id, definition.clone());
        Ok(definition)
    }

    async fn patch(
        &self,
        id: Uuid,
        patch: TaskDefinitionPatch,
    ) -> Result<TaskDefinition, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let definition = inner
            .get_mut(&id)
            .ok_or(StoreError::DefinitionNotFound(id))?;
        patch.apply(definition);
        Ok(definition.clone())
    }

    async fn get(&self, id: Uuid) -> Result<TaskDefinition, StoreError> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or(StoreError::DefinitionNotFound(id))
    }

    async fn list(&self) -> Result<Vec<TaskDefinition>, StoreError> {
        let mut definitions: Vec<TaskDefinition> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        definitions.sort_by_key(|d| d.created_at);
        Ok(definitions)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::DefinitionNotFound(id))
    }
}

pub struct InMemoryJobStore {
    records: RwLock<HashMap<Uuid, JobRecord>>,
    /// Every cursor write in order, for monotonicity assertions.
    cursor_log: RwLock<Vec<(Uuid, String)>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            cursor_log: RwLock::new(Vec::new()),
        }
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .cloned()
    }

    /// Cursor values written for a job, in write order.
    pub fn cursor_history(&self, job_id: Uuid) -> Vec<String> {
        self.cursor_log
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, entity)| entity.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Seed a record directly, for startup-resume scenarios.
    pub fn insert(&self, record: JobRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id, record);
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn check_running(
        &self,
        task_definition_id: Uuid,
    ) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|r| r.task_definition_id == task_definition_id && r.status == JobStatus::Running)
            .cloned())
    }

    async fn create(
        &self,
        id: Option<Uuid>,
        task_definition_id: Uuid,
    ) -> Result<JobRecord, StoreError> {
        let now = Utc::now();
        let record = JobRecord {
            id: id.unwrap_or_else(db_id),
            task_definition_id,
            status: JobStatus::Running,
            cursor: None,
            created_at: now,
            updated_at: now,
        };
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn record_cursor(&self, job_id: Uuid, entity_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        record.cursor = Some(entity_id.to_string());
        record.updated_at = Utc::now();
        drop(records);
        self.cursor_log
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((job_id, entity_id.to_string()));
        Ok(())
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, StoreError> {
        let mut records: Vec<JobRecord> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
