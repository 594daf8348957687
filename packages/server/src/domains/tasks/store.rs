//! Task and job persistence.
//!
//! Trait seams so orchestration logic runs against in-memory doubles in
//! tests; the Postgres implementations are the production wiring.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::common::db_id;
use crate::domains::tasks::models::{
    JobRecord, JobStatus, NewTaskDefinition, TaskDefinition, TaskDefinitionPatch,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task definition {0} not found")]
    DefinitionNotFound(Uuid),
    #[error("job record {0} not found")]
    JobNotFound(Uuid),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn add(&self, new: NewTaskDefinition) -> Result<TaskDefinition, StoreError>;
    async fn patch(
        &self,
        id: Uuid,
        patch: TaskDefinitionPatch,
    ) -> Result<TaskDefinition, StoreError>;
    async fn get(&self, id: Uuid) -> Result<TaskDefinition, StoreError>;
    async fn list(&self) -> Result<Vec<TaskDefinition>, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// The running job for a definition, if any.
    async fn check_running(&self, task_definition_id: Uuid)
        -> Result<Option<JobRecord>, StoreError>;
    /// Create a record in `running` status. `id` is generated when absent.
    async fn create(
        &self,
        id: Option<Uuid>,
        task_definition_id: Uuid,
    ) -> Result<JobRecord, StoreError>;
    async fn update_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError>;
    /// Persist the last fully processed entity id.
    async fn record_cursor(&self, job_id: Uuid, entity_id: &str) -> Result<(), StoreError>;
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, StoreError>;
}

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn add(&self, new: NewTaskDefinition) -> Result<TaskDefinition, StoreError> {
        let new = new.normalized();
        let definition = sqlx::query_as::<_, TaskDefinition>(
            r#"
            INSERT INTO task_definitions
                (id, source_type, schedule, include, exclude, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(db_id())
        .bind(new.source_type)
        .bind(&new.schedule)
        .bind(&new.include)
        .bind(&new.exclude)
        .fetch_one(&self.pool)
        .await?;
        Ok(definition)
    }

    async fn patch(
        &self,
        id: Uuid,
        patch: TaskDefinitionPatch,
    ) -> Result<TaskDefinition, StoreError> {
        let mut definition = self.get(id).await?;
        patch.apply(&mut definition);
        let updated = sqlx::query_as::<_, TaskDefinition>(
            r#"
            UPDATE task_definitions
            SET schedule = $2, include = $3, exclude = $4,
                scheduler_handle = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&definition.schedule)
        .bind(&definition.include)
        .bind(&definition.exclude)
        .bind(definition.scheduler_handle)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::DefinitionNotFound(id))?;
        Ok(updated)
    }

    async fn get(&self, id: Uuid) -> Result<TaskDefinition, StoreError> {
        sqlx::query_as::<_, TaskDefinition>("SELECT * FROM task_definitions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::DefinitionNotFound(id))
    }

    async fn list(&self) -> Result<Vec<TaskDefinition>, StoreError> {
        let definitions = sqlx::query_as::<_, TaskDefinition>(
            "SELECT * FROM task_definitions ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(definitions)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM task_definitions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DefinitionNotFound(id));
        }
        Ok(())
    }
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn check_running(
        &self,
        task_definition_id: Uuid,
    ) -> Result<Option<JobRecord>, StoreError> {
        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM job_records
            WHERE task_definition_id = $1 AND status = 'running'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(task_definition_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn create(
        &self,
        id: Option<Uuid>,
        task_definition_id: Uuid,
    ) -> Result<JobRecord, StoreError> {
        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            INSERT INTO job_records (id, task_definition_id, status, created_at, updated_at)
            VALUES ($1, $2, 'running', NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(id.unwrap_or_else(db_id))
        .bind(task_definition_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn update_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE job_records SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(job_id)
                .bind(status)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn record_cursor(&self, job_id: Uuid, entity_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE job_records SET resume_cursor = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .bind(entity_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, StoreError> {
        let records = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM job_records WHERE status = $1 ORDER BY created_at ASC",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
