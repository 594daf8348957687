//! Administrative operations on task definitions.
//!
//! Consumed by an external HTTP layer; nothing here parses requests or
//! renders responses. Every mutation keeps the cron scheduler in step
//! with storage: create registers a trigger, patch re-registers it,
//! delete removes it.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domains::crawler::startup::register_definition;
use crate::domains::sources::{PlatformFactory, SourceType};
use crate::domains::tasks::models::{
    JobRecord, JobStatus, NewTaskDefinition, TaskDefinition, TaskDefinitionPatch,
};
use crate::domains::tasks::store::{JobStore, StoreError, TaskStore};
use crate::kernel::deps::ServerDeps;
use crate::kernel::helper_pool::{HelperPool, HelperService};
use crate::kernel::scheduler::{validate_schedule, CronScheduler};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("unknown source type: {0}")]
    UnknownSourceType(String),
    #[error("invalid cron schedule {schedule:?}: {reason}")]
    InvalidSchedule { schedule: String, reason: String },
    #[error("task definition {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AdminError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::DefinitionNotFound(id) => AdminError::NotFound(id),
            other => AdminError::Internal(other.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateTaskParams {
    pub source_type: String,
    pub schedule: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTaskParams {
    pub schedule: Option<String>,
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
}

/// Create a definition and register its cron trigger.
pub async fn create_task(
    deps: &Arc<ServerDeps>,
    factory: &Arc<dyn PlatformFactory>,
    scheduler: &CronScheduler,
    params: CreateTaskParams,
) -> Result<TaskDefinition, AdminError> {
    let source_type: SourceType = params
        .source_type
        .parse()
        .map_err(|_| AdminError::UnknownSourceType(params.source_type.clone()))?;
    check_schedule(&params.schedule)?;

    let definition = deps
        .tasks
        .add(NewTaskDefinition {
            source_type,
            schedule: params.schedule,
            include: params.include,
            exclude: params.exclude,
        })
        .await?;

    let handle = register_definition(deps, factory, scheduler, &definition).await?;
    let definition = deps
        .tasks
        .patch(
            definition.id,
            TaskDefinitionPatch {
                scheduler_handle: Some(Some(handle)),
                ..Default::default()
            },
        )
        .await?;

    info!(task_definition_id = %definition.id, source = %source_type, "task definition created");
    Ok(definition)
}

/// Patch a definition and swap its cron trigger for the new schedule.
pub async fn update_task(
    deps: &Arc<ServerDeps>,
    factory: &Arc<dyn PlatformFactory>,
    scheduler: &CronScheduler,
    id: Uuid,
    params: UpdateTaskParams,
) -> Result<TaskDefinition, AdminError> {
    if let Some(schedule) = &params.schedule {
        check_schedule(schedule)?;
    }
    let existing = deps.tasks.get(id).await?;
    deregister(scheduler, &existing).await;

    let definition = deps
        .tasks
        .patch(
            id,
            TaskDefinitionPatch {
                schedule: params.schedule,
                include: params.include,
                exclude: params.exclude,
                scheduler_handle: Some(None),
            },
        )
        .await?;

    let handle = register_definition(deps, factory, scheduler, &definition).await?;
    let definition = deps
        .tasks
        .patch(
            id,
            TaskDefinitionPatch {
                scheduler_handle: Some(Some(handle)),
                ..Default::default()
            },
        )
        .await?;

    info!(task_definition_id = %id, "task definition updated");
    Ok(definition)
}

/// Delete a definition and remove its cron trigger. Job records survive
/// as history.
pub async fn remove_task(
    deps: &Arc<ServerDeps>,
    scheduler: &CronScheduler,
    id: Uuid,
) -> Result<(), AdminError> {
    let definition = deps.tasks.get(id).await?;
    deregister(scheduler, &definition).await;
    deps.tasks.delete(id).await?;
    info!(task_definition_id = %id, "task definition removed");
    Ok(())
}

pub async fn list_tasks(deps: &Arc<ServerDeps>) -> Result<Vec<TaskDefinition>, AdminError> {
    Ok(deps.tasks.list().await?)
}

/// Job records in a given status, for operational visibility (running
/// crawls, recent failures).
pub async fn list_jobs(
    deps: &Arc<ServerDeps>,
    status: JobStatus,
) -> Result<Vec<JobRecord>, AdminError> {
    Ok(deps.jobs.find_by_status(status).await?)
}

/// Put a registered helper service back into rotation after an operator
/// has fixed it.
pub async fn reactivate_helper(deps: &Arc<ServerDeps>, id: Uuid) -> Result<(), AdminError> {
    let pool = helper_pool(deps)?;
    pool.reactivate(id)
        .await
        .map_err(|error| AdminError::Internal(error.into()))?;
    info!(helper_id = %id, "helper service reactivated");
    Ok(())
}

pub async fn register_helper(
    deps: &Arc<ServerDeps>,
    url: &str,
) -> Result<HelperService, AdminError> {
    let pool = helper_pool(deps)?;
    let helper = pool
        .register(url)
        .await
        .map_err(|error| AdminError::Internal(error.into()))?;
    info!(helper_id = %helper.id, url = %url, "helper service registered");
    Ok(helper)
}

pub async fn list_helpers(deps: &Arc<ServerDeps>) -> Result<Vec<HelperService>, AdminError> {
    let pool = helper_pool(deps)?;
    pool.list()
        .await
        .map_err(|error| AdminError::Internal(error.into()))
}

fn helper_pool(deps: &Arc<ServerDeps>) -> Result<&HelperPool, AdminError> {
    deps.helper_pool
        .as_deref()
        .ok_or_else(|| AdminError::Internal(anyhow::anyhow!("helper pool is not configured")))
}

fn check_schedule(schedule: &str) -> Result<(), AdminError> {
    validate_schedule(schedule).map_err(|error| AdminError::InvalidSchedule {
        schedule: schedule.to_string(),
        reason: error.to_string(),
    })
}

async fn deregister(scheduler: &CronScheduler, definition: &TaskDefinition) {
    if let Some(handle) = definition.scheduler_handle {
        // A stale handle (scheduler restarted since registration) is not
        // worth failing the mutation over.
        if let Err(error) = scheduler.remove_job(handle).await {
            warn!(
                task_definition_id = %definition.id,
                handle = %handle,
                error = %error,
                "failed to remove cron trigger"
            );
        }
    }
}
