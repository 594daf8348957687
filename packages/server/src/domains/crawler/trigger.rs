//! Synchronous crawl trigger.
//!
//! Used by the administrative surface: start a crawl for a definition and
//! wait (bounded) for the start handshake, so the caller gets the fresh
//! job record or a precise refusal instead of fire-and-forget.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::domains::crawler::orchestrator::{CrawlOrchestrator, StartSignal};
use crate::domains::sources::PlatformFactory;
use crate::domains::tasks::models::JobRecord;
use crate::domains::tasks::store::{StoreError, TaskStore};
use crate::kernel::deps::ServerDeps;

/// How long a caller waits for the orchestrator to accept or refuse.
pub const START_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StartJobError {
    #[error("task definition {0} not found")]
    NotFound(Uuid),
    #[error("a job for this definition is already running: {0}")]
    AlreadyRunning(Uuid),
    #[error("timed out waiting for the crawl to start")]
    Timeout,
    #[error("crawl refused to start: {0}")]
    Rejected(String),
}

/// Start a crawl for the definition and wait for the handshake.
pub async fn start_job(
    deps: &Arc<ServerDeps>,
    factory: &dyn PlatformFactory,
    task_definition_id: Uuid,
) -> Result<JobRecord, StartJobError> {
    let definition = match deps.tasks.get(task_definition_id).await {
        Ok(definition) => definition,
        Err(StoreError::DefinitionNotFound(id)) => return Err(StartJobError::NotFound(id)),
        Err(error) => return Err(StartJobError::Rejected(error.to_string())),
    };

    let platform = factory.platform(definition.source_type);
    let (receipt, _handle) =
        CrawlOrchestrator::new(deps.clone(), platform, definition).spawn();

    match receipt.wait(START_TIMEOUT).await {
        Some(StartSignal::Accepted(record)) => {
            info!(job_id = %record.id, "crawl started on demand");
            Ok(record)
        }
        Some(StartSignal::AlreadyRunning { job_id }) => Err(StartJobError::AlreadyRunning(job_id)),
        Some(StartSignal::Failed(reason)) => Err(StartJobError::Rejected(reason)),
        Some(StartSignal::Resumed { .. }) => {
            // Fresh runs never signal a resume.
            Err(StartJobError::Rejected("unexpected resume signal".to_string()))
        }
        None => Err(StartJobError::Timeout),
    }
}
