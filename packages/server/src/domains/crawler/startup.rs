//! Boot-time work: cron registration for every definition and resume of
//! jobs the previous process left `running`.
//!
//! Resume runs before the scheduler starts, so a resumed run and the
//! first scheduled fire cannot race.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domains::crawler::orchestrator::{CrawlOrchestrator, Resume, StartSignal};
use crate::domains::crawler::trigger::START_TIMEOUT;
use crate::domains::sources::{PlatformFactory, SourceType};
use crate::domains::tasks::models::{JobStatus, TaskDefinition, TaskDefinitionPatch};
use crate::domains::tasks::store::{JobStore, StoreError, TaskStore};
use crate::kernel::credentials::CredentialStore;
use crate::kernel::deps::ServerDeps;
use crate::kernel::notify::notify_best_effort;
use crate::kernel::scheduler::CronScheduler;

/// Daily 09:00 check for credentials about to expire.
const CREDENTIAL_WATCH_SCHEDULE: &str = "0 0 9 * * *";
const CREDENTIAL_WARN_WINDOW_HOURS: i64 = 48;

/// Register one definition's cron trigger. Returns the scheduler handle.
pub async fn register_definition(
    deps: &Arc<ServerDeps>,
    factory: &Arc<dyn PlatformFactory>,
    scheduler: &CronScheduler,
    definition: &TaskDefinition,
) -> Result<Uuid> {
    let deps = deps.clone();
    let factory = factory.clone();
    let definition = definition.clone();
    let name = definition.source_type.as_str();
    let schedule = definition.schedule.clone();

    scheduler
        .add_crawl_job(name, &schedule, move || {
            let deps = deps.clone();
            let platform = factory.platform(definition.source_type);
            let definition = definition.clone();
            async move {
                let definition_id = definition.id;
                let (receipt, handle) =
                    CrawlOrchestrator::new(deps, platform, definition).spawn();
                match receipt.wait(START_TIMEOUT).await {
                    Some(StartSignal::Accepted(record)) => {
                        info!(task_definition_id = %definition_id, job_id = %record.id, "scheduled crawl accepted");
                    }
                    Some(StartSignal::AlreadyRunning { job_id }) => {
                        info!(task_definition_id = %definition_id, job_id = %job_id, "scheduled crawl skipped, job already running");
                    }
                    Some(StartSignal::Resumed { .. }) | None => {
                        warn!(task_definition_id = %definition_id, "scheduled crawl gave no start signal");
                    }
                    Some(StartSignal::Failed(reason)) => {
                        warn!(task_definition_id = %definition_id, reason = %reason, "scheduled crawl failed to start");
                    }
                }
                // Hold the singleton guard until the run completes so the
                // next fire is skipped, not queued.
                let _ = handle.await;
            }
        })
        .await
}

/// Register cron triggers for every stored definition and persist the
/// scheduler handles back onto them.
pub async fn register_definitions(
    deps: &Arc<ServerDeps>,
    factory: &Arc<dyn PlatformFactory>,
    scheduler: &CronScheduler,
) -> Result<()> {
    let definitions = deps.tasks.list().await.context("failed to list task definitions")?;
    for definition in definitions {
        let handle = register_definition(deps, factory, scheduler, &definition).await?;
        deps.tasks
            .patch(
                definition.id,
                TaskDefinitionPatch {
                    scheduler_handle: Some(Some(handle)),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("failed to persist scheduler handle for {}", definition.id))?;
    }
    Ok(())
}

/// Warn the operator before a stored credential expires, so the refresh
/// happens before a crawl dies on it.
pub async fn register_credential_watch(
    deps: &Arc<ServerDeps>,
    scheduler: &CronScheduler,
) -> Result<()> {
    let deps = deps.clone();
    scheduler
        .add_crawl_job("credential-watch", CREDENTIAL_WATCH_SCHEDULE, move || {
            let deps = deps.clone();
            async move {
                let window = chrono::Duration::hours(CREDENTIAL_WARN_WINDOW_HOURS);
                for source in [
                    SourceType::Zhihu,
                    SourceType::Zsxq,
                    SourceType::Xiaobot,
                    SourceType::Github,
                ] {
                    match deps.credentials.expires_within(source, window).await {
                        Ok(true) => {
                            notify_best_effort(
                                deps.notifier.as_ref(),
                                &format!("{source} credential expiring"),
                                "the stored credential expires within 48 hours; refresh it",
                            )
                            .await;
                        }
                        Ok(false) => {}
                        Err(error) => {
                            warn!(source = %source, error = %error, "credential expiry check failed");
                        }
                    }
                }
            }
        })
        .await?;
    Ok(())
}

/// Deal with job records the previous process left `running`: resumable
/// sources pick their run back up from the cursor, cheap sources are
/// stopped and wait for the next scheduled fire.
pub async fn resume_running_jobs(
    deps: &Arc<ServerDeps>,
    factory: &Arc<dyn PlatformFactory>,
) -> Result<()> {
    let running = deps
        .jobs
        .find_by_status(JobStatus::Running)
        .await
        .context("failed to scan for interrupted jobs")?;

    for record in running {
        let definition = match deps.tasks.get(record.task_definition_id).await {
            Ok(definition) => definition,
            Err(StoreError::DefinitionNotFound(_)) => {
                warn!(
                    job_id = %record.id,
                    "interrupted job references a deleted definition, stopping it"
                );
                deps.jobs.update_status(record.id, JobStatus::Stopped).await?;
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        if definition.source_type.is_resumable() {
            info!(
                job_id = %record.id,
                source = %definition.source_type,
                cursor = ?record.cursor,
                "resuming interrupted crawl"
            );
            let platform = factory.platform(definition.source_type);
            let resume = Resume {
                job_id: record.id,
                cursor: record.cursor.clone(),
            };
            let (_receipt, _handle) =
                CrawlOrchestrator::resuming(deps.clone(), platform, definition, resume).spawn();
        } else {
            info!(
                job_id = %record.id,
                source = %definition.source_type,
                "stopping interrupted crawl of a cheap source"
            );
            deps.jobs.update_status(record.id, JobStatus::Stopped).await?;
        }
    }
    Ok(())
}
