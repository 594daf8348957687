//! Per-run crawl orchestration.
//!
//! ```text
//!   spawn ──▶ check_running ──▶ create record ──▶ handshake signal
//!                                    │
//!                                    ▼
//!          open session ─▶ entities ─▶ filter ─▶ resume window
//!                                    │
//!                      per entity:   ▼
//!            crawl every category ─▶ persist cursor ─▶ next entity
//!                                    │
//!                                    ▼
//!              finalize: finished / error (+ one aggregate notification)
//! ```
//!
//! The caller gets a `StartReceipt` immediately and learns through it
//! whether the run was accepted or refused; the crawl itself runs on its
//! own task. A credential rejection anywhere aborts the run, deletes the
//! stored credential, and notifies the operator exactly once. Any panic
//! in the crawl body is caught and finalized as an error so no record is
//! left `running` by a bug.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domains::sources::{CrawlSession, SessionError, SourcePlatform};
use crate::domains::tasks::filter;
use crate::domains::tasks::models::{JobRecord, JobStatus, TaskDefinition};
use crate::domains::tasks::store::JobStore;
use crate::kernel::credentials::CredentialStore;
use crate::kernel::deps::ServerDeps;
use crate::kernel::notify::notify_best_effort;

/// What the orchestrator tells the caller through the start handshake.
#[derive(Debug)]
pub enum StartSignal {
    /// A fresh job record was created and the crawl is underway.
    Accepted(JobRecord),
    /// Another run for this definition is already in flight.
    AlreadyRunning { job_id: Uuid },
    /// An existing record was picked up after a restart.
    Resumed { job_id: Uuid },
    /// The run could not start.
    Failed(String),
}

/// Receiver half of the start handshake.
pub struct StartReceipt {
    rx: oneshot::Receiver<StartSignal>,
}

impl StartReceipt {
    /// Wait for the signal, bounded. None means the orchestrator task
    /// died before signalling or the bound elapsed.
    pub async fn wait(self, bound: Duration) -> Option<StartSignal> {
        match tokio::time::timeout(bound, self.rx).await {
            Ok(Ok(signal)) => Some(signal),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

/// Resume parameters for a job picked up after a restart.
#[derive(Debug, Clone)]
pub struct Resume {
    pub job_id: Uuid,
    pub cursor: Option<String>,
}

pub struct CrawlOrchestrator {
    deps: Arc<ServerDeps>,
    platform: Arc<dyn SourcePlatform>,
    definition: TaskDefinition,
    resume: Option<Resume>,
}

impl CrawlOrchestrator {
    pub fn new(
        deps: Arc<ServerDeps>,
        platform: Arc<dyn SourcePlatform>,
        definition: TaskDefinition,
    ) -> Self {
        Self {
            deps,
            platform,
            definition,
            resume: None,
        }
    }

    /// Pick up an interrupted run instead of creating a new record.
    pub fn resuming(
        deps: Arc<ServerDeps>,
        platform: Arc<dyn SourcePlatform>,
        definition: TaskDefinition,
        resume: Resume,
    ) -> Self {
        Self {
            deps,
            platform,
            definition,
            resume: Some(resume),
        }
    }

    /// Launch the run on its own task. The receipt resolves as soon as
    /// the run is accepted or refused; the handle resolves when the whole
    /// crawl is done.
    pub fn spawn(self) -> (StartReceipt, JoinHandle<()>) {
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(self.run(tx));
        (StartReceipt { rx }, handle)
    }

    async fn run(self, tx: oneshot::Sender<StartSignal>) {
        let CrawlOrchestrator {
            deps,
            platform,
            definition,
            resume,
        } = self;

        // Refuse a fresh run while another one is in flight. Resumed runs
        // own their record already, so the check does not apply to them.
        if resume.is_none() {
            match deps.jobs.check_running(definition.id).await {
                Ok(Some(existing)) => {
                    info!(
                        task_definition_id = %definition.id,
                        job_id = %existing.id,
                        "crawl already running, refusing to start another"
                    );
                    let _ = tx.send(StartSignal::AlreadyRunning { job_id: existing.id });
                    return;
                }
                Ok(None) => {}
                Err(error) => {
                    error!(
                        task_definition_id = %definition.id,
                        error = %error,
                        "failed to check for a running job"
                    );
                    let _ = tx.send(StartSignal::Failed(error.to_string()));
                    return;
                }
            }
        }

        let (job_id, cursor) = match &resume {
            Some(resume) => {
                info!(
                    job_id = %resume.job_id,
                    cursor = ?resume.cursor,
                    "resuming interrupted crawl"
                );
                let _ = tx.send(StartSignal::Resumed { job_id: resume.job_id });
                (resume.job_id, resume.cursor.clone())
            }
            None => match deps.jobs.create(None, definition.id).await {
                Ok(record) => {
                    info!(
                        task_definition_id = %definition.id,
                        job_id = %record.id,
                        source = %definition.source_type,
                        "crawl job started"
                    );
                    let job_id = record.id;
                    // The caller may have given up on the handshake; a
                    // dropped receiver is not an error.
                    let _ = tx.send(StartSignal::Accepted(record));
                    (job_id, None)
                }
                Err(error) => {
                    error!(
                        task_definition_id = %definition.id,
                        error = %error,
                        "failed to create job record"
                    );
                    let _ = tx.send(StartSignal::Failed(error.to_string()));
                    return;
                }
            },
        };

        // A panic in the crawl body must not leave the record running.
        let body = {
            let deps = deps.clone();
            let definition = definition.clone();
            async move { execute(deps, platform, definition, job_id, cursor).await }
        };
        if AssertUnwindSafe(body).catch_unwind().await.is_err() {
            error!(job_id = %job_id, "crawl task panicked");
            finalize(&deps, job_id, JobStatus::Error).await;
        }
    }
}

async fn execute(
    deps: Arc<ServerDeps>,
    platform: Arc<dyn SourcePlatform>,
    definition: TaskDefinition,
    job_id: Uuid,
    cursor: Option<String>,
) {
    let source = definition.source_type;

    let session = match platform.open_session().await {
        Ok(session) => session,
        Err(SessionError::MissingCredential(source)) => {
            warn!(job_id = %job_id, source = %source, "no credential on file, cannot crawl");
            notify_best_effort(
                deps.notifier.as_ref(),
                &format!("{source} credential required"),
                "no credential on file; provide one before the next scheduled run",
            )
            .await;
            finalize(&deps, job_id, JobStatus::Error).await;
            return;
        }
        Err(SessionError::Other(error)) => {
            error!(job_id = %job_id, source = %source, error = %error, "failed to open crawl session");
            finalize(&deps, job_id, JobStatus::Error).await;
            return;
        }
    };

    let universe = match session.entities().await {
        Ok(universe) => universe,
        Err(error) => {
            error!(job_id = %job_id, source = %source, error = %error, "failed to list entities");
            finalize(&deps, job_id, JobStatus::Error).await;
            return;
        }
    };

    let selected = filter::select(&definition.include, &definition.exclude, &universe);
    let remaining = filter::resume_window(&selected, cursor.as_deref());
    info!(
        job_id = %job_id,
        selected = selected.len(),
        remaining = remaining.len(),
        "crawl plan computed"
    );

    let mut failed_entities = 0usize;

    for entity in &remaining {
        for category in session.categories() {
            match session.crawl(entity, category).await {
                Ok(stored) => {
                    debug!(job_id = %job_id, entity = %entity, category = %category, stored, "category crawled");
                }
                Err(error) if error.is_credential() => {
                    // The credential is dead; every further request would
                    // burn a rate-gate slot on a guaranteed failure.
                    warn!(
                        job_id = %job_id,
                        entity = %entity,
                        error = %error,
                        "credential rejected upstream, aborting run"
                    );
                    if let Err(delete_error) = deps.credentials.delete(source).await {
                        error!(source = %source, error = %delete_error, "failed to invalidate credential");
                    }
                    notify_best_effort(
                        deps.notifier.as_ref(),
                        &format!("{source} needs a new credential"),
                        &error.to_string(),
                    )
                    .await;
                    finalize(&deps, job_id, JobStatus::Error).await;
                    return;
                }
                Err(error) => {
                    warn!(
                        job_id = %job_id,
                        entity = %entity,
                        category = %category,
                        error = %error,
                        "entity crawl failed, moving on"
                    );
                    failed_entities += 1;
                    break;
                }
            }
        }

        // The cursor only moves once the entity is fully dealt with, so a
        // crash re-crawls at most one entity. Losing the write makes the
        // cursor meaningless; abort rather than resume from a lie.
        if let Err(error) = deps.jobs.record_cursor(job_id, entity).await {
            error!(job_id = %job_id, entity = %entity, error = %error, "failed to persist cursor, aborting");
            finalize(&deps, job_id, JobStatus::Error).await;
            return;
        }
    }

    if failed_entities == 0 {
        finalize(&deps, job_id, JobStatus::Finished).await;
        info!(job_id = %job_id, source = %source, "crawl finished");
    } else {
        notify_best_effort(
            deps.notifier.as_ref(),
            &format!("failed to crawl {source}"),
            &format!("{failed_entities} entities failed; see logs for details"),
        )
        .await;
        finalize(&deps, job_id, JobStatus::Error).await;
    }
}

async fn finalize(deps: &Arc<ServerDeps>, job_id: Uuid, status: JobStatus) {
    if let Err(error) = deps.jobs.update_status(job_id, status).await {
        error!(job_id = %job_id, status = %status, error = %error, "failed to finalize job record");
    }
}
