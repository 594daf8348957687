//! Cron scheduler wrapper.
//!
//! Each task definition registers one cron job. Registrations run in
//! singleton mode: a per-registration mutex is try-locked on every fire,
//! and when the previous run is still holding it the fire is skipped.
//! The scheduler only triggers runs; mutual exclusion across process
//! restarts is the job record store's concern.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;
use uuid::Uuid;

pub struct CronScheduler {
    inner: JobScheduler,
}

impl CronScheduler {
    pub async fn start() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("failed to create cron scheduler")?;
        inner
            .start()
            .await
            .context("failed to start cron scheduler")?;
        Ok(Self { inner })
    }

    /// Register a cron job with singleton semantics. Returns the scheduler
    /// handle to persist on the task definition for later removal.
    pub async fn add_crawl_job<F, Fut>(
        &self,
        name: &'static str,
        schedule: &str,
        fire: F,
    ) -> Result<Uuid>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let guard = Arc::new(Mutex::new(()));
        let job = Job::new_async(schedule, move |_id, _scheduler| {
            let fire = fire.clone();
            let guard = guard.clone();
            Box::pin(async move {
                let Ok(_running) = guard.try_lock() else {
                    info!(job = name, "previous run still executing, skipping this fire");
                    return;
                };
                fire().await;
            })
        })
        .with_context(|| format!("invalid cron schedule for {name}"))?;

        let handle = self
            .inner
            .add(job)
            .await
            .context("failed to register cron job")?;
        info!(job = name, handle = %handle, "cron job registered");
        Ok(handle)
    }

    pub async fn remove_job(&self, handle: Uuid) -> Result<()> {
        self.inner
            .remove(&handle)
            .await
            .context("failed to remove cron job")?;
        Ok(())
    }
}

/// Check a cron expression without registering anything.
pub fn validate_schedule(schedule: &str) -> Result<()> {
    Job::new_async(schedule, |_id, _scheduler| Box::pin(async {}))
        .map(|_| ())
        .with_context(|| format!("invalid cron schedule: {schedule}"))
}
