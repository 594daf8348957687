//! Central dependency container.
//!
//! Every collaborator the orchestration engine touches goes through a trait
//! object here, so domain logic can be exercised against in-memory doubles
//! without a database or network.

use std::sync::Arc;

use sqlx::PgPool;

use crate::domains::content::{ContentStore, PgContentStore};
use crate::domains::tasks::store::{JobStore, PgJobStore, PgTaskStore, TaskStore};
use crate::kernel::credentials::{CredentialStore, PgCredentialStore};
use crate::kernel::helper_pool::HelperPool;
use crate::kernel::notify::Notifier;

/// Shared server dependencies.
pub struct ServerDeps {
    pub tasks: Arc<dyn TaskStore>,
    pub jobs: Arc<dyn JobStore>,
    pub content: Arc<dyn ContentStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub notifier: Arc<dyn Notifier>,
    /// Request-proxying helpers for sources that need them. None in tests.
    pub helper_pool: Option<Arc<HelperPool>>,
}

impl ServerDeps {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        jobs: Arc<dyn JobStore>,
        content: Arc<dyn ContentStore>,
        credentials: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            tasks,
            jobs,
            content,
            credentials,
            notifier,
            helper_pool: None,
        }
    }

    /// Production wiring: every store backed by the given pool.
    pub fn postgres(pool: PgPool, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            tasks: Arc::new(PgTaskStore::new(pool.clone())),
            jobs: Arc::new(PgJobStore::new(pool.clone())),
            content: Arc::new(PgContentStore::new(pool.clone())),
            credentials: Arc::new(PgCredentialStore::new(pool.clone())),
            notifier,
            helper_pool: Some(Arc::new(HelperPool::new(pool))),
        }
    }
}
