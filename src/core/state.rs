use std::sync::Arc;

use sqlx::PgPool;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::services::external::Capabilities;
use crate::services::retry::RetryPolicies;
use crate::tasks::pool::JobQueue;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    capabilities: Capabilities,
    retry: RetryPolicies,
    jobs: JobQueue,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        capabilities: Capabilities,
        jobs: JobQueue,
    ) -> Self {
        let retry = RetryPolicies::from_settings(&settings);
        Self { inner: Arc::new(InnerState { settings, db, redis, capabilities, retry, jobs }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn capabilities(&self) -> &Capabilities {
        &self.inner.capabilities
    }

    pub(crate) fn retry(&self) -> &RetryPolicies {
        &self.inner.retry
    }

    pub(crate) fn jobs(&self) -> &JobQueue {
        &self.inner.jobs
    }
}
