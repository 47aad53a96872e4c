use anyhow::Result;
use async_trait::async_trait;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::services::{evaluation, propagation};
use crate::tasks::pool::{Job, JobHandler};

pub(crate) const PANIC_ERROR: &str = "Background task panicked";

/// Routes pool jobs to the pipeline services.
pub(crate) struct PipelineJobs {
    state: AppState,
}

impl PipelineJobs {
    pub(crate) fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl JobHandler for PipelineJobs {
    async fn handle(&self, job: Job) -> Result<()> {
        match job {
            Job::Evaluate { attempt_id } => {
                evaluation::run_evaluation(&self.state, &attempt_id).await
            }
            Job::Propagate { attempt_id } => {
                propagation::propagate_attempt(&self.state, &attempt_id).await
            }
        }
    }

    async fn on_panic(&self, job: &Job) {
        let now = primitive_now_utc();
        let result = match job {
            Job::Evaluate { attempt_id } => {
                repositories::attempts::fail_evaluation(self.state.db(), attempt_id, PANIC_ERROR, now)
                    .await
                    .map(|_| ())
            }
            Job::Propagate { attempt_id } => {
                repositories::attempts::mark_sync_failed(self.state.db(), attempt_id, PANIC_ERROR, now)
                    .await
            }
        };

        if let Err(err) = result {
            tracing::error!(
                attempt_id = job.attempt_id(),
                kind = job.kind(),
                error = %err,
                "Failed to record panicked job"
            );
        }
    }
}
