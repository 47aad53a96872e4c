use anyhow::{Context, Result};
use time::Duration;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::tasks::pool::Job;

pub(crate) const STALE_EVALUATION_ERROR: &str = "Evaluation timed out";

/// Fails evaluations stuck in `processing` past the configured budget, e.g. after the
/// worker process died mid-call.
pub(crate) async fn recover_stale_evaluations(state: &AppState) -> Result<usize> {
    let now = primitive_now_utc();
    let budget = state.settings().workers().stale_evaluation_seconds;
    let started_before = now - Duration::seconds(budget.min(i64::MAX as u64) as i64);

    let stale = repositories::attempts::list_stale_evaluations(state.db(), started_before)
        .await
        .context("Failed to fetch stale evaluations")?;

    let mut recovered = 0;
    for attempt_id in &stale {
        let failed = repositories::attempts::fail_evaluation(
            state.db(),
            attempt_id,
            STALE_EVALUATION_ERROR,
            now,
        )
        .await
        .context("Failed to mark stale evaluation failed")?;

        if failed {
            recovered += 1;
            tracing::warn!(attempt_id = %attempt_id, "Stale evaluation marked failed");
        }
    }

    if recovered > 0 {
        metrics::counter!("evaluations_recovered_total").increment(recovered as u64);
    }

    Ok(recovered)
}

/// Re-enqueues evaluations still `pending` after the requeue delay. The claim guard
/// keeps duplicates from running twice.
pub(crate) async fn redispatch_pending(state: &AppState) -> Result<usize> {
    let workers = state.settings().workers();
    let updated_before = primitive_now_utc()
        - Duration::seconds(workers.pending_requeue_seconds.min(i64::MAX as u64) as i64);

    let pending = repositories::attempts::list_pending_evaluations(
        state.db(),
        updated_before,
        workers.queue_capacity as i64,
    )
    .await
    .context("Failed to fetch pending evaluations")?;

    let mut dispatched = 0;
    for attempt_id in pending {
        if !state.jobs().submit(Job::Evaluate { attempt_id }) {
            break;
        }
        dispatched += 1;
    }

    if dispatched > 0 {
        tracing::info!(dispatched, "Redispatched pending evaluations");
    }

    Ok(dispatched)
}
