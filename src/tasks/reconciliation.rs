use anyhow::{Context, Result};
use time::Duration;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::repositories::attempts::SyncTarget;
use crate::services::external::ScoreRecorder;
use crate::services::propagation::{self, Delivery, PgSyncLedger, SyncLedger};
use crate::services::retry::RetryPolicy;

/// Fresh `pending` rows younger than this are left to the foreground delivery,
/// which claims them before calling the progress store.
const PENDING_GRACE_SECONDS: i64 = 60;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SweepReport {
    pub(crate) scanned: usize,
    pub(crate) synced: usize,
    pub(crate) failed: usize,
    pub(crate) skipped: usize,
}

/// Retries each target in order. A ledger write error stops the sweep.
pub(crate) async fn sweep(
    recorder: &dyn ScoreRecorder,
    policy: &RetryPolicy,
    ledger: &dyn SyncLedger,
    targets: &[SyncTarget],
) -> Result<SweepReport> {
    let mut report = SweepReport { scanned: targets.len(), ..SweepReport::default() };

    for target in targets {
        match propagation::sync_target(recorder, policy, ledger, target).await? {
            Delivery::Synced => report.synced += 1,
            Delivery::Failed => report.failed += 1,
            Delivery::Skipped => report.skipped += 1,
        }
    }

    Ok(report)
}

pub(crate) async fn run_once(state: &AppState) -> Result<SweepReport> {
    let settings = state.settings().reconciliation();
    let now = primitive_now_utc();
    let pending_before = now - Duration::seconds(PENDING_GRACE_SECONDS);

    let targets = repositories::attempts::list_sync_due(
        state.db(),
        settings.batch_size,
        settings.max_sync_attempts,
        pending_before,
        now,
    )
    .await
    .context("Failed to fetch attempts awaiting sync")?;

    if targets.is_empty() {
        return Ok(SweepReport::default());
    }

    let ledger = PgSyncLedger::for_state(state);
    let report = sweep(
        state.capabilities().recorder.as_ref(),
        &state.retry().sync,
        &ledger,
        &targets,
    )
    .await?;

    metrics::counter!("reconciliation_swept_total", "outcome" => "synced")
        .increment(report.synced as u64);
    metrics::counter!("reconciliation_swept_total", "outcome" => "failed")
        .increment(report.failed as u64);
    tracing::info!(
        scanned = report.scanned,
        synced = report.synced,
        failed = report.failed,
        skipped = report.skipped,
        "Reconciliation sweep finished"
    );

    Ok(report)
}
