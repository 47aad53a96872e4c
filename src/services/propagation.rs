//! Delivery of scored attempts to the progress store, tracked by the sync ledger
//! columns on `attempts`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::repositories::attempts::SyncTarget;
use crate::services::band_score;
use crate::services::external::{
    ExternalError, Notification, Notifier, OfficialResult, PracticeActivity, ScoreRecorder,
};
use crate::services::retry::{run_with_backoff, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScoreRecord {
    Official(OfficialResult),
    Practice(PracticeActivity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Synced,
    Failed,
    /// Another delivery holds the lease, or the attempt is already synced.
    Skipped,
}

/// Extra lease time on top of the worst-case retry budget, covering the ledger
/// writes around the delivery.
const SYNC_LEASE_MARGIN: Duration = Duration::from_secs(30);

/// Persists the outcome of a delivery attempt.
#[async_trait]
pub(crate) trait SyncLedger: Send + Sync {
    /// Takes the delivery lease. Only the holder may call the progress store.
    async fn claim(&self, attempt_id: &str) -> Result<bool>;

    async fn mark_synced(&self, attempt_id: &str) -> Result<()>;

    async fn mark_failed(&self, attempt_id: &str, error: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub(crate) struct PgSyncLedger {
    pool: PgPool,
    lease: Duration,
}

impl PgSyncLedger {
    pub(crate) fn new(pool: PgPool, lease: Duration) -> Self {
        Self { pool, lease }
    }

    /// Lease long enough for a full sync retry run against the progress store.
    pub(crate) fn for_state(state: &AppState) -> Self {
        let timeout =
            Duration::from_secs(state.settings().downstream().request_timeout_seconds);
        let lease = state.retry().sync.worst_case_duration(timeout) + SYNC_LEASE_MARGIN;
        Self::new(state.db().clone(), lease)
    }
}

#[async_trait]
impl SyncLedger for PgSyncLedger {
    async fn claim(&self, attempt_id: &str) -> Result<bool> {
        let now = primitive_now_utc();
        repositories::attempts::claim_sync(&self.pool, attempt_id, now, now + self.lease)
            .await
            .context("Failed to claim attempt for sync")
    }

    async fn mark_synced(&self, attempt_id: &str) -> Result<()> {
        repositories::attempts::mark_sync_synced(&self.pool, attempt_id, primitive_now_utc())
            .await
            .context("Failed to mark attempt synced")
    }

    async fn mark_failed(&self, attempt_id: &str, error: &str) -> Result<()> {
        repositories::attempts::mark_sync_failed(&self.pool, attempt_id, error, primitive_now_utc())
            .await
            .context("Failed to mark attempt sync failed")
    }
}

/// Official tests go to the results ledger with raw counts (objective skills) or the
/// band (free-form skills). Everything else is practice activity.
pub(crate) fn build_record(target: &SyncTarget) -> ScoreRecord {
    if !target.is_official_test {
        return ScoreRecord::Practice(PracticeActivity {
            user_id: target.user_id.clone(),
            skill: target.skill,
            band_score: target.band_score,
            time_spent_seconds: target.time_spent_seconds,
            source_ref: target.attempt_id.clone(),
        });
    }

    let variant = band_score::resolve_variant(target.test_variant, &target.slug, &target.title);
    let raw_counts = match (target.skill.is_objective(), target.raw_correct, target.raw_total) {
        (true, Some(correct), Some(total)) => Some((correct, total)),
        _ => None,
    };

    ScoreRecord::Official(OfficialResult {
        user_id: target.user_id.clone(),
        skill: target.skill,
        test_type: variant.as_str().to_string(),
        raw_score: raw_counts.map(|(correct, _)| correct),
        raw_total: raw_counts.map(|(_, total)| total),
        band_score: if raw_counts.is_some() { None } else { target.band_score },
        source_ref: target.attempt_id.clone(),
    })
}

pub(crate) async fn deliver_record(
    recorder: &dyn ScoreRecorder,
    policy: &RetryPolicy,
    record: &ScoreRecord,
) -> Result<(), ExternalError> {
    match record {
        ScoreRecord::Official(result) => {
            run_with_backoff(policy, "record_official_result", |_| {
                recorder.record_official(result)
            })
            .await
        }
        ScoreRecord::Practice(activity) => {
            run_with_backoff(policy, "record_practice_activity", |_| {
                recorder.record_practice(activity)
            })
            .await
        }
    }
}

/// Delivers one attempt under the ledger's lease and writes the outcome back. A
/// failed delivery is a normal outcome here; only ledger errors are returned.
pub(crate) async fn sync_target(
    recorder: &dyn ScoreRecorder,
    policy: &RetryPolicy,
    ledger: &dyn SyncLedger,
    target: &SyncTarget,
) -> Result<Delivery> {
    let record = build_record(target);
    let kind = match record {
        ScoreRecord::Official(_) => "official",
        ScoreRecord::Practice(_) => "practice",
    };

    if !ledger.claim(&target.attempt_id).await? {
        metrics::counter!("sync_deliveries_total", "kind" => kind, "outcome" => "skipped")
            .increment(1);
        tracing::info!(
            attempt_id = %target.attempt_id,
            kind,
            "Delivery already in flight or done; skipping"
        );
        return Ok(Delivery::Skipped);
    }

    match deliver_record(recorder, policy, &record).await {
        Ok(()) => {
            ledger.mark_synced(&target.attempt_id).await?;
            metrics::counter!("sync_deliveries_total", "kind" => kind, "outcome" => "synced")
                .increment(1);
            tracing::info!(
                attempt_id = %target.attempt_id,
                exercise_id = %target.exercise_id,
                skill = target.skill.as_str(),
                kind,
                "Result delivered to progress store"
            );
            Ok(Delivery::Synced)
        }
        Err(err) => {
            ledger.mark_failed(&target.attempt_id, &err.to_string()).await?;
            metrics::counter!("sync_deliveries_total", "kind" => kind, "outcome" => "failed")
                .increment(1);
            tracing::warn!(
                attempt_id = %target.attempt_id,
                exercise_id = %target.exercise_id,
                skill = target.skill.as_str(),
                kind,
                previous_attempts = target.sync_attempts,
                error = %err,
                "Result delivery failed; left for reconciliation"
            );
            Ok(Delivery::Failed)
        }
    }
}

pub(crate) fn result_notification(target: &SyncTarget) -> Notification {
    let skill = target.skill.as_str();
    let message = match target.band_score {
        Some(band) => format!("You scored band {band:.1} on \"{}\".", target.title),
        None => format!("Your result for \"{}\" is available.", target.title),
    };

    Notification {
        user_id: target.user_id.clone(),
        title: format!("Your {skill} result is ready"),
        message,
        kind: "exercise_result".to_string(),
        payload: json!({
            "attempt_id": target.attempt_id,
            "exercise_id": target.exercise_id,
            "skill": target.skill,
            "band_score": target.band_score,
        }),
    }
}

pub(crate) async fn notify_best_effort(
    notifier: &dyn Notifier,
    policy: &RetryPolicy,
    notification: &Notification,
) {
    if let Err(err) =
        run_with_backoff(policy, "notify", |_| notifier.notify(notification)).await
    {
        tracing::warn!(user_id = %notification.user_id, error = %err, "Notification not delivered");
    }
}

/// Foreground propagation after a scored terminal state. Never fails the caller's
/// flow for delivery problems; those land in the ledger for reconciliation.
pub(crate) async fn propagate_attempt(state: &AppState, attempt_id: &str) -> Result<()> {
    let Some(target) = repositories::attempts::find_sync_target(state.db(), attempt_id)
        .await
        .context("Failed to load attempt for propagation")?
    else {
        tracing::warn!(attempt_id, "Attempt disappeared before propagation");
        return Ok(());
    };

    let capabilities = state.capabilities();
    let policies = state.retry();
    let ledger = PgSyncLedger::for_state(state);

    sync_target(capabilities.recorder.as_ref(), &policies.sync, &ledger, &target).await?;
    notify_best_effort(
        capabilities.notifier.as_ref(),
        &policies.notification,
        &result_notification(&target),
    )
    .await;

    Ok(())
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::*;
    use super::*;
    use crate::db::types::{SkillType, TestVariant};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    #[test]
    fn official_objective_results_carry_raw_counts() {
        let record = build_record(&target("att-1", SkillType::Listening, true));
        let ScoreRecord::Official(result) = record else {
            panic!("expected official result");
        };

        assert_eq!(result.raw_score, Some(30));
        assert_eq!(result.raw_total, Some(40));
        assert_eq!(result.band_score, None);
        assert_eq!(result.test_type, "academic");
        assert_eq!(result.source_ref, "att-1");
    }

    #[test]
    fn official_free_form_results_carry_the_band() {
        let record = build_record(&target("att-2", SkillType::Writing, true));
        let ScoreRecord::Official(result) = record else {
            panic!("expected official result");
        };

        assert_eq!(result.raw_score, None);
        assert_eq!(result.band_score, Some(7.0));
        let body = serde_json::to_value(&result).expect("serialize");
        assert!(body.get("raw_score").is_none());
        assert_eq!(body["skill"], "writing");
    }

    #[test]
    fn legacy_general_training_slug_sets_test_type() {
        let mut legacy = target("att-3", SkillType::Reading, true);
        legacy.test_variant = None;
        legacy.slug = "reading-gt-mock-2".to_string();

        let ScoreRecord::Official(result) = build_record(&legacy) else {
            panic!("expected official result");
        };
        assert_eq!(result.test_type, TestVariant::GeneralTraining.as_str());
    }

    #[test]
    fn practice_records_carry_band_and_time() {
        let record = build_record(&target("att-4", SkillType::Reading, false));
        assert_eq!(
            record,
            ScoreRecord::Practice(PracticeActivity {
                user_id: "learner-1".to_string(),
                skill: SkillType::Reading,
                band_score: Some(7.0),
                time_spent_seconds: Some(1800),
                source_ref: "att-4".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn exhausted_retries_mark_the_ledger_failed() {
        let recorder = FlakyRecorder::new(10);
        let ledger = MemoryLedger::default();
        let target = target("att-5", SkillType::Speaking, false);

        let delivery =
            sync_target(&recorder, &fast_policy(3), &ledger, &target).await.expect("ledger ok");

        assert_eq!(delivery, Delivery::Failed);
        assert_eq!(recorder.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(matches!(ledger.entry("att-5"), Some(LedgerEntry::Failed { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn successful_delivery_marks_the_ledger_synced() {
        let recorder = FlakyRecorder::new(1);
        let ledger = MemoryLedger::default();
        let target = target("att-6", SkillType::Listening, true);

        let delivery =
            sync_target(&recorder, &fast_policy(3), &ledger, &target).await.expect("ledger ok");

        assert_eq!(delivery, Delivery::Synced);
        assert_eq!(ledger.entry("att-6"), Some(LedgerEntry::Synced));
        assert_eq!(recorder.official.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn delivery_in_flight_is_not_repeated() {
        let recorder = FlakyRecorder::new(0);
        let ledger = MemoryLedger::default();
        let target = target("att-8", SkillType::Reading, true);
        assert!(ledger.claim("att-8").await.expect("claim"));

        let delivery =
            sync_target(&recorder, &fast_policy(3), &ledger, &target).await.expect("ledger ok");

        assert_eq!(delivery, Delivery::Skipped);
        assert_eq!(recorder.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(ledger.entry("att-8"), None);
    }

    #[tokio::test]
    async fn synced_attempt_is_not_delivered_again() {
        let recorder = FlakyRecorder::new(0);
        let ledger = MemoryLedger::default();
        let target = target("att-9", SkillType::Listening, true);

        let first = sync_target(&recorder, &fast_policy(3), &ledger, &target).await.expect("first");
        let second =
            sync_target(&recorder, &fast_policy(3), &ledger, &target).await.expect("second");

        assert_eq!((first, second), (Delivery::Synced, Delivery::Skipped));
        assert_eq!(recorder.official.lock().expect("lock").len(), 1);
    }

    #[test]
    fn notification_mentions_the_band() {
        let notification = result_notification(&target("att-7", SkillType::Writing, false));
        assert_eq!(notification.title, "Your writing result is ready");
        assert!(notification.message.contains("7.0"));
        assert_eq!(notification.payload["attempt_id"], "att-7");
    }
}
