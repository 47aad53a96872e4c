use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Attempt;
use crate::db::types::{AttemptStatus, EvaluationStage, EvaluationStatus, SyncStatus};

use super::types::{EvaluationOutcome, FreeFormSubmission, ObjectiveFinalization, COLUMNS};

/// Creates an attempt numbered `MAX + 1` for the learner/exercise pair. The advisory
/// lock serializes concurrent starts; the unique constraint is the backstop.
pub(crate) async fn create_with_next_number(
    pool: &PgPool,
    id: &str,
    user_id: &str,
    exercise_id: &str,
    now: PrimitiveDateTime,
) -> Result<Attempt, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("attempt-number:{user_id}:{exercise_id}"))
        .execute(&mut *tx)
        .await?;

    let attempt = sqlx::query_as::<_, Attempt>(&format!(
        "INSERT INTO attempts (
            id, user_id, exercise_id, attempt_number, status, started_at,
            sync_status, sync_attempts, created_at, updated_at
         )
         SELECT $1, $2, $3, COALESCE(MAX(attempt_number), 0) + 1, $4, $5, $6, 0, $5, $5
         FROM attempts
         WHERE user_id = $2 AND exercise_id = $3
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(user_id)
    .bind(exercise_id)
    .bind(AttemptStatus::InProgress)
    .bind(now)
    .bind(SyncStatus::NotRequired)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(attempt)
}

/// Row-locks the attempt for the rest of the transaction and returns its status.
pub(crate) async fn lock_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &str,
) -> Result<Option<AttemptStatus>, sqlx::Error> {
    sqlx::query_scalar::<_, AttemptStatus>("SELECT status FROM attempts WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

pub(crate) async fn finalize_objective(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &str,
    params: ObjectiveFinalization,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE attempts
         SET status = $1,
             score = $2,
             raw_correct = $3,
             raw_total = $4,
             band_score = $5,
             time_spent_seconds = $6,
             completed_at = COALESCE(completed_at, $7),
             sync_status = $8,
             updated_at = $7
         WHERE id = $9
           AND status IN ($10, $11)",
    )
    .bind(AttemptStatus::Completed)
    .bind(params.score)
    .bind(params.raw_correct)
    .bind(params.raw_total)
    .bind(params.band_score)
    .bind(params.time_spent_seconds)
    .bind(params.completed_at)
    .bind(SyncStatus::Pending)
    .bind(id)
    .bind(AttemptStatus::InProgress)
    .bind(AttemptStatus::Submitted)
    .execute(&mut **tx)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Moves an in-progress attempt to `submitted` with its free-form payload and queues
/// evaluation. `completed_at` is stamped here and never again.
pub(crate) async fn mark_free_form_submitted(
    pool: &PgPool,
    id: &str,
    params: FreeFormSubmission<'_>,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE attempts
         SET status = $1,
             essay_text = $2,
             word_count = $3,
             audio_url = $4,
             audio_duration_seconds = $5,
             payload_hash = $6,
             time_spent_seconds = COALESCE($7, time_spent_seconds),
             completed_at = COALESCE(completed_at, $8),
             evaluation_status = $9,
             evaluation_stage = NULL,
             evaluation_error = NULL,
             updated_at = $8
         WHERE id = $10
           AND status = $11",
    )
    .bind(AttemptStatus::Submitted)
    .bind(params.essay_text)
    .bind(params.word_count)
    .bind(params.audio_url)
    .bind(params.audio_duration_seconds)
    .bind(params.payload_hash)
    .bind(params.time_spent_seconds)
    .bind(params.submitted_at)
    .bind(EvaluationStatus::Pending)
    .bind(id)
    .bind(AttemptStatus::InProgress)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Guarded `pending -> processing`; only one caller gets the row back.
pub(crate) async fn claim_for_evaluation(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE attempts
         SET evaluation_status = $1,
             evaluation_stage = NULL,
             evaluation_started_at = $2,
             updated_at = $2
         WHERE id = $3
           AND evaluation_status = $4
         RETURNING {COLUMNS}"
    ))
    .bind(EvaluationStatus::Processing)
    .bind(now)
    .bind(id)
    .bind(EvaluationStatus::Pending)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn set_stage(
    pool: &PgPool,
    id: &str,
    stage: EvaluationStage,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE attempts
         SET evaluation_stage = $1,
             updated_at = $2
         WHERE id = $3
           AND evaluation_status = $4",
    )
    .bind(stage)
    .bind(now)
    .bind(id)
    .bind(EvaluationStatus::Processing)
    .execute(pool)
    .await?;

    Ok(())
}

/// Stores the evaluation result. Leaves `completed_at` alone; the AI finish time
/// goes to `evaluated_at`.
pub(crate) async fn complete_evaluation(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &str,
    outcome: EvaluationOutcome,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE attempts
         SET status = $1,
             evaluation_status = $2,
             evaluation_stage = NULL,
             transcript = COALESCE($3, transcript),
             audio_duration_seconds = COALESCE($4, audio_duration_seconds),
             criteria_scores = $5,
             band_score = $6,
             feedback = $7,
             evaluated_at = $8,
             evaluation_duration_seconds = $9,
             evaluation_error = NULL,
             sync_status = $10,
             updated_at = $8
         WHERE id = $11
           AND evaluation_status = $12",
    )
    .bind(AttemptStatus::Completed)
    .bind(EvaluationStatus::Completed)
    .bind(outcome.transcript)
    .bind(outcome.audio_duration_seconds)
    .bind(Json(outcome.criteria))
    .bind(outcome.band_score)
    .bind(outcome.feedback)
    .bind(outcome.evaluated_at)
    .bind(outcome.duration_seconds)
    .bind(SyncStatus::Pending)
    .bind(id)
    .bind(EvaluationStatus::Processing)
    .execute(&mut **tx)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn fail_evaluation(
    pool: &PgPool,
    id: &str,
    error: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE attempts
         SET status = $1,
             evaluation_status = $2,
             evaluation_stage = NULL,
             evaluation_error = $3,
             updated_at = $4
         WHERE id = $5
           AND evaluation_status IN ($6, $7)",
    )
    .bind(AttemptStatus::Failed)
    .bind(EvaluationStatus::Failed)
    .bind(error)
    .bind(now)
    .bind(id)
    .bind(EvaluationStatus::Pending)
    .bind(EvaluationStatus::Processing)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Takes the delivery lease on an unsynced attempt. Returns false while another
/// delivery holds an unexpired lease or once the attempt is synced.
pub(crate) async fn claim_sync(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
    lease_until: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE attempts
         SET sync_claimed_until = $1
         WHERE id = $2
           AND sync_status IN ($3, $4)
           AND (sync_claimed_until IS NULL OR sync_claimed_until < $5)",
    )
    .bind(lease_until)
    .bind(id)
    .bind(SyncStatus::Pending)
    .bind(SyncStatus::Failed)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn mark_sync_synced(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE attempts
         SET sync_status = $1,
             synced_at = $2,
             sync_last_attempt_at = $2,
             sync_last_error = NULL,
             sync_claimed_until = NULL,
             updated_at = $2
         WHERE id = $3",
    )
    .bind(SyncStatus::Synced)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) async fn mark_sync_failed(
    pool: &PgPool,
    id: &str,
    error: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE attempts
         SET sync_status = $1,
             sync_attempts = sync_attempts + 1,
             sync_last_attempt_at = $2,
             sync_last_error = $3,
             sync_claimed_until = NULL,
             updated_at = $2
         WHERE id = $4
           AND sync_status <> $5",
    )
    .bind(SyncStatus::Failed)
    .bind(now)
    .bind(error)
    .bind(id)
    .bind(SyncStatus::Synced)
    .execute(pool)
    .await?;

    Ok(())
}
