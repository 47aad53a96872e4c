use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Attempt;
use crate::db::types::{EvaluationStatus, SyncStatus};

use super::types::{SyncTarget, COLUMNS, SYNC_TARGET_SELECT};

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!("SELECT {COLUMNS} FROM attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn find_sync_target(
    pool: &PgPool,
    attempt_id: &str,
) -> Result<Option<SyncTarget>, sqlx::Error> {
    sqlx::query_as::<_, SyncTarget>(&format!("{SYNC_TARGET_SELECT} WHERE a.id = $1"))
        .bind(attempt_id)
        .fetch_optional(pool)
        .await
}

/// Attempts whose result has not reached the progress store yet. Fresh `pending`
/// rows are left to the foreground delivery until `pending_before`, and rows under
/// an unexpired delivery lease are skipped.
pub(crate) async fn list_sync_due(
    pool: &PgPool,
    batch_size: i64,
    max_attempts: i32,
    pending_before: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<Vec<SyncTarget>, sqlx::Error> {
    sqlx::query_as::<_, SyncTarget>(&format!(
        "{SYNC_TARGET_SELECT}
         WHERE a.sync_status IN ($1, $2)
           AND a.sync_attempts < $3
           AND (a.sync_status = $2 OR a.updated_at < $4)
           AND (a.sync_claimed_until IS NULL OR a.sync_claimed_until < $5)
         ORDER BY COALESCE(a.sync_last_attempt_at, a.updated_at), a.id
         LIMIT $6"
    ))
    .bind(SyncStatus::Pending)
    .bind(SyncStatus::Failed)
    .bind(max_attempts)
    .bind(pending_before)
    .bind(now)
    .bind(batch_size)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_stale_evaluations(
    pool: &PgPool,
    started_before: PrimitiveDateTime,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT id
         FROM attempts
         WHERE evaluation_status = $1
           AND evaluation_started_at < $2
         ORDER BY evaluation_started_at",
    )
    .bind(EvaluationStatus::Processing)
    .bind(started_before)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_pending_evaluations(
    pool: &PgPool,
    updated_before: PrimitiveDateTime,
    limit: i64,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT id
         FROM attempts
         WHERE evaluation_status = $1
           AND updated_at < $2
         ORDER BY updated_at
         LIMIT $3",
    )
    .bind(EvaluationStatus::Pending)
    .bind(updated_before)
    .bind(limit)
    .fetch_all(pool)
    .await
}
