use time::PrimitiveDateTime;

use crate::db::models::Answer;

const COLUMNS: &str = "\
    id, attempt_id, question_id, selected_option, text_answer, is_correct, points_earned, \
    time_spent_seconds, answered_at, updated_at";

pub(crate) struct UpsertAnswer<'a> {
    pub(crate) id: &'a str,
    pub(crate) attempt_id: &'a str,
    pub(crate) question_id: &'a str,
    pub(crate) selected_option: Option<&'a str>,
    pub(crate) text_answer: Option<&'a str>,
    pub(crate) is_correct: bool,
    pub(crate) points_earned: f64,
    pub(crate) time_spent_seconds: Option<i32>,
    pub(crate) now: PrimitiveDateTime,
}

/// Inserts or regrades the answer for (attempt, question). Stored time spent only grows.
pub(crate) async fn upsert(
    executor: impl sqlx::PgExecutor<'_>,
    params: UpsertAnswer<'_>,
) -> Result<Answer, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "INSERT INTO answers (
            id, attempt_id, question_id, selected_option, text_answer, is_correct,
            points_earned, time_spent_seconds, answered_at, updated_at
         ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$9)
         ON CONFLICT (attempt_id, question_id) DO UPDATE
         SET selected_option = EXCLUDED.selected_option,
             text_answer = EXCLUDED.text_answer,
             is_correct = EXCLUDED.is_correct,
             points_earned = EXCLUDED.points_earned,
             time_spent_seconds = CASE
                WHEN EXCLUDED.time_spent_seconds IS NULL THEN answers.time_spent_seconds
                ELSE GREATEST(COALESCE(answers.time_spent_seconds, 0), EXCLUDED.time_spent_seconds)
             END,
             updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.attempt_id)
    .bind(params.question_id)
    .bind(params.selected_option)
    .bind(params.text_answer)
    .bind(params.is_correct)
    .bind(params.points_earned)
    .bind(params.time_spent_seconds)
    .bind(params.now)
    .fetch_one(executor)
    .await
}

pub(crate) async fn list_by_attempt(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
) -> Result<Vec<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(
        "SELECT a.id, a.attempt_id, a.question_id, a.selected_option, a.text_answer,
                a.is_correct, a.points_earned, a.time_spent_seconds, a.answered_at, a.updated_at
         FROM answers a
         JOIN questions q ON q.id = a.question_id
         WHERE a.attempt_id = $1
         ORDER BY q.order_index, a.id",
    )
    .bind(attempt_id)
    .fetch_all(executor)
    .await
}
