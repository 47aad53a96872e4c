use time::PrimitiveDateTime;

use crate::db::models::{Exercise, Question};

pub(crate) const COLUMNS: &str = "\
    id, title, slug, skill, test_variant, is_official_test, total_questions, total_points, \
    passing_score, time_limit_minutes, prompt_text, writing_task_type, speaking_part, \
    completed_attempts, average_band, created_at, updated_at";

const QUESTION_COLUMNS: &str =
    "id, exercise_id, order_index, kind, correct_option, accepted_answers, points, created_at";

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Exercise>, sqlx::Error> {
    sqlx::query_as::<_, Exercise>(&format!("SELECT {COLUMNS} FROM exercises WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn list_questions(
    executor: impl sqlx::PgExecutor<'_>,
    exercise_id: &str,
) -> Result<Vec<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {QUESTION_COLUMNS}
         FROM questions
         WHERE exercise_id = $1
         ORDER BY order_index, id"
    ))
    .bind(exercise_id)
    .fetch_all(executor)
    .await
}

/// Folds one finished attempt into the exercise's completion count and running
/// average band. Right-hand sides see the pre-update row.
pub(crate) async fn record_completion(
    executor: impl sqlx::PgExecutor<'_>,
    exercise_id: &str,
    band_score: Option<f64>,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE exercises
         SET completed_attempts = completed_attempts + 1,
             average_band = CASE
                WHEN $1::float8 IS NULL THEN average_band
                WHEN average_band IS NULL THEN $1::float8
                ELSE (average_band * completed_attempts + $1::float8) / (completed_attempts + 1)
             END,
             updated_at = $2
         WHERE id = $3",
    )
    .bind(band_score)
    .bind(now)
    .bind(exercise_id)
    .execute(executor)
    .await?;

    Ok(())
}
