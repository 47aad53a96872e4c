//! Synchronous grading of listening and reading attempts.

use std::collections::{HashMap, HashSet};

use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::{primitive_now_utc, seconds_between};
use crate::db::models::{Answer, Attempt, Exercise, Question};
use crate::db::types::{AttemptStatus, QuestionKind};
use crate::repositories;
use crate::services::band_score::{self, Performance};
use crate::services::errors::PipelineError;
use crate::tasks::pool::Job;

#[derive(Debug, Clone)]
pub(crate) struct SubmittedAnswer {
    pub(crate) question_id: String,
    pub(crate) selected_option: Option<String>,
    pub(crate) text_answer: Option<String>,
    pub(crate) time_spent_seconds: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GradedAnswer {
    pub(crate) is_correct: bool,
    pub(crate) points_earned: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ObjectiveSummary {
    pub(crate) raw_correct: i32,
    pub(crate) raw_total: i32,
    pub(crate) score: f64,
}

/// Lowercases and collapses internal whitespace so "  New   York " matches "new york".
pub(crate) fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub(crate) fn grade_answer(question: &Question, answer: &SubmittedAnswer) -> GradedAnswer {
    let is_correct = match question.kind {
        QuestionKind::Choice => match (&question.correct_option, &answer.selected_option) {
            (Some(expected), Some(selected)) => expected == selected,
            _ => false,
        },
        QuestionKind::Text => {
            let given = answer.text_answer.as_deref().map(normalize_text).unwrap_or_default();
            !given.is_empty()
                && question.accepted_answers.0.iter().any(|accepted| normalize_text(accepted) == given)
        }
    };

    GradedAnswer { is_correct, points_earned: if is_correct { question.points } else { 0.0 } }
}

/// Totals over every stored answer of the attempt, not just the latest request.
pub(crate) fn summarize(
    exercise: &Exercise,
    questions: &[Question],
    answers: &[Answer],
) -> ObjectiveSummary {
    let raw_total = if questions.is_empty() {
        exercise.total_questions.max(0)
    } else {
        questions.len() as i32
    };

    let question_points: f64 = questions.iter().map(|question| question.points).sum();
    let total_points = if question_points > 0.0 { question_points } else { exercise.total_points };

    let raw_correct = answers.iter().filter(|answer| answer.is_correct).count() as i32;
    let earned: f64 = answers.iter().map(|answer| answer.points_earned).sum();

    let score = if total_points > 0.0 {
        ((earned / total_points) * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    ObjectiveSummary { raw_correct: raw_correct.min(raw_total), raw_total, score }
}

/// Server-measured elapsed time wins; the client total only fills in when the server
/// delta is unusable. The result is capped at the exercise time limit.
pub(crate) fn resolve_time_spent(
    started_at: PrimitiveDateTime,
    now: PrimitiveDateTime,
    client_total: Option<i32>,
    time_limit_minutes: Option<i32>,
) -> Option<i32> {
    let server_delta = seconds_between(started_at, now);

    let measured = if server_delta > 0 {
        Some(server_delta.min(i64::from(i32::MAX)) as i32)
    } else {
        client_total.filter(|seconds| *seconds > 0)
    }?;

    match time_limit_minutes.filter(|minutes| *minutes > 0) {
        Some(minutes) => {
            let limit = minutes.saturating_mul(60);
            if measured > limit {
                tracing::warn!(
                    time_spent_seconds = measured,
                    limit_seconds = limit,
                    "Time spent exceeds the exercise limit; capping"
                );
                Some(limit)
            } else {
                Some(measured)
            }
        }
        None => Some(measured),
    }
}

pub(crate) struct SubmitAnswers {
    pub(crate) answers: Vec<SubmittedAnswer>,
    pub(crate) time_spent_seconds: Option<i32>,
}

/// Grades and finalizes an objective attempt. Calling it again on a completed attempt
/// returns the stored result untouched.
pub(crate) async fn submit_answers(
    state: &AppState,
    user_id: &str,
    attempt_id: &str,
    request: SubmitAnswers,
) -> Result<Attempt, PipelineError> {
    let attempt = repositories::attempts::find_by_id(state.db(), attempt_id)
        .await?
        .filter(|attempt| attempt.user_id == user_id)
        .ok_or(PipelineError::NotFound("Attempt not found"))?;

    let exercise = repositories::exercises::find_by_id(state.db(), &attempt.exercise_id)
        .await?
        .ok_or(PipelineError::NotFound("Exercise not found"))?;

    if !exercise.skill.is_objective() {
        return Err(PipelineError::validation(format!(
            "{} attempts are submitted as free-form responses",
            exercise.skill.as_str()
        )));
    }

    if attempt.status == AttemptStatus::Completed {
        tracing::info!(attempt_id, "Attempt already completed; returning stored result");
        return Ok(attempt);
    }
    ensure_gradable(attempt.status)?;

    let questions = repositories::exercises::list_questions(state.db(), &exercise.id).await?;
    let questions_by_id: HashMap<&str, &Question> =
        questions.iter().map(|question| (question.id.as_str(), question)).collect();
    validate_answers(&request.answers, &questions_by_id)?;

    let now = primitive_now_utc();
    let mut tx = state.db().begin().await?;

    match repositories::attempts::lock_status(&mut tx, attempt_id).await? {
        Some(AttemptStatus::Completed) => {
            tx.rollback().await?;
            return repositories::attempts::find_by_id(state.db(), attempt_id)
                .await?
                .ok_or(PipelineError::NotFound("Attempt not found"));
        }
        Some(status) => ensure_gradable(status)?,
        None => return Err(PipelineError::NotFound("Attempt not found")),
    }

    for answer in &request.answers {
        let Some(question) = questions_by_id.get(answer.question_id.as_str()) else {
            continue;
        };
        let graded = grade_answer(question, answer);
        let answer_id = Uuid::new_v4().to_string();

        repositories::answers::upsert(
            &mut *tx,
            repositories::answers::UpsertAnswer {
                id: &answer_id,
                attempt_id,
                question_id: &answer.question_id,
                selected_option: answer.selected_option.as_deref(),
                text_answer: answer.text_answer.as_deref(),
                is_correct: graded.is_correct,
                points_earned: graded.points_earned,
                time_spent_seconds: answer.time_spent_seconds.filter(|seconds| *seconds >= 0),
                now,
            },
        )
        .await?;
    }

    let stored = repositories::answers::list_by_attempt(&mut *tx, attempt_id).await?;
    let summary = summarize(&exercise, &questions, &stored);

    let client_total = request.time_spent_seconds.or_else(|| {
        let per_answer: i32 = stored.iter().filter_map(|answer| answer.time_spent_seconds).sum();
        (per_answer > 0).then_some(per_answer)
    });
    let time_spent =
        resolve_time_spent(attempt.started_at, now, client_total, exercise.time_limit_minutes);

    let variant =
        band_score::resolve_variant(exercise.test_variant, &exercise.slug, &exercise.title);
    let band = band_score::to_band(
        exercise.skill,
        Performance::Raw { correct: summary.raw_correct, total: summary.raw_total },
        variant,
    );

    let finalized = repositories::attempts::finalize_objective(
        &mut tx,
        attempt_id,
        repositories::attempts::ObjectiveFinalization {
            score: summary.score,
            raw_correct: summary.raw_correct,
            raw_total: summary.raw_total,
            band_score: band,
            time_spent_seconds: time_spent,
            completed_at: now,
        },
    )
    .await?;

    if !finalized {
        tx.rollback().await?;
        return Err(PipelineError::conflict("Attempt can no longer be graded"));
    }

    repositories::exercises::record_completion(&mut *tx, &exercise.id, Some(band), now).await?;
    tx.commit().await?;

    metrics::counter!("objective_grading_total", "skill" => exercise.skill.as_str()).increment(1);
    tracing::info!(
        attempt_id,
        exercise_id = %exercise.id,
        skill = exercise.skill.as_str(),
        raw_correct = summary.raw_correct,
        raw_total = summary.raw_total,
        band_score = band,
        "Objective attempt graded"
    );

    state.jobs().submit(Job::Propagate { attempt_id: attempt_id.to_string() });

    repositories::attempts::find_by_id(state.db(), attempt_id)
        .await?
        .ok_or(PipelineError::NotFound("Attempt not found"))
}

fn ensure_gradable(status: AttemptStatus) -> Result<(), PipelineError> {
    match status {
        AttemptStatus::InProgress | AttemptStatus::Submitted | AttemptStatus::Completed => Ok(()),
        AttemptStatus::Failed | AttemptStatus::Abandoned => {
            Err(PipelineError::conflict("Attempt is closed and cannot be graded"))
        }
    }
}

fn validate_answers(
    answers: &[SubmittedAnswer],
    questions_by_id: &HashMap<&str, &Question>,
) -> Result<(), PipelineError> {
    if answers.is_empty() {
        return Err(PipelineError::validation("At least one answer is required"));
    }

    let mut seen = HashSet::new();
    for answer in answers {
        if !questions_by_id.contains_key(answer.question_id.as_str()) {
            return Err(PipelineError::validation(format!(
                "Question {} does not belong to this exercise",
                answer.question_id
            )));
        }
        if !seen.insert(answer.question_id.as_str()) {
            return Err(PipelineError::validation(format!(
                "Question {} is answered more than once",
                answer.question_id
            )));
        }
    }

    Ok(())
}
