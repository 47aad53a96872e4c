use serde::Serialize;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Answer, Attempt, Exercise, Question};
use crate::repositories;
use crate::services::errors::PipelineError;

#[derive(Debug, Clone)]
pub(crate) struct AttemptResult {
    pub(crate) attempt: Attempt,
    pub(crate) exercise: Exercise,
    pub(crate) answers: Vec<Answer>,
    pub(crate) performance_stats: PerformanceStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct PerformanceStats {
    pub(crate) total_questions: i32,
    pub(crate) answered: i32,
    pub(crate) correct: i32,
    pub(crate) incorrect: i32,
    pub(crate) unanswered: i32,
    /// Correct answers over answered questions, as a percentage.
    pub(crate) accuracy: f64,
    pub(crate) total_time_seconds: i32,
    pub(crate) average_time_per_answer_seconds: Option<f64>,
    pub(crate) passed: Option<bool>,
}

pub(crate) async fn start_attempt(
    state: &AppState,
    user_id: &str,
    exercise_id: &str,
) -> Result<Attempt, PipelineError> {
    let exercise = repositories::exercises::find_by_id(state.db(), exercise_id)
        .await?
        .ok_or(PipelineError::NotFound("Exercise not found"))?;

    let attempt_id = Uuid::new_v4().to_string();
    let attempt = repositories::attempts::create_with_next_number(
        state.db(),
        &attempt_id,
        user_id,
        &exercise.id,
        primitive_now_utc(),
    )
    .await?;

    metrics::counter!("attempts_started_total", "skill" => exercise.skill.as_str()).increment(1);
    tracing::info!(
        attempt_id = %attempt.id,
        exercise_id = %exercise.id,
        skill = exercise.skill.as_str(),
        attempt_number = attempt.attempt_number,
        "Attempt started"
    );

    Ok(attempt)
}

pub(crate) async fn get_result(
    state: &AppState,
    user_id: &str,
    attempt_id: &str,
) -> Result<AttemptResult, PipelineError> {
    let attempt = repositories::attempts::find_by_id(state.db(), attempt_id)
        .await?
        .filter(|attempt| attempt.user_id == user_id)
        .ok_or(PipelineError::NotFound("Attempt not found"))?;

    let exercise = repositories::exercises::find_by_id(state.db(), &attempt.exercise_id)
        .await?
        .ok_or(PipelineError::NotFound("Exercise not found"))?;

    let questions = repositories::exercises::list_questions(state.db(), &exercise.id).await?;
    let answers = repositories::answers::list_by_attempt(state.db(), attempt_id).await?;
    let performance_stats = performance_stats(&exercise, &questions, &attempt, &answers);

    Ok(AttemptResult { attempt, exercise, answers, performance_stats })
}

/// `passing_score` is compared with the percentage score for listening and reading and
/// with the band for writing and speaking.
pub(crate) fn performance_stats(
    exercise: &Exercise,
    questions: &[Question],
    attempt: &Attempt,
    answers: &[Answer],
) -> PerformanceStats {
    let total_questions = if questions.is_empty() {
        exercise.total_questions.max(0)
    } else {
        questions.len() as i32
    };

    let answered = answers.len() as i32;
    let correct = answers.iter().filter(|answer| answer.is_correct).count() as i32;
    let incorrect = answered - correct;
    let unanswered = (total_questions - answered).max(0);

    let accuracy = if answered > 0 {
        (f64::from(correct) / f64::from(answered) * 10_000.0).round() / 100.0
    } else {
        0.0
    };

    let per_answer: Vec<i32> =
        answers.iter().filter_map(|answer| answer.time_spent_seconds).collect();
    let answer_time: i32 = per_answer.iter().sum();
    let total_time_seconds = attempt.time_spent_seconds.unwrap_or(answer_time);
    let average_time_per_answer_seconds = (!per_answer.is_empty())
        .then(|| f64::from(answer_time) / per_answer.len() as f64);

    let achieved =
        if exercise.skill.is_objective() { attempt.score } else { attempt.band_score };
    let passed = exercise
        .passing_score
        .zip(achieved)
        .map(|(threshold, achieved)| achieved >= threshold);

    PerformanceStats {
        total_questions,
        answered,
        correct,
        incorrect,
        unanswered,
        accuracy,
        total_time_seconds,
        average_time_per_answer_seconds,
        passed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::Json;
    use time::macros::datetime;

    use crate::db::types::{AttemptStatus, QuestionKind, SkillType, SyncStatus};

    fn exercise(skill: SkillType, passing_score: Option<f64>) -> Exercise {
        Exercise {
            id: "ex-1".to_string(),
            title: "Listening Practice".to_string(),
            slug: "listening-practice".to_string(),
            skill,
            test_variant: None,
            is_official_test: false,
            total_questions: 4,
            total_points: 4.0,
            passing_score,
            time_limit_minutes: Some(30),
            prompt_text: None,
            writing_task_type: None,
            speaking_part: None,
            completed_attempts: 0,
            average_band: None,
            created_at: datetime!(2025-01-01 00:00),
            updated_at: datetime!(2025-01-01 00:00),
        }
    }

    fn question(id: &str) -> Question {
        Question {
            id: id.to_string(),
            exercise_id: "ex-1".to_string(),
            order_index: 0,
            kind: QuestionKind::Choice,
            correct_option: Some("A".to_string()),
            accepted_answers: Json(Vec::new()),
            points: 1.0,
            created_at: datetime!(2025-01-01 00:00),
        }
    }

    fn answer(question_id: &str, is_correct: bool, seconds: Option<i32>) -> Answer {
        Answer {
            id: format!("ans-{question_id}"),
            attempt_id: "att-1".to_string(),
            question_id: question_id.to_string(),
            selected_option: Some("A".to_string()),
            text_answer: None,
            is_correct,
            points_earned: if is_correct { 1.0 } else { 0.0 },
            time_spent_seconds: seconds,
            answered_at: datetime!(2025-01-01 00:00),
            updated_at: datetime!(2025-01-01 00:00),
        }
    }

    fn attempt(score: Option<f64>, band: Option<f64>, time_spent: Option<i32>) -> Attempt {
        Attempt {
            id: "att-1".to_string(),
            user_id: "learner-1".to_string(),
            exercise_id: "ex-1".to_string(),
            attempt_number: 1,
            status: AttemptStatus::Completed,
            started_at: datetime!(2025-01-01 00:00),
            completed_at: Some(datetime!(2025-01-01 00:20)),
            time_spent_seconds: time_spent,
            raw_correct: None,
            raw_total: None,
            score,
            band_score: band,
            essay_text: None,
            word_count: None,
            audio_url: None,
            audio_duration_seconds: None,
            payload_hash: None,
            evaluation_status: None,
            evaluation_stage: None,
            evaluation_started_at: None,
            evaluated_at: None,
            evaluation_duration_seconds: None,
            evaluation_error: None,
            transcript: None,
            criteria_scores: None,
            feedback: None,
            sync_status: SyncStatus::Pending,
            sync_attempts: 0,
            sync_last_attempt_at: None,
            sync_last_error: None,
            synced_at: None,
            created_at: datetime!(2025-01-01 00:00),
            updated_at: datetime!(2025-01-01 00:20),
        }
    }

    #[test]
    fn counts_answered_correct_and_unanswered() {
        let questions = vec![question("q1"), question("q2"), question("q3"), question("q4")];
        let answers = vec![
            answer("q1", true, Some(30)),
            answer("q2", false, Some(50)),
            answer("q3", true, None),
        ];

        let stats = performance_stats(
            &exercise(SkillType::Listening, Some(60.0)),
            &questions,
            &attempt(Some(50.0), Some(5.0), Some(1200)),
            &answers,
        );

        assert_eq!(stats.total_questions, 4);
        assert_eq!(stats.answered, 3);
        assert_eq!(stats.correct, 2);
        assert_eq!(stats.incorrect, 1);
        assert_eq!(stats.unanswered, 1);
        assert_eq!(stats.accuracy, 66.67);
        assert_eq!(stats.total_time_seconds, 1200);
        assert_eq!(stats.average_time_per_answer_seconds, Some(40.0));
        assert_eq!(stats.passed, Some(false));
    }

    #[test]
    fn free_form_pass_flag_uses_the_band() {
        let stats = performance_stats(
            &exercise(SkillType::Writing, Some(6.5)),
            &[],
            &attempt(None, Some(7.0), None),
            &[],
        );

        assert_eq!(stats.total_questions, 4);
        assert_eq!(stats.answered, 0);
        assert_eq!(stats.accuracy, 0.0);
        assert_eq!(stats.total_time_seconds, 0);
        assert_eq!(stats.average_time_per_answer_seconds, None);
        assert_eq!(stats.passed, Some(true));
    }

    #[test]
    fn pass_flag_is_absent_without_threshold() {
        let stats = performance_stats(
            &exercise(SkillType::Reading, None),
            &[question("q1")],
            &attempt(Some(100.0), Some(9.0), None),
            &[answer("q1", true, Some(10))],
        );
        assert_eq!(stats.passed, None);
        assert_eq!(stats.total_time_seconds, 10);
    }
}
