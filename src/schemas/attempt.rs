use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Answer, Attempt, CriterionScore, Exercise};
use crate::db::types::{
    AttemptStatus, EvaluationStage, EvaluationStatus, SkillType, SyncStatus, TestVariant,
};
use crate::services::attempts::PerformanceStats;
use crate::services::evaluation::FreeFormPayload;
use crate::services::grading::{SubmitAnswers, SubmittedAnswer};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AnswerPayload {
    #[validate(length(min = 1, max = 64, message = "question_id must not be empty"))]
    pub(crate) question_id: String,
    #[serde(default)]
    #[validate(length(max = 32, message = "selected_option is too long"))]
    pub(crate) selected_option: Option<String>,
    #[serde(default)]
    #[validate(length(max = 500, message = "text_answer is too long"))]
    pub(crate) text_answer: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, message = "time_spent_seconds must be non-negative"))]
    pub(crate) time_spent_seconds: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SubmitAnswersRequest {
    #[validate(nested)]
    pub(crate) answers: Vec<AnswerPayload>,
    #[serde(default)]
    #[validate(range(min = 0, message = "time_spent_seconds must be non-negative"))]
    pub(crate) time_spent_seconds: Option<i32>,
}

impl From<SubmitAnswersRequest> for SubmitAnswers {
    fn from(request: SubmitAnswersRequest) -> Self {
        Self {
            answers: request
                .answers
                .into_iter()
                .map(|answer| SubmittedAnswer {
                    question_id: answer.question_id,
                    selected_option: answer.selected_option,
                    text_answer: answer.text_answer,
                    time_spent_seconds: answer.time_spent_seconds,
                })
                .collect(),
            time_spent_seconds: request.time_spent_seconds,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SubmitFreeFormRequest {
    #[serde(default)]
    #[validate(length(max = 20000, message = "essay_text is too long"))]
    pub(crate) essay_text: Option<String>,
    #[serde(default)]
    #[validate(url(message = "audio_url must be a valid URL"))]
    pub(crate) audio_url: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "audio_duration_seconds must be non-negative"))]
    pub(crate) audio_duration_seconds: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 0, message = "time_spent_seconds must be non-negative"))]
    pub(crate) time_spent_seconds: Option<i32>,
}

impl From<SubmitFreeFormRequest> for FreeFormPayload {
    fn from(request: SubmitFreeFormRequest) -> Self {
        Self {
            essay_text: request.essay_text,
            audio_url: request.audio_url,
            audio_duration_seconds: request.audio_duration_seconds,
            time_spent_seconds: request.time_spent_seconds,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResponse {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) exercise_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: String,
    pub(crate) completed_at: Option<String>,
    pub(crate) time_spent_seconds: Option<i32>,
    pub(crate) raw_correct: Option<i32>,
    pub(crate) raw_total: Option<i32>,
    pub(crate) score: Option<f64>,
    pub(crate) band_score: Option<f64>,
    pub(crate) word_count: Option<i32>,
    pub(crate) evaluation_status: Option<EvaluationStatus>,
    pub(crate) evaluation_stage: Option<EvaluationStage>,
    pub(crate) evaluated_at: Option<String>,
    pub(crate) evaluation_error: Option<String>,
    pub(crate) transcript: Option<String>,
    pub(crate) criteria_scores: Option<Vec<CriterionScore>>,
    pub(crate) feedback: Option<String>,
    pub(crate) sync_status: SyncStatus,
}

impl From<Attempt> for AttemptResponse {
    fn from(attempt: Attempt) -> Self {
        Self {
            id: attempt.id,
            user_id: attempt.user_id,
            exercise_id: attempt.exercise_id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            started_at: format_primitive(attempt.started_at),
            completed_at: attempt.completed_at.map(format_primitive),
            time_spent_seconds: attempt.time_spent_seconds,
            raw_correct: attempt.raw_correct,
            raw_total: attempt.raw_total,
            score: attempt.score,
            band_score: attempt.band_score,
            word_count: attempt.word_count,
            evaluation_status: attempt.evaluation_status,
            evaluation_stage: attempt.evaluation_stage,
            evaluated_at: attempt.evaluated_at.map(format_primitive),
            evaluation_error: attempt.evaluation_error,
            transcript: attempt.transcript,
            criteria_scores: attempt.criteria_scores.map(|scores| scores.0),
            feedback: attempt.feedback,
            sync_status: attempt.sync_status,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct FreeFormAcceptedResponse {
    pub(crate) attempt: AttemptResponse,
    pub(crate) duplicate: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExerciseSummary {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) slug: String,
    pub(crate) skill: SkillType,
    pub(crate) test_variant: Option<TestVariant>,
    pub(crate) is_official_test: bool,
    pub(crate) total_questions: i32,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) passing_score: Option<f64>,
}

impl From<Exercise> for ExerciseSummary {
    fn from(exercise: Exercise) -> Self {
        Self {
            id: exercise.id,
            title: exercise.title,
            slug: exercise.slug,
            skill: exercise.skill,
            test_variant: exercise.test_variant,
            is_official_test: exercise.is_official_test,
            total_questions: exercise.total_questions,
            time_limit_minutes: exercise.time_limit_minutes,
            passing_score: exercise.passing_score,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) question_id: String,
    pub(crate) selected_option: Option<String>,
    pub(crate) text_answer: Option<String>,
    pub(crate) is_correct: bool,
    pub(crate) points_earned: f64,
    pub(crate) time_spent_seconds: Option<i32>,
    pub(crate) answered_at: String,
}

impl From<Answer> for AnswerResponse {
    fn from(answer: Answer) -> Self {
        Self {
            question_id: answer.question_id,
            selected_option: answer.selected_option,
            text_answer: answer.text_answer,
            is_correct: answer.is_correct,
            points_earned: answer.points_earned,
            time_spent_seconds: answer.time_spent_seconds,
            answered_at: format_primitive(answer.answered_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResultResponse {
    pub(crate) attempt: AttemptResponse,
    pub(crate) exercise: ExerciseSummary,
    pub(crate) answers: Vec<AnswerResponse>,
    pub(crate) performance_stats: PerformanceStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn negative_time_is_rejected() {
        let request: SubmitAnswersRequest = serde_json::from_value(json!({
            "answers": [{"question_id": "q1", "selected_option": "A", "time_spent_seconds": -5}]
        }))
        .expect("deserialize");

        assert!(request.validate().is_err());
    }

    #[test]
    fn malformed_audio_url_is_rejected() {
        let request: SubmitFreeFormRequest =
            serde_json::from_value(json!({"audio_url": "not a url"})).expect("deserialize");
        assert!(request.validate().is_err());

        let request: SubmitFreeFormRequest =
            serde_json::from_value(json!({"audio_url": "https://cdn.test/answer.mp3"}))
                .expect("deserialize");
        assert!(request.validate().is_ok());
    }
}
