use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{
    AttemptStatus, EvaluationStage, EvaluationStatus, QuestionKind, SkillType, SyncStatus,
    TestVariant,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Exercise {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) slug: String,
    pub(crate) skill: SkillType,
    pub(crate) test_variant: Option<TestVariant>,
    pub(crate) is_official_test: bool,
    pub(crate) total_questions: i32,
    pub(crate) total_points: f64,
    pub(crate) passing_score: Option<f64>,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) prompt_text: Option<String>,
    pub(crate) writing_task_type: Option<String>,
    pub(crate) speaking_part: Option<i32>,
    pub(crate) completed_attempts: i32,
    pub(crate) average_band: Option<f64>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) exercise_id: String,
    pub(crate) order_index: i32,
    pub(crate) kind: QuestionKind,
    pub(crate) correct_option: Option<String>,
    pub(crate) accepted_answers: Json<Vec<String>>,
    pub(crate) points: f64,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Attempt {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) exercise_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: PrimitiveDateTime,
    /// Set once when the learner finishes; AI completion goes to `evaluated_at`.
    pub(crate) completed_at: Option<PrimitiveDateTime>,
    pub(crate) time_spent_seconds: Option<i32>,
    pub(crate) raw_correct: Option<i32>,
    pub(crate) raw_total: Option<i32>,
    pub(crate) score: Option<f64>,
    pub(crate) band_score: Option<f64>,
    pub(crate) essay_text: Option<String>,
    pub(crate) word_count: Option<i32>,
    pub(crate) audio_url: Option<String>,
    pub(crate) audio_duration_seconds: Option<f64>,
    pub(crate) payload_hash: Option<String>,
    pub(crate) evaluation_status: Option<EvaluationStatus>,
    pub(crate) evaluation_stage: Option<EvaluationStage>,
    pub(crate) evaluation_started_at: Option<PrimitiveDateTime>,
    pub(crate) evaluated_at: Option<PrimitiveDateTime>,
    pub(crate) evaluation_duration_seconds: Option<f64>,
    pub(crate) evaluation_error: Option<String>,
    pub(crate) transcript: Option<String>,
    pub(crate) criteria_scores: Option<Json<Vec<CriterionScore>>>,
    pub(crate) feedback: Option<String>,
    pub(crate) sync_status: SyncStatus,
    pub(crate) sync_attempts: i32,
    pub(crate) sync_last_attempt_at: Option<PrimitiveDateTime>,
    pub(crate) sync_last_error: Option<String>,
    pub(crate) synced_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Answer {
    pub(crate) id: String,
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) selected_option: Option<String>,
    pub(crate) text_answer: Option<String>,
    pub(crate) is_correct: bool,
    pub(crate) points_earned: f64,
    pub(crate) time_spent_seconds: Option<i32>,
    pub(crate) answered_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CriterionScore {
    pub(crate) name: String,
    pub(crate) score: f64,
}
