use time::PrimitiveDateTime;

use crate::db::models::CriterionScore;
use crate::db::types::{SkillType, TestVariant};

pub(crate) const COLUMNS: &str = "\
    id, user_id, exercise_id, attempt_number, status, started_at, completed_at, \
    time_spent_seconds, raw_correct, raw_total, score, band_score, essay_text, word_count, \
    audio_url, audio_duration_seconds, payload_hash, evaluation_status, evaluation_stage, \
    evaluation_started_at, evaluated_at, evaluation_duration_seconds, evaluation_error, \
    transcript, criteria_scores, feedback, sync_status, sync_attempts, sync_last_attempt_at, \
    sync_last_error, synced_at, created_at, updated_at";

pub(crate) struct ObjectiveFinalization {
    pub(crate) score: f64,
    pub(crate) raw_correct: i32,
    pub(crate) raw_total: i32,
    pub(crate) band_score: f64,
    pub(crate) time_spent_seconds: Option<i32>,
    pub(crate) completed_at: PrimitiveDateTime,
}

pub(crate) struct FreeFormSubmission<'a> {
    pub(crate) essay_text: Option<&'a str>,
    pub(crate) word_count: Option<i32>,
    pub(crate) audio_url: Option<&'a str>,
    pub(crate) audio_duration_seconds: Option<f64>,
    pub(crate) payload_hash: &'a str,
    pub(crate) time_spent_seconds: Option<i32>,
    pub(crate) submitted_at: PrimitiveDateTime,
}

pub(crate) struct EvaluationOutcome {
    pub(crate) transcript: Option<String>,
    pub(crate) audio_duration_seconds: Option<f64>,
    pub(crate) criteria: Vec<CriterionScore>,
    pub(crate) band_score: f64,
    pub(crate) feedback: String,
    pub(crate) evaluated_at: PrimitiveDateTime,
    pub(crate) duration_seconds: f64,
}

/// Everything needed to deliver one attempt's result downstream.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct SyncTarget {
    pub(crate) attempt_id: String,
    pub(crate) user_id: String,
    pub(crate) exercise_id: String,
    pub(crate) skill: SkillType,
    pub(crate) test_variant: Option<TestVariant>,
    pub(crate) slug: String,
    pub(crate) title: String,
    pub(crate) is_official_test: bool,
    pub(crate) raw_correct: Option<i32>,
    pub(crate) raw_total: Option<i32>,
    pub(crate) band_score: Option<f64>,
    pub(crate) time_spent_seconds: Option<i32>,
    pub(crate) sync_attempts: i32,
}

pub(crate) const SYNC_TARGET_SELECT: &str = "\
    SELECT a.id AS attempt_id, a.user_id, a.exercise_id, e.skill, e.test_variant, e.slug, \
           e.title, e.is_official_test, a.raw_correct, a.raw_total, a.band_score, \
           a.time_spent_seconds, a.sync_attempts \
    FROM attempts a \
    JOIN exercises e ON e.id = a.exercise_id";
