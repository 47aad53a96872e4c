//! Outbound capabilities the pipeline depends on: transcription, AI evaluation,
//! the downstream progress store and the notification trigger. Each one is an
//! async trait so the orchestrator can run against mocks in tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::core::config::Settings;
use crate::db::models::CriterionScore;
use crate::db::types::SkillType;
use crate::services::downstream::ProgressClient;
use crate::services::evaluator::EvaluationClient;
use crate::services::notifications::NotificationClient;
use crate::services::retry::Retryable;
use crate::services::transcription::TranscriptionClient;

#[derive(Debug, Error)]
pub(crate) enum ExternalError {
    #[error("{service} request timed out")]
    Timeout { service: &'static str },
    #[error("{service} is unreachable: {message}")]
    Transport { service: &'static str, message: String },
    #[error("{service} returned HTTP {status}: {body}")]
    Status { service: &'static str, status: u16, body: String },
    #[error("{service} returned an unusable response: {message}")]
    InvalidResponse { service: &'static str, message: String },
    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },
}

impl ExternalError {
    pub(crate) fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { service }
        } else if err.is_decode() {
            Self::InvalidResponse { service, message: err.to_string() }
        } else {
            Self::Transport { service, message: err.to_string() }
        }
    }

    /// Reads the body of a non-success response into a `Status` error.
    pub(crate) async fn from_response(service: &'static str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Self::Status { service, status, body: truncate(body, 512) }
    }
}

impl Retryable for ExternalError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::InvalidResponse { .. } | Self::NotConfigured { .. } => false,
        }
    }
}

fn truncate(mut value: String, max_chars: usize) -> String {
    if let Some((index, _)) = value.char_indices().nth(max_chars) {
        value.truncate(index);
    }
    value
}

#[derive(Debug, Clone)]
pub(crate) struct Transcription {
    pub(crate) text: String,
    pub(crate) duration_seconds: Option<f64>,
}

#[derive(Debug, Clone)]
pub(crate) struct WritingTask {
    pub(crate) essay: String,
    pub(crate) task_type: Option<String>,
    pub(crate) prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct SpeakingTask {
    pub(crate) transcript: String,
    pub(crate) prompt: Option<String>,
    pub(crate) part: Option<i32>,
    pub(crate) word_count: usize,
    pub(crate) duration_seconds: Option<f64>,
}

/// What the evaluator returned. `overall_band` is advisory; the stored band is
/// always recomputed from the criteria.
#[derive(Debug, Clone)]
pub(crate) struct EvaluationReport {
    pub(crate) overall_band: Option<f64>,
    pub(crate) criteria: Vec<CriterionScore>,
    pub(crate) feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct OfficialResult {
    pub(crate) user_id: String,
    pub(crate) skill: SkillType,
    pub(crate) test_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) raw_score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) raw_total: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) band_score: Option<f64>,
    pub(crate) source_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct PracticeActivity {
    pub(crate) user_id: String,
    pub(crate) skill: SkillType,
    pub(crate) band_score: Option<f64>,
    pub(crate) time_spent_seconds: Option<i32>,
    pub(crate) source_ref: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Notification {
    pub(crate) user_id: String,
    pub(crate) title: String,
    pub(crate) message: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) payload: serde_json::Value,
}

#[async_trait]
pub(crate) trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> Result<Transcription, ExternalError>;
}

#[async_trait]
pub(crate) trait Evaluator: Send + Sync {
    async fn evaluate_writing(&self, task: &WritingTask) -> Result<EvaluationReport, ExternalError>;

    async fn evaluate_speaking(
        &self,
        task: &SpeakingTask,
    ) -> Result<EvaluationReport, ExternalError>;
}

#[async_trait]
pub(crate) trait ScoreRecorder: Send + Sync {
    async fn record_official(&self, result: &OfficialResult) -> Result<(), ExternalError>;

    async fn record_practice(&self, activity: &PracticeActivity) -> Result<(), ExternalError>;
}

#[async_trait]
pub(crate) trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), ExternalError>;
}

#[derive(Clone)]
pub(crate) struct Capabilities {
    pub(crate) transcriber: Arc<dyn Transcriber>,
    pub(crate) evaluator: Arc<dyn Evaluator>,
    pub(crate) recorder: Arc<dyn ScoreRecorder>,
    pub(crate) notifier: Arc<dyn Notifier>,
}

impl Capabilities {
    /// HTTP-backed implementations of every capability.
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            transcriber: Arc::new(TranscriptionClient::new(settings.transcription())?),
            evaluator: Arc::new(EvaluationClient::new(settings.evaluation())?),
            recorder: Arc::new(ProgressClient::new(settings.downstream())?),
            notifier: Arc::new(NotificationClient::new(settings.notifications())?),
        })
    }
}
