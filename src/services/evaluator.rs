use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::core::config::EvaluationSettings;
use crate::db::models::CriterionScore;
use crate::services::band_score::clamp_criterion;
use crate::services::external::{
    EvaluationReport, Evaluator, ExternalError, SpeakingTask, WritingTask,
};

const SERVICE: &str = "evaluation";

pub(crate) const WRITING_CRITERIA: [&str; 4] = [
    "task_response",
    "coherence_and_cohesion",
    "lexical_resource",
    "grammatical_range_and_accuracy",
];

pub(crate) const SPEAKING_CRITERIA: [&str; 4] = [
    "fluency_and_coherence",
    "lexical_resource",
    "grammatical_range_and_accuracy",
    "pronunciation",
];

const WRITING_SYSTEM_PROMPT: &str = r#"You are a certified examiner for an English proficiency test.
Assess the candidate's essay against the four public writing band descriptors and score each
criterion on the 0-9 scale in steps of 0.5.

Criteria (use these exact keys):
- task_response: how fully and relevantly the task is addressed
- coherence_and_cohesion: organisation, paragraphing, linking
- lexical_resource: range and accuracy of vocabulary
- grammatical_range_and_accuracy: range and accuracy of structures

Respond with strict JSON only:
{
  "overall_band": <number>,
  "criteria": {
    "task_response": <number>,
    "coherence_and_cohesion": <number>,
    "lexical_resource": <number>,
    "grammatical_range_and_accuracy": <number>
  },
  "feedback": "<actionable feedback for the candidate>"
}
"#;

const SPEAKING_SYSTEM_PROMPT: &str = r#"You are a certified examiner for an English proficiency test.
Assess the transcript of the candidate's spoken answer against the four public speaking band
descriptors and score each criterion on the 0-9 scale in steps of 0.5. Pronunciation must be
inferred from the transcript and the delivery statistics provided.

Criteria (use these exact keys):
- fluency_and_coherence
- lexical_resource
- grammatical_range_and_accuracy
- pronunciation

Respond with strict JSON only:
{
  "overall_band": <number>,
  "criteria": {
    "fluency_and_coherence": <number>,
    "lexical_resource": <number>,
    "grammatical_range_and_accuracy": <number>,
    "pronunciation": <number>
  },
  "feedback": "<actionable feedback for the candidate>"
}
"#;

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    overall_band: Option<f64>,
    criteria: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    feedback: String,
}

/// OpenAI-compatible chat-completions client returning strict JSON verdicts.
#[derive(Debug, Clone)]
pub(crate) struct EvaluationClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl EvaluationClient {
    pub(crate) fn new(settings: &EvaluationSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .context("Failed to build evaluation HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: String,
        criteria: &[&str; 4],
    ) -> Result<EvaluationReport, ExternalError> {
        if self.base_url.is_empty() {
            return Err(ExternalError::NotConfigured { service: SERVICE });
        }

        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "max_completion_tokens": self.max_tokens,
            "temperature": self.temperature,
            "response_format": {"type": "json_object"}
        });

        let timer = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ExternalError::from_reqwest(SERVICE, err))?;

        if !response.status().is_success() {
            return Err(ExternalError::from_response(SERVICE, response).await);
        }

        let body: ChatCompletion =
            response.json().await.map_err(|err| ExternalError::from_reqwest(SERVICE, err))?;

        let content = body
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| ExternalError::InvalidResponse {
                service: SERVICE,
                message: "missing completion content".to_string(),
            })?;

        let report = parse_verdict(content, criteria)?;

        tracing::info!(
            model = %self.model,
            duration_seconds = timer.elapsed().as_secs_f64(),
            tokens_used = body.usage.and_then(|usage| usage.total_tokens),
            "Evaluation completed"
        );

        Ok(report)
    }
}

#[async_trait]
impl Evaluator for EvaluationClient {
    async fn evaluate_writing(&self, task: &WritingTask) -> Result<EvaluationReport, ExternalError> {
        let user_prompt = format!(
            "Task type: {}\n\nTask prompt:\n{}\n\nCandidate essay:\n{}\n",
            task.task_type.as_deref().unwrap_or("unspecified"),
            task.prompt.as_deref().unwrap_or("(not provided)"),
            task.essay
        );

        self.complete(WRITING_SYSTEM_PROMPT, user_prompt, &WRITING_CRITERIA).await
    }

    async fn evaluate_speaking(
        &self,
        task: &SpeakingTask,
    ) -> Result<EvaluationReport, ExternalError> {
        let duration = task
            .duration_seconds
            .map(|seconds| format!("{seconds:.1} seconds"))
            .unwrap_or_else(|| "unknown".to_string());
        let part = task.part.map(|part| part.to_string()).unwrap_or_else(|| "unspecified".into());

        let user_prompt = format!(
            "Speaking part: {part}\nWord count: {}\nDuration: {duration}\n\nQuestion prompt:\n{}\n\nTranscript:\n{}\n",
            task.word_count,
            task.prompt.as_deref().unwrap_or("(not provided)"),
            task.transcript
        );

        self.complete(SPEAKING_SYSTEM_PROMPT, user_prompt, &SPEAKING_CRITERIA).await
    }
}

fn parse_verdict(content: &str, criteria: &[&str; 4]) -> Result<EvaluationReport, ExternalError> {
    let verdict: Verdict =
        serde_json::from_str(content.trim()).map_err(|err| ExternalError::InvalidResponse {
            service: SERVICE,
            message: format!("verdict is not valid JSON: {err}"),
        })?;

    let mut scores = Vec::with_capacity(criteria.len());
    for name in criteria {
        let score = verdict.criteria.get(*name).and_then(|value| value.as_f64()).ok_or_else(
            || ExternalError::InvalidResponse {
                service: SERVICE,
                message: format!("criterion '{name}' is missing or not a number"),
            },
        )?;
        scores.push(CriterionScore { name: (*name).to_string(), score: clamp_criterion(score) });
    }

    Ok(EvaluationReport {
        overall_band: verdict.overall_band,
        criteria: scores,
        feedback: verdict.feedback,
    })
}
