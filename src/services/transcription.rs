use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::config::TranscriptionSettings;
use crate::services::external::{ExternalError, Transcriber, Transcription};

const SERVICE: &str = "transcription";

#[derive(Debug, Serialize)]
struct TranscriptionRequest<'a> {
    model: &'a str,
    audio_url: &'a str,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
    #[serde(default, alias = "duration_seconds")]
    duration: Option<f64>,
}

/// Speech-to-text client. The audio stays in object storage; only its URL is sent.
#[derive(Debug, Clone)]
pub(crate) struct TranscriptionClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl TranscriptionClient {
    pub(crate) fn new(settings: &TranscriptionSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .context("Failed to build transcription HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for TranscriptionClient {
    async fn transcribe(&self, audio_url: &str) -> Result<Transcription, ExternalError> {
        if self.base_url.is_empty() {
            return Err(ExternalError::NotConfigured { service: SERVICE });
        }

        let request =
            TranscriptionRequest { model: &self.model, audio_url, response_format: "verbose_json" };

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| ExternalError::from_reqwest(SERVICE, err))?;

        if !response.status().is_success() {
            return Err(ExternalError::from_response(SERVICE, response).await);
        }

        let body: TranscriptionResponse =
            response.json().await.map_err(|err| ExternalError::from_reqwest(SERVICE, err))?;

        Ok(Transcription { text: body.text.trim().to_string(), duration_seconds: body.duration })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::services::retry::Retryable;

    fn settings(base_url: &str) -> TranscriptionSettings {
        TranscriptionSettings {
            api_key: "stt-key".to_string(),
            base_url: base_url.to_string(),
            model: "whisper-1".to_string(),
            request_timeout_seconds: 5,
            min_transcript_words: 3,
        }
    }

    #[tokio::test]
    async fn returns_trimmed_text_and_duration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(body_partial_json(json!({"audio_url": "https://cdn.test/a.mp3"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"text": "  I live in a small town.  ", "duration": 4.2})),
            )
            .mount(&server)
            .await;

        let client = TranscriptionClient::new(&settings(&server.uri())).expect("client");
        let result = client.transcribe("https://cdn.test/a.mp3").await.expect("transcription");

        assert_eq!(result.text, "I live in a small town.");
        assert_eq!(result.duration_seconds, Some(4.2));
    }

    #[tokio::test]
    async fn unsupported_format_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(415).set_body_string("unsupported media"))
            .mount(&server)
            .await;

        let client = TranscriptionClient::new(&settings(&server.uri())).expect("client");
        let err = client.transcribe("https://cdn.test/a.flac").await.expect_err("should fail");

        assert!(matches!(err, ExternalError::Status { status: 415, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn empty_base_url_is_reported_as_not_configured() {
        let client = TranscriptionClient::new(&settings("")).expect("client");
        let err = client.transcribe("https://cdn.test/a.mp3").await.expect_err("should fail");
        assert!(matches!(err, ExternalError::NotConfigured { .. }));
    }
}
