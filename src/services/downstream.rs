use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::core::config::DownstreamSettings;
use crate::services::external::{ExternalError, OfficialResult, PracticeActivity, ScoreRecorder};

const SERVICE: &str = "downstream";
pub(crate) const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Client for the progress service that keeps the learner's score history.
#[derive(Debug, Clone)]
pub(crate) struct ProgressClient {
    client: Client,
    base_url: String,
    service_token: String,
}

impl ProgressClient {
    pub(crate) fn new(settings: &DownstreamSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .context("Failed to build downstream HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            service_token: settings.service_token.clone(),
        })
    }

    async fn post<T: Serialize + Sync>(&self, route: &str, body: &T) -> Result<(), ExternalError> {
        if self.base_url.is_empty() {
            return Err(ExternalError::NotConfigured { service: SERVICE });
        }

        let response = self
            .client
            .post(format!("{}{route}", self.base_url))
            .header(INTERNAL_TOKEN_HEADER, &self.service_token)
            .json(body)
            .send()
            .await
            .map_err(|err| ExternalError::from_reqwest(SERVICE, err))?;

        if !response.status().is_success() {
            return Err(ExternalError::from_response(SERVICE, response).await);
        }

        Ok(())
    }
}

#[async_trait]
impl ScoreRecorder for ProgressClient {
    async fn record_official(&self, result: &OfficialResult) -> Result<(), ExternalError> {
        self.post("/internal/progress/official-results", result).await
    }

    async fn record_practice(&self, activity: &PracticeActivity) -> Result<(), ExternalError> {
        self.post("/internal/progress/practice-activities", activity).await
    }
}
