use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::core::config::NotificationSettings;
use crate::services::downstream::INTERNAL_TOKEN_HEADER;
use crate::services::external::{ExternalError, Notification, Notifier};

const SERVICE: &str = "notifications";

#[derive(Debug, Clone)]
pub(crate) struct NotificationClient {
    client: Client,
    base_url: String,
    service_token: String,
}

impl NotificationClient {
    pub(crate) fn new(settings: &NotificationSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .context("Failed to build notification HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            service_token: settings.service_token.clone(),
        })
    }
}

#[async_trait]
impl Notifier for NotificationClient {
    async fn notify(&self, notification: &Notification) -> Result<(), ExternalError> {
        if self.base_url.is_empty() {
            return Err(ExternalError::NotConfigured { service: SERVICE });
        }

        let response = self
            .client
            .post(format!("{}/internal/notifications", self.base_url))
            .header(INTERNAL_TOKEN_HEADER, &self.service_token)
            .json(notification)
            .send()
            .await
            .map_err(|err| ExternalError::from_reqwest(SERVICE, err))?;

        if !response.status().is_success() {
            return Err(ExternalError::from_response(SERVICE, response).await);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_notification_with_type_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/notifications"))
            .and(body_partial_json(json!({"user_id": "learner-1", "type": "evaluation_completed"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = NotificationClient::new(&NotificationSettings {
            base_url: server.uri(),
            service_token: "svc".to_string(),
            request_timeout_seconds: 2,
        })
        .expect("client");

        client
            .notify(&Notification {
                user_id: "learner-1".to_string(),
                title: "Your result is ready".to_string(),
                message: "Band 7.0".to_string(),
                kind: "evaluation_completed".to_string(),
                payload: json!({"attempt_id": "a-1"}),
            })
            .await
            .expect("delivered");
    }
}
