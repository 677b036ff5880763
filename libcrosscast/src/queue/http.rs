//! HTTP adapter for a QStash-style delayed delivery service
//!
//! `POST {endpoint}/v2/publish/{destination}` with the JSON body, a bearer
//! token and `Upstash-Not-Before: <unix seconds>`. The service answers with
//! `{"messageId": "..."}`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::{DelayedQueue, QueueJob};
use crate::error::{QueueError, Result};

const NOT_BEFORE_HEADER: &str = "Upstash-Not-Before";

#[derive(Clone)]
pub struct HttpQueue {
    http: reqwest::Client,
    endpoint: String,
    token: Arc<SecretString>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_id: String,
}

impl HttpQueue {
    pub fn new(endpoint: &str, token: SecretString) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| QueueError::Enqueue(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: Arc::new(token),
        })
    }

    fn publish_url(&self, destination: &str) -> String {
        format!("{}/v2/publish/{}", self.endpoint, destination)
    }
}

#[async_trait]
impl DelayedQueue for HttpQueue {
    async fn enqueue(&self, job: QueueJob) -> Result<String> {
        let response = self
            .http
            .post(self.publish_url(&job.destination))
            .bearer_auth(self.token.expose_secret())
            .header(NOT_BEFORE_HEADER, job.not_before.max(0).to_string())
            .json(&job.body)
            .send()
            .await
            .map_err(|e| QueueError::Enqueue(format!("Queue unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Enqueue(format!("Queue returned {}: {}", status, body)).into());
        }

        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| QueueError::Enqueue(format!("Unexpected queue response: {}", e)))?;

        tracing::debug!(
            job_id = %parsed.message_id,
            not_before = job.not_before,
            "Enqueued delayed job"
        );
        Ok(parsed.message_id)
    }
}
