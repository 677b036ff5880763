//! Delayed execution queue
//!
//! The pipeline never waits in-process for a scheduled time. It hands a job
//! to an external at-least-once delivery service with a `not_before`
//! timestamp, and the service later calls back into the webhook with a
//! signed body. There is no remote cancel: cancellation is a status check
//! when the delivery arrives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};
use crate::types::{ContentType, ScheduledPublication, SocialPlatform};

pub mod http;
pub mod memory;
pub mod signature;

pub use http::HttpQueue;
pub use memory::MemoryQueue;
pub use signature::{sign, SignatureVerifier, SIGNATURE_HEADER};

/// One unit of work handed to the delivery service.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueJob {
    /// URL the service calls back
    pub destination: String,
    pub body: serde_json::Value,
    /// Unix seconds; the service never delivers earlier
    pub not_before: i64,
}

/// At-least-once, time-delayed delivery.
#[async_trait]
pub trait DelayedQueue: Send + Sync {
    /// Submit a job and return the service's job id.
    async fn enqueue(&self, job: QueueJob) -> Result<String>;
}

/// Body of a publish delivery.
///
/// `attempt` is the publication's retry count when the job was enqueued.
/// A delivery whose attempt no longer matches the row is a stale queue
/// redelivery, not a pipeline retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    pub schedule_id: String,
    pub account_id: String,
    pub platform: SocialPlatform,
    pub content_type: ContentType,
    pub content_data: serde_json::Value,
    #[serde(default)]
    pub attempt: u32,
}

impl DeliveryPayload {
    pub fn for_publication(publication: &ScheduledPublication) -> Self {
        Self {
            schedule_id: publication.id.clone(),
            account_id: publication.account_id.clone(),
            platform: publication.platform,
            content_type: publication.content.content_type(),
            content_data: publication.content.to_data(),
            attempt: publication.retry_count,
        }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| QueueError::Payload(e.to_string()).into())
    }

    pub fn to_job(&self, destination: &str, not_before: i64) -> Result<QueueJob> {
        let body = serde_json::to_value(self).map_err(|e| QueueError::Payload(e.to_string()))?;
        Ok(QueueJob {
            destination: destination.to_string(),
            body,
            not_before,
        })
    }
}
