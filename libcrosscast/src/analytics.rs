//! Downstream analytics signal
//!
//! After a publication lands, a collector is told about it so it can pull
//! engagement numbers later. The signal is fire-and-forget: the dispatcher
//! logs a failure here and moves on, the post stays `posted`.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::QueueConfig;
use crate::error::Result;
use crate::queue::{DelayedQueue, QueueJob};
use crate::types::SocialPlatform;

/// Body sent to the analytics collector.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedEvent {
    pub schedule_id: String,
    pub account_id: String,
    pub platform: SocialPlatform,
    pub post_id: String,
    pub post_url: String,
    /// Every unit id of a thread, head first
    pub unit_ids: Vec<String>,
    pub posted_at: i64,
}

#[async_trait]
pub trait AnalyticsTrigger: Send + Sync {
    async fn post_published(&self, event: &PublishedEvent) -> Result<()>;
}

/// Used when no collector is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalytics;

#[async_trait]
impl AnalyticsTrigger for NoopAnalytics {
    async fn post_published(&self, event: &PublishedEvent) -> Result<()> {
        tracing::trace!(schedule_id = %event.schedule_id, "No analytics collector configured");
        Ok(())
    }
}

/// Hands the event to the delayed queue so the collector runs once the
/// platform has had time to count engagement.
pub struct QueueAnalytics {
    queue: Arc<dyn DelayedQueue>,
    destination: String,
    delay_secs: u64,
}

impl QueueAnalytics {
    pub fn new(queue: Arc<dyn DelayedQueue>, destination: impl Into<String>, delay_secs: u64) -> Self {
        Self {
            queue,
            destination: destination.into(),
            delay_secs,
        }
    }

    /// Build the trigger the configuration asks for.
    pub fn from_config(config: &QueueConfig, queue: Arc<dyn DelayedQueue>) -> Arc<dyn AnalyticsTrigger> {
        match config.analytics_url.as_deref() {
            Some(url) if !url.trim().is_empty() => {
                Arc::new(Self::new(queue, url.trim(), config.analytics_delay_secs))
            }
            _ => Arc::new(NoopAnalytics),
        }
    }
}

#[async_trait]
impl AnalyticsTrigger for QueueAnalytics {
    async fn post_published(&self, event: &PublishedEvent) -> Result<()> {
        let body = serde_json::to_value(event)
            .map_err(|e| crate::error::QueueError::Payload(e.to_string()))?;
        let not_before = event.posted_at + self.delay_secs as i64;
        let job_id = self
            .queue
            .enqueue(QueueJob {
                destination: self.destination.clone(),
                body,
                not_before,
            })
            .await?;

        tracing::debug!(
            schedule_id = %event.schedule_id,
            job_id = %job_id,
            not_before,
            "Analytics collection enqueued"
        );
        Ok(())
    }
}
