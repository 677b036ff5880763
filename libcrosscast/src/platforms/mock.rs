//! Mock platform implementation for testing
//!
//! [`MockConnector`] hands out clients that share one [`MockPlatformState`],
//! so a test keeps a handle to the state and inspects call counts after the
//! dispatcher has done its work. Failures are scripted per published unit.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{PlatformClient, PlatformConnector, PlatformSession};
use crate::error::{CrosscastError, PlatformError, Result};
use crate::types::{ContentUnit, PostMetrics, PublishReceipt, SequenceReceipt, SocialPlatform};

/// Shared, inspectable state behind every mock client.
#[derive(Debug, Clone, Default)]
pub struct MockPlatformState {
    /// Number of publish_single / publish_sequence invocations
    pub publish_calls: Arc<Mutex<usize>>,
    /// Text of every unit that went out
    pub published_units: Arc<Mutex<Vec<String>>>,
    /// Access tokens clients were constructed with
    pub tokens_seen: Arc<Mutex<Vec<String>>>,
    /// Per-unit outcomes; `None` entries succeed. Empty means succeed.
    pub unit_script: Arc<Mutex<VecDeque<Option<PlatformError>>>>,
    next_id: Arc<Mutex<u64>>,
}

impl MockPlatformState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next unit with `error`.
    pub fn fail_next(&self, error: PlatformError) -> &Self {
        self.push(Some(error))
    }

    /// Let the next unit succeed.
    pub fn succeed_next(&self) -> &Self {
        self.push(None)
    }

    /// Fail the next `n` units with clones of `error`.
    pub fn fail_times(&self, n: usize, error: PlatformError) -> &Self {
        for _ in 0..n {
            self.push(Some(error.clone()));
        }
        self
    }

    fn push(&self, outcome: Option<PlatformError>) -> &Self {
        if let Ok(mut script) = self.unit_script.lock() {
            script.push_back(outcome);
        }
        self
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.lock().map(|n| *n).unwrap_or(0)
    }

    pub fn published_units(&self) -> Vec<String> {
        self.published_units.lock().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn record_call(&self) {
        if let Ok(mut n) = self.publish_calls.lock() {
            *n += 1;
        }
    }

    fn post_unit(&self, platform: SocialPlatform, unit: &ContentUnit) -> std::result::Result<PublishReceipt, PlatformError> {
        let scripted = self
            .unit_script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .flatten();
        if let Some(error) = scripted {
            return Err(error);
        }

        let id = self
            .next_id
            .lock()
            .map(|mut n| {
                *n += 1;
                *n
            })
            .unwrap_or(0);
        if let Ok(mut units) = self.published_units.lock() {
            units.push(unit.text.clone());
        }
        let id = format!("{}-{}", platform, id);
        Ok(PublishReceipt {
            url: format!("https://mock.{}/post/{}", platform, id),
            id,
        })
    }
}

pub struct MockPlatformClient {
    platform: SocialPlatform,
    state: MockPlatformState,
    limit: usize,
}

impl MockPlatformClient {
    pub fn new(platform: SocialPlatform, state: MockPlatformState) -> Self {
        Self {
            platform,
            state,
            limit: super::character_limit(platform),
        }
    }
}

#[async_trait]
impl PlatformClient for MockPlatformClient {
    fn platform(&self) -> SocialPlatform {
        self.platform
    }

    fn character_limit(&self) -> usize {
        self.limit
    }

    async fn publish_single(&self, unit: &ContentUnit) -> Result<PublishReceipt> {
        self.state.record_call();
        self.validate_unit(unit)?;
        self.state
            .post_unit(self.platform, unit)
            .map_err(CrosscastError::from)
    }

    async fn publish_sequence(&self, units: &[ContentUnit]) -> Result<SequenceReceipt> {
        self.state.record_call();
        for unit in units {
            self.validate_unit(unit)?;
        }

        let mut receipt = SequenceReceipt::default();
        for (index, unit) in units.iter().enumerate() {
            match self.state.post_unit(self.platform, unit) {
                Ok(r) => receipt.push(r),
                Err(source) if index > 0 => {
                    return Err(PlatformError::PartialSequence {
                        published_ids: receipt.ids,
                        failed_index: index,
                        source: Box::new(source),
                    }
                    .into());
                }
                Err(source) => return Err(source.into()),
            }
        }
        Ok(receipt)
    }

    async fn fetch_metrics(&self, post_ids: &[String]) -> Result<Vec<PostMetrics>> {
        Ok(post_ids
            .iter()
            .map(|id| PostMetrics {
                post_id: id.clone(),
                ..Default::default()
            })
            .collect())
    }
}

/// Connector handing out mock clients that share `state`.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    pub state: MockPlatformState,
}

impl MockConnector {
    pub fn new(state: MockPlatformState) -> Self {
        Self { state }
    }
}

impl PlatformConnector for MockConnector {
    fn connect(&self, session: PlatformSession) -> Result<Box<dyn PlatformClient>> {
        if let Ok(mut tokens) = self.state.tokens_seen.lock() {
            tokens.push(session.access_token.expose_secret().to_string());
        }
        Ok(Box::new(MockPlatformClient::new(
            session.platform,
            self.state.clone(),
        )))
    }
}
