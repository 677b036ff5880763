//! Publish dispatcher
//!
//! Receives queue deliveries, drives a publication through the state
//! machine in [`state`] and talks to the token manager, the platform
//! connector and the delayed queue on its behalf. Every collaborator is
//! handed in at construction; nothing here reaches for a global.
//!
//! Publication rows are written only from here.

use serde::Serialize;
use std::sync::Arc;

use crate::analytics::{AnalyticsTrigger, NoopAnalytics, PublishedEvent};
use crate::config::PublishingConfig;
use crate::db::{Database, PostedUpdate, PublicationFilter, PublicationStats, RetryUpdate};
use crate::error::{AuthError, CrosscastError, PlatformError, Result};
use crate::platforms::{self, publish_content, PlatformConnector, PlatformSession};
use crate::queue::{DeliveryPayload, DelayedQueue, SignatureVerifier};
use crate::tokens::TokenManager;
use crate::types::{Content, PostMetrics, PublicationStatus, ScheduledPublication, SocialPlatform};

pub mod retry;
pub mod state;

pub use retry::{RetryDecision, RetryPolicy};
pub use state::{transition, Effect, Event, Snapshot, Transition};

/// A delivery may arrive this much before the row's scheduled time and
/// still be honoured.
const EARLY_DELIVERY_TOLERANCE_SECS: i64 = 60;

/// What a delivery did. Every variant is acknowledged with 200.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Posted {
        schedule_id: String,
        post_id: String,
        post_url: String,
    },
    RetryScheduled {
        schedule_id: String,
        retry_count: u32,
        next_attempt_at: i64,
    },
    Failed {
        schedule_id: String,
        error: String,
    },
    /// Idempotent no-op: cancelled, already handled, stale or early
    Skipped {
        schedule_id: String,
        reason: String,
    },
    /// Authentic body that could not be decoded
    Discarded { reason: String },
}

/// Request to schedule a publication.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    /// Caller-chosen id; generated when absent
    pub schedule_id: Option<String>,
    /// Must match the account's platform when given
    pub platform: Option<SocialPlatform>,
    pub account_id: String,
    pub content: Content,
    /// Unix seconds
    pub scheduled_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleReceipt {
    pub schedule_id: String,
    pub job_id: String,
    pub scheduled_at: i64,
}

#[derive(Clone)]
pub struct PublishDispatcher {
    db: Database,
    tokens: TokenManager,
    connector: Arc<dyn PlatformConnector>,
    queue: Arc<dyn DelayedQueue>,
    verifier: SignatureVerifier,
    analytics: Arc<dyn AnalyticsTrigger>,
    callback_url: String,
    policy: RetryPolicy,
    publishing: PublishingConfig,
}

impl PublishDispatcher {
    pub fn new(
        db: Database,
        tokens: TokenManager,
        connector: Arc<dyn PlatformConnector>,
        queue: Arc<dyn DelayedQueue>,
        verifier: SignatureVerifier,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            tokens,
            connector,
            queue,
            verifier,
            analytics: Arc::new(NoopAnalytics),
            callback_url: callback_url.into(),
            policy: RetryPolicy::default(),
            publishing: PublishingConfig::default(),
        }
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsTrigger>) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn with_publishing(mut self, publishing: PublishingConfig) -> Self {
        self.publishing = publishing;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Handle one queue delivery.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidSignature`](crate::error::QueueError) when the
    /// body is not authentic (checked before any database read), and
    /// database errors, which the webhook reports as 500 so the queue
    /// redelivers. Everything else is an `Ok` outcome.
    pub async fn handle_delivery(&self, signature: Option<&str>, body: &[u8]) -> Result<DeliveryOutcome> {
        self.handle_delivery_at(signature, body, chrono::Utc::now().timestamp())
            .await
    }

    /// [`handle_delivery`](Self::handle_delivery) with an explicit clock.
    pub async fn handle_delivery_at(
        &self,
        signature: Option<&str>,
        body: &[u8],
        now: i64,
    ) -> Result<DeliveryOutcome> {
        if let Err(e) = self.verifier.verify(signature, body) {
            tracing::warn!(bytes = body.len(), "Rejected delivery with bad signature");
            return Err(e);
        }

        let payload = match DeliveryPayload::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Discarding undecodable delivery");
                return Ok(DeliveryOutcome::Discarded {
                    reason: e.to_string(),
                });
            }
        };

        self.process(payload, now).await
    }

    async fn process(&self, payload: DeliveryPayload, now: i64) -> Result<DeliveryOutcome> {
        let schedule_id = payload.schedule_id.as_str();
        let Some(publication) = self.db.get_publication(schedule_id).await? else {
            return Ok(skipped(schedule_id, "publication no longer exists".to_string()));
        };

        if payload.account_id != publication.account_id {
            tracing::warn!(
                schedule_id,
                payload_account = %payload.account_id,
                stored_account = %publication.account_id,
                "Delivery names a different account; using the stored row"
            );
        }

        if payload.attempt != publication.retry_count {
            return Ok(skipped(
                schedule_id,
                format!(
                    "stale delivery for attempt {} (publication is at attempt {})",
                    payload.attempt, publication.retry_count
                ),
            ));
        }

        if publication.status == PublicationStatus::Scheduled
            && publication.scheduled_at > now + EARLY_DELIVERY_TOLERANCE_SECS
        {
            return Ok(skipped(
                schedule_id,
                format!("not due until {}", publication.scheduled_at),
            ));
        }

        let snapshot = Snapshot::of(&publication);
        let claim = transition(snapshot, Event::Deliver, &self.policy);
        if let [Effect::Skip { reason }] = claim.effects.as_slice() {
            return Ok(skipped(schedule_id, reason.clone()));
        }

        let claimed = self
            .db
            .claim_for_posting(
                schedule_id,
                publication.retry_count,
                now,
                self.publishing.posting_lease_secs,
            )
            .await?;
        if !claimed {
            return Ok(skipped(schedule_id, "claimed by another delivery".to_string()));
        }

        tracing::info!(
            schedule_id,
            platform = %publication.platform,
            attempt = publication.retry_count,
            units = publication.content.units().len(),
            "Publication claimed, posting"
        );

        let event = self.attempt_publish(&publication).await?;
        let outcome = transition(
            Snapshot {
                status: claim.next,
                ..snapshot
            },
            event,
            &self.policy,
        );
        self.apply(&publication, outcome, now).await
    }

    /// Obtain a token and publish, folding every failure into an event.
    async fn attempt_publish(&self, publication: &ScheduledPublication) -> Result<Event> {
        let token = match self.tokens.get_usable_access_token(&publication.account_id).await {
            Ok(token) => token,
            Err(e) => return classify_token_failure(e),
        };

        let session = PlatformSession {
            platform: publication.platform,
            access_token: token.access_token,
            platform_user_id: token.account.platform_user_id,
        };
        let result = match self.connector.connect(session) {
            Ok(client) => publish_content(client.as_ref(), &publication.content).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(receipt) => match receipt.head() {
                Some(head) => Ok(Event::Published {
                    post_id: head.id,
                    post_url: head.url,
                    unit_ids: receipt.ids,
                }),
                None => Ok(Event::TerminalFailure {
                    error: "platform returned no post id".to_string(),
                    published_ids: Vec::new(),
                }),
            },
            Err(CrosscastError::Platform(e)) if e.is_auth_rejection() => {
                self.after_auth_rejection(publication, e).await
            }
            Err(CrosscastError::Platform(e)) => Ok(classify_platform_failure(e)),
            Err(e @ CrosscastError::Database(_)) => Err(e),
            Err(e) => Ok(Event::TerminalFailure {
                error: e.to_string(),
                published_ids: Vec::new(),
            }),
        }
    }

    /// The platform refused the token: refresh once so the retry uses a
    /// new one, or give up on the credential.
    async fn after_auth_rejection(
        &self,
        publication: &ScheduledPublication,
        rejection: PlatformError,
    ) -> Result<Event> {
        let published_ids = rejection.published_prefix().to_vec();
        tracing::warn!(
            schedule_id = %publication.id,
            account_id = %publication.account_id,
            error = %rejection,
            "Platform rejected the access token, forcing a refresh"
        );

        match self.tokens.force_refresh(&publication.account_id).await {
            Ok(_) => Ok(Event::TransientFailure {
                error: rejection.to_string(),
                published_ids,
                auth_rejected: true,
            }),
            Err(e) if e.is_reauthentication_required() => Ok(Event::CredentialDead {
                reason: e.to_string(),
            }),
            Err(e @ CrosscastError::Database(_)) => Err(e),
            Err(e) => Ok(Event::TransientFailure {
                error: format!("{}; refresh failed: {}", rejection, e),
                published_ids,
                auth_rejected: true,
            }),
        }
    }

    async fn apply(
        &self,
        publication: &ScheduledPublication,
        transition: Transition,
        now: i64,
    ) -> Result<DeliveryOutcome> {
        let schedule_id = publication.id.as_str();
        let mut outcome = None;
        let mut posted: Option<PublishedEvent> = None;

        for effect in transition.effects {
            match effect {
                Effect::RecordPosted {
                    post_id,
                    post_url,
                    unit_ids,
                } => {
                    let stored = self
                        .db
                        .mark_posted(
                            schedule_id,
                            &PostedUpdate {
                                platform_post_id: post_id.clone(),
                                platform_post_url: post_url.clone(),
                                published_unit_ids: unit_ids.clone(),
                                posted_at: now,
                            },
                        )
                        .await?;

                    if stored {
                        tracing::info!(
                            schedule_id,
                            post_id = %post_id,
                            url = %post_url,
                            "Publication posted"
                        );
                        posted = Some(PublishedEvent {
                            schedule_id: schedule_id.to_string(),
                            account_id: publication.account_id.clone(),
                            platform: publication.platform,
                            post_id: post_id.clone(),
                            post_url: post_url.clone(),
                            unit_ids,
                            posted_at: now,
                        });
                    } else {
                        tracing::warn!(
                            schedule_id,
                            post_id = %post_id,
                            "Post went out but the publication left posting before it was recorded"
                        );
                    }
                    outcome = Some(DeliveryOutcome::Posted {
                        schedule_id: schedule_id.to_string(),
                        post_id,
                        post_url,
                    });
                }

                Effect::EmitAnalytics => {
                    if let Some(event) = posted.as_ref() {
                        if let Err(e) = self.analytics.post_published(event).await {
                            tracing::warn!(schedule_id, error = %e, "Analytics signal failed");
                        }
                    }
                }

                Effect::ScheduleRetry {
                    retry_count,
                    delay,
                    error,
                    published_ids,
                } => {
                    let next_attempt_at = now + delay.as_secs() as i64;
                    outcome = Some(
                        self.schedule_retry(publication, retry_count, next_attempt_at, error, published_ids, now)
                            .await?,
                    );
                }

                Effect::RecordFailure {
                    error,
                    published_ids,
                } => {
                    outcome = Some(self.record_failure(schedule_id, error, &published_ids, now).await?);
                }

                Effect::DeactivateAccount { reason } => {
                    if let Err(e) = self.tokens.deactivate(&publication.account_id, &reason).await {
                        tracing::error!(
                            account_id = %publication.account_id,
                            error = %e,
                            "Failed to deactivate account"
                        );
                    }
                }

                Effect::Skip { reason } => {
                    outcome = Some(skipped(schedule_id, reason));
                }

                Effect::Claim | Effect::RecordCancelled => {
                    tracing::debug!(schedule_id, ?effect, "Effect has no meaning after a publish attempt");
                }
            }
        }

        Ok(outcome.unwrap_or_else(|| {
            skipped(schedule_id, format!("no outcome recorded in state {}", transition.next))
        }))
    }

    /// Enqueue the next attempt, then move the row back to `scheduled`.
    ///
    /// The job goes out first: if the queue refuses it the row is still
    /// `posting` and can be failed instead of sitting in `scheduled` with
    /// nothing left to deliver it.
    async fn schedule_retry(
        &self,
        publication: &ScheduledPublication,
        retry_count: u32,
        next_attempt_at: i64,
        error: String,
        published_ids: Vec<String>,
        now: i64,
    ) -> Result<DeliveryOutcome> {
        let schedule_id = publication.id.as_str();
        let next = ScheduledPublication {
            retry_count,
            scheduled_at: next_attempt_at,
            ..publication.clone()
        };

        let job_id = match self.enqueue_delivery(&next).await {
            Ok(job_id) => job_id,
            Err(e) => {
                tracing::error!(schedule_id, error = %e, "Could not enqueue retry");
                let error = format!("{}; retry could not be enqueued: {}", error, e);
                return self.record_failure(schedule_id, error, &published_ids, now).await;
            }
        };

        let stored = self
            .db
            .mark_retry(
                schedule_id,
                &RetryUpdate {
                    next_scheduled_at: next_attempt_at,
                    error: error.clone(),
                    published_unit_ids: published_ids,
                },
                now,
            )
            .await?;
        if !stored {
            // The orphaned job will find the row in its new state and skip
            return Ok(skipped(
                schedule_id,
                "publication left posting before the retry was recorded".to_string(),
            ));
        }
        self.db.set_job_id(schedule_id, &job_id).await?;

        tracing::warn!(
            schedule_id,
            retry_count,
            next_attempt_at,
            job_id = %job_id,
            error = %error,
            "Publish failed, retry scheduled"
        );
        Ok(DeliveryOutcome::RetryScheduled {
            schedule_id: schedule_id.to_string(),
            retry_count,
            next_attempt_at,
        })
    }

    async fn record_failure(
        &self,
        schedule_id: &str,
        error: String,
        published_ids: &[String],
        now: i64,
    ) -> Result<DeliveryOutcome> {
        if !self.db.mark_failed(schedule_id, &error, published_ids, now).await? {
            return Ok(skipped(
                schedule_id,
                "publication left posting before the failure was recorded".to_string(),
            ));
        }

        tracing::error!(
            schedule_id,
            error = %error,
            published_ids = ?published_ids,
            "Publication failed"
        );
        Ok(DeliveryOutcome::Failed {
            schedule_id: schedule_id.to_string(),
            error,
        })
    }

    async fn enqueue_delivery(&self, publication: &ScheduledPublication) -> Result<String> {
        let job = DeliveryPayload::for_publication(publication)
            .to_job(&self.callback_url, publication.scheduled_at)?;
        self.queue.enqueue(job).await
    }

    async fn load(&self, schedule_id: &str) -> Result<ScheduledPublication> {
        self.db
            .get_publication(schedule_id)
            .await?
            .ok_or_else(|| CrosscastError::NotFound(format!("publication {}", schedule_id)))
    }

    /// Persist a publication and hand it to the queue for `scheduled_at`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for empty or over-long content or a platform that does
    /// not match the account, `NotFound` for an unknown account and
    /// `ReauthenticationRequired` for a disconnected one.
    pub async fn schedule_publication(&self, request: ScheduleRequest) -> Result<ScheduleReceipt> {
        request.content.validate()?;

        let account = self
            .db
            .get_account(&request.account_id)
            .await?
            .ok_or_else(|| CrosscastError::NotFound(format!("connected account {}", request.account_id)))?;

        if !account.is_active {
            return Err(AuthError::ReauthenticationRequired(
                account
                    .last_error
                    .unwrap_or_else(|| format!("{} account is disconnected", account.platform)),
            )
            .into());
        }
        if let Some(platform) = request.platform {
            if platform != account.platform {
                return Err(CrosscastError::InvalidInput(format!(
                    "account {} is connected to {}, not {}",
                    account.id, account.platform, platform
                )));
            }
        }

        let limit = platforms::character_limit(account.platform);
        for (index, unit) in request.content.units().iter().enumerate() {
            let length = unit.text.chars().count();
            if length > limit {
                return Err(CrosscastError::InvalidInput(format!(
                    "unit {} is {} characters; {} allows {}",
                    index + 1,
                    length,
                    account.platform,
                    limit
                )));
            }
        }

        let mut publication = ScheduledPublication::new(
            account.id,
            account.platform,
            request.content,
            request.scheduled_at,
            self.publishing.max_retries,
        );
        if let Some(id) = request.schedule_id {
            publication.id = id;
        }

        // Enqueue before inserting: a job whose row never landed is skipped
        // on delivery, a row without a job would never run.
        let job_id = self.enqueue_delivery(&publication).await?;
        publication.job_id = Some(job_id.clone());
        self.db.create_publication(&publication).await?;

        tracing::info!(
            schedule_id = %publication.id,
            platform = %publication.platform,
            scheduled_at = publication.scheduled_at,
            job_id = %job_id,
            "Publication scheduled"
        );
        Ok(ScheduleReceipt {
            schedule_id: publication.id,
            job_id,
            scheduled_at: publication.scheduled_at,
        })
    }

    /// Soft cancel: the row turns `cancelled` and the queued job is skipped
    /// when it arrives.
    pub async fn cancel_publication(&self, schedule_id: &str) -> Result<()> {
        let publication = self.load(schedule_id).await?;
        let t = transition(Snapshot::of(&publication), Event::Cancel, &self.policy);
        if let [Effect::Skip { reason }] = t.effects.as_slice() {
            return Err(CrosscastError::InvalidInput(reason.clone()));
        }

        let now = chrono::Utc::now().timestamp();
        if !self.db.cancel_publication(schedule_id, now).await? {
            let current = self.load(schedule_id).await?;
            return Err(CrosscastError::InvalidInput(format!(
                "cannot cancel a {} publication",
                current.status
            )));
        }

        tracing::info!(schedule_id, previous = %publication.status, "Publication cancelled");
        Ok(())
    }

    /// Move a `scheduled` publication and enqueue a job for the new time.
    ///
    /// The old job is skipped on arrival: either the row is not due yet or
    /// it is already posted.
    pub async fn reschedule_publication(&self, schedule_id: &str, scheduled_at: i64) -> Result<ScheduleReceipt> {
        let publication = self.load(schedule_id).await?;
        if publication.status != PublicationStatus::Scheduled {
            return Err(CrosscastError::InvalidInput(format!(
                "cannot reschedule a {} publication",
                publication.status
            )));
        }

        let now = chrono::Utc::now().timestamp();
        if !self.db.reschedule_publication(schedule_id, scheduled_at, now).await? {
            return Err(CrosscastError::InvalidInput(
                "publication is no longer scheduled".to_string(),
            ));
        }

        let moved = ScheduledPublication {
            scheduled_at,
            ..publication
        };
        let job_id = self.enqueue_delivery(&moved).await?;
        self.db.set_job_id(schedule_id, &job_id).await?;

        tracing::info!(schedule_id, scheduled_at, job_id = %job_id, "Publication rescheduled");
        Ok(ScheduleReceipt {
            schedule_id: schedule_id.to_string(),
            job_id,
            scheduled_at,
        })
    }

    pub async fn get_publication(&self, schedule_id: &str) -> Result<ScheduledPublication> {
        self.load(schedule_id).await
    }

    pub async fn list_publications(&self, filter: &PublicationFilter) -> Result<Vec<ScheduledPublication>> {
        self.db.list_publications(filter).await
    }

    pub async fn queue_stats(&self) -> Result<PublicationStats> {
        self.db.publication_stats().await
    }

    /// Engagement numbers for every unit of a posted publication.
    pub async fn fetch_metrics(&self, schedule_id: &str) -> Result<Vec<PostMetrics>> {
        let publication = self.load(schedule_id).await?;
        if publication.status != PublicationStatus::Posted {
            return Err(CrosscastError::InvalidInput(format!(
                "publication is {}, metrics exist only for posted ones",
                publication.status
            )));
        }

        let ids = if publication.published_unit_ids.is_empty() {
            publication.platform_post_id.clone().into_iter().collect()
        } else {
            publication.published_unit_ids.clone()
        };

        let token = self
            .tokens
            .get_usable_access_token(&publication.account_id)
            .await?;
        let client = self.connector.connect(PlatformSession {
            platform: publication.platform,
            access_token: token.access_token,
            platform_user_id: token.account.platform_user_id,
        })?;
        client.fetch_metrics(&ids).await
    }
}

impl Snapshot {
    pub fn of(publication: &ScheduledPublication) -> Self {
        Self {
            status: publication.status,
            retry_count: publication.retry_count,
            max_retries: publication.max_retries,
        }
    }
}

fn skipped(schedule_id: &str, reason: String) -> DeliveryOutcome {
    tracing::info!(schedule_id, reason = %reason, "Delivery skipped");
    DeliveryOutcome::Skipped {
        schedule_id: schedule_id.to_string(),
        reason,
    }
}

fn classify_platform_failure(error: PlatformError) -> Event {
    let published_ids = error.published_prefix().to_vec();
    if error.is_transient() {
        Event::TransientFailure {
            error: error.to_string(),
            published_ids,
            auth_rejected: false,
        }
    } else {
        Event::TerminalFailure {
            error: error.to_string(),
            published_ids,
        }
    }
}

fn classify_token_failure(error: CrosscastError) -> Result<Event> {
    match error {
        e if e.is_reauthentication_required() => Ok(Event::CredentialDead {
            reason: e.to_string(),
        }),
        CrosscastError::Platform(e) if e.is_transient() => Ok(Event::TransientFailure {
            error: format!("token refresh unavailable: {}", e),
            published_ids: Vec::new(),
            auth_rejected: false,
        }),
        e @ CrosscastError::Database(_) => Err(e),
        e => Ok(Event::TerminalFailure {
            error: e.to_string(),
            published_ids: Vec::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::oauth::mock::MockOAuthProvider;
    use crate::oauth::OAuthProviders;
    use crate::platforms::mock::{MockConnector, MockPlatformState};
    use crate::queue::{sign, MemoryQueue};
    use crate::types::{ConnectedAccount, ContentUnit};
    use crate::vault::CredentialVault;
    use crate::config::TokenConfig;
    use secrecy::SecretString;
    use tempfile::TempDir;

    const CALLBACK: &str = "https://cast.test/webhooks/post-execute";

    struct Harness {
        dispatcher: PublishDispatcher,
        db: Database,
        queue: MemoryQueue,
        platform: MockPlatformState,
        key: SecretString,
        account_id: String,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("d.db").to_str().unwrap())
            .await
            .unwrap();
        let vault = Arc::new(CredentialVault::new(&[9u8; 32]));
        let now = chrono::Utc::now().timestamp();
        let account = db
            .upsert_account(&ConnectedAccount {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: "user-1".to_string(),
                platform: SocialPlatform::Twitter,
                platform_user_id: "tw-1".to_string(),
                platform_username: Some("caster".to_string()),
                access_token_enc: vault.encrypt("access-1").unwrap(),
                refresh_token_enc: Some(vault.encrypt("refresh-1").unwrap()),
                token_expires_at: Some(now + 86_400),
                is_active: true,
                last_verified_at: Some(now),
                last_error: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let tokens = TokenManager::new(
            db.clone(),
            vault,
            OAuthProviders::new().with(Arc::new(MockOAuthProvider::twitter())),
            TokenConfig::default(),
        );
        let queue = MemoryQueue::new();
        let platform = MockPlatformState::new();
        let key = SecretString::from("signing-key");
        let dispatcher = PublishDispatcher::new(
            db.clone(),
            tokens,
            Arc::new(MockConnector::new(platform.clone())),
            Arc::new(queue.clone()),
            SignatureVerifier::new(vec![key.clone()]),
            CALLBACK,
        );

        Harness {
            dispatcher,
            db,
            queue,
            platform,
            key,
            account_id: account.id,
            _dir: dir,
        }
    }

    impl Harness {
        async fn schedule(&self, text: &str, at: i64) -> ScheduleReceipt {
            self.dispatcher
                .schedule_publication(ScheduleRequest {
                    schedule_id: None,
                    platform: None,
                    account_id: self.account_id.clone(),
                    content: Content::Single(ContentUnit::text(text)),
                    scheduled_at: at,
                })
                .await
                .unwrap()
        }

        async fn deliver_last(&self, now: i64) -> Result<DeliveryOutcome> {
            let body = serde_json::to_vec(&self.queue.last_job().unwrap().job.body).unwrap();
            let signature = sign(&self.key, &body);
            self.dispatcher
                .handle_delivery_at(Some(&signature), &body, now)
                .await
        }
    }

    #[tokio::test]
    async fn test_schedule_enqueues_for_scheduled_time() {
        let h = harness().await;
        let receipt = h.schedule("hello", 5_000).await;

        let job = h.queue.last_job().unwrap();
        assert_eq!(job.id, receipt.job_id);
        assert_eq!(job.job.destination, CALLBACK);
        assert_eq!(job.job.not_before, 5_000);
        assert_eq!(job.job.body["scheduleId"], receipt.schedule_id.as_str());

        let stored = h.db.get_publication(&receipt.schedule_id).await.unwrap().unwrap();
        assert_eq!(stored.status, PublicationStatus::Scheduled);
        assert_eq!(stored.job_id.as_deref(), Some(receipt.job_id.as_str()));
    }

    #[tokio::test]
    async fn test_schedule_rejects_over_limit_and_wrong_platform() {
        let h = harness().await;
        let err = h
            .dispatcher
            .schedule_publication(ScheduleRequest {
                schedule_id: None,
                platform: None,
                account_id: h.account_id.clone(),
                content: Content::Single(ContentUnit::text("x".repeat(281))),
                scheduled_at: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CrosscastError::InvalidInput(_)));

        let err = h
            .dispatcher
            .schedule_publication(ScheduleRequest {
                schedule_id: None,
                platform: Some(SocialPlatform::LinkedIn),
                account_id: h.account_id.clone(),
                content: Content::Single(ContentUnit::text("hi")),
                scheduled_at: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CrosscastError::InvalidInput(_)));
        assert!(h.queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_fails_cleanly_when_queue_is_down() {
        let h = harness().await;
        h.queue.fail_with("503 from queue");
        let err = h
            .dispatcher
            .schedule_publication(ScheduleRequest {
                schedule_id: Some("fixed-id".to_string()),
                platform: None,
                account_id: h.account_id.clone(),
                content: Content::Single(ContentUnit::text("hi")),
                scheduled_at: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CrosscastError::Queue(QueueError::Enqueue(_))));
        assert!(h.db.get_publication("fixed-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let h = harness().await;
        h.schedule("hello", 0).await;
        let body = serde_json::to_vec(&h.queue.last_job().unwrap().job.body).unwrap();

        let err = h
            .dispatcher
            .handle_delivery_at(Some("v1=00ff"), &body, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CrosscastError::Queue(QueueError::InvalidSignature)));
        let err = h.dispatcher.handle_delivery_at(None, &body, 0).await.unwrap_err();
        assert!(matches!(err, CrosscastError::Queue(QueueError::InvalidSignature)));
        assert_eq!(h.platform.publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_authentic_garbage_is_discarded() {
        let h = harness().await;
        let body = b"{\"scheduleId\": 7}";
        let outcome = h
            .dispatcher
            .handle_delivery_at(Some(&sign(&h.key, body)), body, 0)
            .await
            .unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Discarded { .. }));
    }

    #[tokio::test]
    async fn test_early_delivery_is_skipped() {
        let h = harness().await;
        h.schedule("later", 10_000).await;

        let outcome = h.deliver_last(10_000 - 3_600).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Skipped { .. }));
        assert_eq!(h.platform.publish_calls(), 0);

        let outcome = h.deliver_last(10_000).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Posted { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_publication_is_not_posted() {
        let h = harness().await;
        let receipt = h.schedule("nope", 0).await;
        h.dispatcher.cancel_publication(&receipt.schedule_id).await.unwrap();

        let outcome = h.deliver_last(0).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Skipped { .. }));
        assert_eq!(h.platform.publish_calls(), 0);

        let err = h.dispatcher.cancel_publication(&receipt.schedule_id).await.unwrap_err();
        assert!(matches!(err, CrosscastError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_validation_failure_is_terminal() {
        let h = harness().await;
        h.platform
            .fail_next(PlatformError::Validation("duplicate content".to_string()));
        let receipt = h.schedule("dup", 0).await;

        let outcome = h.deliver_last(0).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));
        let stored = h.db.get_publication(&receipt.schedule_id).await.unwrap().unwrap();
        assert_eq!(stored.status, PublicationStatus::Failed);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.last_error.unwrap().contains("duplicate content"));
    }

    #[tokio::test]
    async fn test_retry_enqueue_failure_fails_publication() {
        let h = harness().await;
        h.platform.fail_next(PlatformError::Network("503".to_string()));
        let receipt = h.schedule("flaky", 0).await;
        h.queue.fail_with("queue down");

        let outcome = h.deliver_last(0).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));
        let stored = h.db.get_publication(&receipt.schedule_id).await.unwrap().unwrap();
        assert_eq!(stored.status, PublicationStatus::Failed);
        assert!(stored.last_error.unwrap().contains("retry could not be enqueued"));
    }

    #[tokio::test]
    async fn test_auth_rejection_refreshes_and_retries_with_new_token() {
        let h = harness().await;
        h.platform
            .fail_next(PlatformError::Authentication("401".to_string()));
        let receipt = h.schedule("hi", 0).await;

        let outcome = h.deliver_last(0).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::RetryScheduled { retry_count: 1, .. }));

        let outcome = h.deliver_last(10_000).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Posted { .. }));
        assert_eq!(h.platform.tokens_seen(), vec!["access-1", "refreshed-access-1"]);

        let stored = h.db.get_publication(&receipt.schedule_id).await.unwrap().unwrap();
        assert_eq!(stored.status, PublicationStatus::Posted);
    }

    #[tokio::test]
    async fn test_reschedule_moves_job_and_old_delivery_waits() {
        let h = harness().await;
        let receipt = h.schedule("moved", 1_000).await;
        let old_body = serde_json::to_vec(&h.queue.last_job().unwrap().job.body).unwrap();

        let moved = h
            .dispatcher
            .reschedule_publication(&receipt.schedule_id, 50_000)
            .await
            .unwrap();
        assert_ne!(moved.job_id, receipt.job_id);
        assert_eq!(h.queue.last_job().unwrap().job.not_before, 50_000);

        let outcome = h
            .dispatcher
            .handle_delivery_at(Some(&sign(&h.key, &old_body)), &old_body, 1_000)
            .await
            .unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Skipped { .. }));
        assert_eq!(h.platform.publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_metrics_only_for_posted() {
        let h = harness().await;
        let receipt = h.schedule("count me", 0).await;
        assert!(h.dispatcher.fetch_metrics(&receipt.schedule_id).await.is_err());

        h.deliver_last(0).await.unwrap();
        let metrics = h.dispatcher.fetch_metrics(&receipt.schedule_id).await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].post_id, "twitter-1");
    }
}
