//! End-to-end pipeline tests: schedule, deliver, publish, retry, fail.
//!
//! The queue, the platforms and the OAuth token endpoint are the in-crate
//! mocks; everything else (database, vault, dispatcher, token manager) is
//! the production wiring from `Runtime::assemble`.

use libcrosscast::config::{Config, Secrets};
use libcrosscast::error::PlatformError;
use libcrosscast::oauth::mock::{MockOAuthProvider, RefreshOutcome};
use libcrosscast::oauth::OAuthProviders;
use libcrosscast::platforms::mock::{MockConnector, MockPlatformState};
use libcrosscast::queue::{sign, MemoryQueue};
use libcrosscast::{
    ConnectedAccount, Content, ContentUnit, DeliveryOutcome, PublicationStatus, Runtime,
    ScheduleRequest, SocialPlatform,
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tempfile::TempDir;

const SIGNING_KEY: &str = "whsec-test-signing-key";
const COLLECTOR: &str = "https://collector.test/ingest";
const START: i64 = 1_000;

struct Pipeline {
    runtime: Runtime,
    queue: MemoryQueue,
    platform: MockPlatformState,
    callback: String,
    _dir: TempDir,
}

async fn pipeline_with(provider: MockOAuthProvider) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.database.path = dir.path().join("pipeline.db").to_string_lossy().to_string();
    config.queue.analytics_url = Some(COLLECTOR.to_string());
    config.queue.analytics_delay_secs = 600;

    let secrets = Secrets {
        encryption_key: Some(SecretString::from("11".repeat(32))),
        signing_keys: vec![SecretString::from(SIGNING_KEY)],
        ..Secrets::default()
    };

    let queue = MemoryQueue::new();
    let platform = MockPlatformState::new();
    let runtime = Runtime::assemble(
        &config,
        &secrets,
        Arc::new(queue.clone()),
        Arc::new(MockConnector::new(platform.clone())),
        OAuthProviders::new().with(Arc::new(provider)),
    )
    .await
    .unwrap();

    Pipeline {
        runtime,
        queue,
        platform,
        callback: config.callback_url(),
        _dir: dir,
    }
}

async fn pipeline() -> Pipeline {
    pipeline_with(MockOAuthProvider::twitter()).await
}

impl Pipeline {
    async fn connect_account(&self, expires_in: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let vault = &self.runtime.vault;
        let account = self
            .runtime
            .db
            .upsert_account(&ConnectedAccount {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: "user-1".to_string(),
                platform: SocialPlatform::Twitter,
                platform_user_id: "tw-42".to_string(),
                platform_username: Some("caster".to_string()),
                access_token_enc: vault.encrypt("access-0").unwrap(),
                refresh_token_enc: Some(vault.encrypt("refresh-0").unwrap()),
                token_expires_at: Some(now + expires_in),
                is_active: true,
                last_verified_at: Some(now),
                last_error: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        account.id
    }

    async fn schedule(&self, account_id: &str, content: Content) -> String {
        self.runtime
            .dispatcher
            .schedule_publication(ScheduleRequest {
                schedule_id: None,
                platform: Some(SocialPlatform::Twitter),
                account_id: account_id.to_string(),
                content,
                scheduled_at: START,
            })
            .await
            .unwrap()
            .schedule_id
    }

    /// Body of the most recent job aimed at the webhook.
    fn latest_delivery(&self) -> Vec<u8> {
        let job = self.queue.jobs_for(&self.callback).pop().unwrap();
        serde_json::to_vec(&job.job.body).unwrap()
    }

    async fn deliver(&self, body: &[u8], now: i64) -> DeliveryOutcome {
        let signature = sign(&SecretString::from(SIGNING_KEY), body);
        self.runtime
            .dispatcher
            .handle_delivery_at(Some(&signature), body, now)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_single_post_lands_and_signals_analytics() {
    let p = pipeline().await;
    let account = p.connect_account(86_400).await;
    let id = p.schedule(&account, Content::Single(ContentUnit::text("hello world"))).await;

    let outcome = p.deliver(&p.latest_delivery(), START).await;
    assert_eq!(
        outcome,
        DeliveryOutcome::Posted {
            schedule_id: id.clone(),
            post_id: "twitter-1".to_string(),
            post_url: "https://mock.twitter/post/twitter-1".to_string(),
        }
    );

    let stored = p.runtime.db.get_publication(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, PublicationStatus::Posted);
    assert_eq!(stored.platform_post_id.as_deref(), Some("twitter-1"));
    assert_eq!(stored.posted_at, Some(START));
    assert_eq!(p.platform.tokens_seen(), vec!["access-0"]);

    let analytics = p.queue.jobs_for(COLLECTOR);
    assert_eq!(analytics.len(), 1);
    assert_eq!(analytics[0].job.not_before, START + 600);
    assert_eq!(analytics[0].job.body["postId"], "twitter-1");
}

#[tokio::test]
async fn test_redelivery_publishes_once() {
    let p = pipeline().await;
    let account = p.connect_account(86_400).await;
    p.schedule(&account, Content::Single(ContentUnit::text("once"))).await;
    let body = p.latest_delivery();

    let first = p.deliver(&body, START).await;
    let second = p.deliver(&body, START + 5).await;

    assert!(matches!(first, DeliveryOutcome::Posted { .. }));
    assert!(matches!(second, DeliveryOutcome::Skipped { .. }));
    assert_eq!(p.platform.publish_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_deliveries_publish_once() {
    let p = pipeline().await;
    let account = p.connect_account(86_400).await;
    p.schedule(&account, Content::Single(ContentUnit::text("race"))).await;
    let body = p.latest_delivery();

    let (a, b) = tokio::join!(p.deliver(&body, START), p.deliver(&body, START));
    let posted = [&a, &b]
        .iter()
        .filter(|o| matches!(o, DeliveryOutcome::Posted { .. }))
        .count();
    assert_eq!(posted, 1);
    assert_eq!(p.platform.publish_calls(), 1);
}

#[tokio::test]
async fn test_retry_ceiling_after_four_transient_failures() {
    let p = pipeline().await;
    let account = p.connect_account(86_400).await;
    p.platform
        .fail_times(4, PlatformError::Network("503 Service Unavailable".to_string()));
    let id = p.schedule(&account, Content::Single(ContentUnit::text("flaky"))).await;

    let mut now = START;
    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.push(p.deliver(&p.latest_delivery(), now).await);
        now += 1_000;
    }

    assert!(matches!(outcomes[0], DeliveryOutcome::RetryScheduled { retry_count: 1, .. }));
    assert!(matches!(outcomes[1], DeliveryOutcome::RetryScheduled { retry_count: 2, .. }));
    assert!(matches!(outcomes[2], DeliveryOutcome::RetryScheduled { retry_count: 3, .. }));
    assert!(matches!(outcomes[3], DeliveryOutcome::Failed { .. }));

    let stored = p.runtime.db.get_publication(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, PublicationStatus::Failed);
    assert_eq!(stored.retry_count, 3);
    assert!(stored.last_error.unwrap().contains("503"));
    assert_eq!(p.platform.publish_calls(), 4);

    // Backoff of 2, 4 and 8 minutes from each failed attempt
    let jobs = p.queue.jobs_for(&p.callback);
    assert_eq!(jobs.len(), 4);
    assert_eq!(jobs[1].job.not_before, START + 120);
    assert_eq!(jobs[2].job.not_before, START + 1_000 + 240);
    assert_eq!(jobs[3].job.not_before, START + 2_000 + 480);
    assert!(p.queue.jobs_for(COLLECTOR).is_empty());
}

#[tokio::test]
async fn test_success_on_fourth_attempt_is_posted() {
    let p = pipeline().await;
    let account = p.connect_account(86_400).await;
    p.platform
        .fail_times(3, PlatformError::RateLimit("429".to_string()));
    let id = p.schedule(&account, Content::Single(ContentUnit::text("persistent"))).await;

    let mut now = START;
    let mut last = None;
    for _ in 0..4 {
        last = Some(p.deliver(&p.latest_delivery(), now).await);
        now += 1_000;
    }

    assert!(matches!(last, Some(DeliveryOutcome::Posted { .. })));
    let stored = p.runtime.db.get_publication(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, PublicationStatus::Posted);
    assert_eq!(stored.retry_count, 3);
}

#[tokio::test]
async fn test_stale_attempt_is_not_a_retry() {
    let p = pipeline().await;
    let account = p.connect_account(86_400).await;
    p.platform.fail_next(PlatformError::Network("timeout".to_string()));
    let id = p.schedule(&account, Content::Single(ContentUnit::text("stale"))).await;

    let original = p.latest_delivery();
    p.deliver(&original, START).await;

    // The queue redelivers the first job after the pipeline already retried
    let outcome = p.deliver(&original, START + 500).await;
    assert!(matches!(outcome, DeliveryOutcome::Skipped { .. }));
    assert_eq!(p.platform.publish_calls(), 1);

    let stored = p.runtime.db.get_publication(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, PublicationStatus::Scheduled);
    assert_eq!(stored.retry_count, 1);
}

#[tokio::test]
async fn test_refresh_rejection_fails_and_deactivates() {
    let provider = MockOAuthProvider::twitter()
        .script_refresh(RefreshOutcome::Reject("invalid_grant".to_string()));
    let p = pipeline_with(provider).await;
    // Inside the refresh threshold
    let account = p.connect_account(60).await;
    let id = p.schedule(&account, Content::Single(ContentUnit::text("blocked"))).await;

    let outcome = p.deliver(&p.latest_delivery(), START).await;
    assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));
    assert_eq!(p.platform.publish_calls(), 0);

    let stored = p.runtime.db.get_publication(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, PublicationStatus::Failed);
    assert_eq!(stored.retry_count, 0);
    assert!(stored.last_error.unwrap().contains("invalid_grant"));

    let account = p.runtime.db.get_account(&account).await.unwrap().unwrap();
    assert!(!account.is_active);
}

#[tokio::test]
async fn test_thread_failing_on_third_unit_keeps_prefix() {
    let p = pipeline().await;
    let account = p.connect_account(86_400).await;
    p.platform
        .succeed_next()
        .succeed_next()
        .fail_next(PlatformError::Posting("duplicate".to_string()));
    let units = (1..=5).map(|i| ContentUnit::text(format!("part {}/5", i))).collect();
    let id = p.schedule(&account, Content::Thread(units)).await;

    let outcome = p.deliver(&p.latest_delivery(), START).await;
    assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));

    let stored = p.runtime.db.get_publication(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, PublicationStatus::Failed);
    assert_eq!(stored.published_unit_ids, vec!["twitter-1", "twitter-2"]);
    assert!(stored.platform_post_id.is_none());
    assert_eq!(p.platform.published_units(), vec!["part 1/5", "part 2/5"]);
}

#[tokio::test]
async fn test_expired_claim_is_reclaimed() {
    let p = pipeline().await;
    let account = p.connect_account(86_400).await;
    let id = p.schedule(&account, Content::Single(ContentUnit::text("orphan"))).await;

    // A worker claimed the row and died before recording anything
    assert!(p.runtime.db.claim_for_posting(&id, 0, START, 600).await.unwrap());

    let body = p.latest_delivery();
    let early = p.deliver(&body, START + 300).await;
    assert!(matches!(early, DeliveryOutcome::Skipped { .. }));

    let late = p.deliver(&body, START + 700).await;
    assert!(matches!(late, DeliveryOutcome::Posted { .. }));
    assert_eq!(p.platform.publish_calls(), 1);
}

#[tokio::test]
async fn test_throttled_refresh_retries_and_keeps_account() {
    let provider = MockOAuthProvider::twitter()
        .script_refresh(RefreshOutcome::Throttled("429 Too Many Requests".to_string()));
    let p = pipeline_with(provider).await;
    let account = p.connect_account(60).await;
    let id = p.schedule(&account, Content::Single(ContentUnit::text("later"))).await;

    let outcome = p.deliver(&p.latest_delivery(), START).await;
    assert!(matches!(outcome, DeliveryOutcome::RetryScheduled { retry_count: 1, .. }));
    assert_eq!(p.platform.publish_calls(), 0);

    let stored = p.runtime.db.get_account(&account).await.unwrap().unwrap();
    assert!(stored.is_active);
    assert!(stored.last_error.is_none());

    let outcome = p.deliver(&p.latest_delivery(), START + 120).await;
    assert!(matches!(outcome, DeliveryOutcome::Posted { .. }));
    let publication = p.runtime.db.get_publication(&id).await.unwrap().unwrap();
    assert_eq!(publication.status, PublicationStatus::Posted);
}

#[tokio::test]
async fn test_concurrent_refresh_with_rotation_keeps_account() {
    let provider = MockOAuthProvider::twitter()
        .script_refresh(RefreshOutcome::Grant {
            access: "access-1".to_string(),
            refresh: Some("refresh-1".to_string()),
            expires_in: Some(7200),
        })
        .script_refresh(RefreshOutcome::Reject("invalid_grant: token already used".to_string()));
    let refresh_calls = provider.refresh_calls.clone();
    let p = pipeline_with(provider).await;
    let account = p.connect_account(60).await;

    let (a, b) = tokio::join!(
        p.runtime.tokens.get_usable_access_token(&account),
        p.runtime.tokens.get_usable_access_token(&account)
    );
    assert_eq!(a.unwrap().access_token.expose_secret(), "access-1");
    assert_eq!(b.unwrap().access_token.expose_secret(), "access-1");
    assert_eq!(*refresh_calls.lock().unwrap(), 1);

    let stored = p.runtime.db.get_account(&account).await.unwrap().unwrap();
    assert!(stored.is_active);
    assert_eq!(
        p.runtime
            .vault
            .decrypt(stored.refresh_token_enc.as_deref().unwrap())
            .unwrap()
            .expose_secret(),
        "refresh-1"
    );
}

#[tokio::test]
async fn test_thread_retry_restarts_from_first_unit() {
    let p = pipeline().await;
    let account = p.connect_account(86_400).await;
    p.platform
        .succeed_next()
        .succeed_next()
        .fail_next(PlatformError::Network("502 Bad Gateway".to_string()));
    let units = (1..=3).map(|i| ContentUnit::text(format!("part {}/3", i))).collect();
    let id = p.schedule(&account, Content::Thread(units)).await;

    let first = p.deliver(&p.latest_delivery(), START).await;
    assert_eq!(
        first,
        DeliveryOutcome::RetryScheduled {
            schedule_id: id.clone(),
            retry_count: 1,
            next_attempt_at: START + 120,
        }
    );

    let pending = p.runtime.db.get_publication(&id).await.unwrap().unwrap();
    assert_eq!(pending.status, PublicationStatus::Scheduled);
    assert_eq!(pending.retry_count, 1);
    assert_eq!(pending.scheduled_at, START + 120);
    assert_eq!(pending.published_unit_ids, vec!["twitter-1", "twitter-2"]);
    assert!(pending.last_error.as_deref().unwrap().contains("502"));

    let retry_job = p.queue.jobs_for(&p.callback).pop().unwrap();
    assert_eq!(retry_job.job.not_before, START + 120);
    assert_eq!(retry_job.job.body["attempt"], 1);

    // No idempotency keys on the platforms: the whole thread goes out again
    let second = p.deliver(&p.latest_delivery(), START + 120).await;
    assert!(matches!(second, DeliveryOutcome::Posted { .. }));

    let stored = p.runtime.db.get_publication(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, PublicationStatus::Posted);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.platform_post_id.as_deref(), Some("twitter-3"));
    assert_eq!(stored.published_unit_ids, vec!["twitter-3", "twitter-4", "twitter-5"]);
    assert_eq!(
        p.platform.published_units(),
        vec!["part 1/3", "part 2/3", "part 1/3", "part 2/3", "part 3/3"]
    );
    assert_eq!(p.platform.publish_calls(), 2);
}
