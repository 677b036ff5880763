//! REST clients and the token endpoint against fake Twitter/LinkedIn
//! services served by axum.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use libcrosscast::config::{Config, PlatformAppConfig, Secrets, TokenConfig};
use libcrosscast::error::{CrosscastError, PlatformError};
use libcrosscast::oauth::OAuthProviders;
use libcrosscast::platforms::{publish_content, HttpConnector, PlatformConnector, PlatformSession};
use libcrosscast::{
    ConnectedAccount, Content, ContentUnit, CredentialVault, Database, SocialPlatform, TokenManager,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Clone, Default)]
struct FakeApi {
    /// (path, authorization header, body) per write request
    writes: Arc<Mutex<Vec<(String, String, Value)>>>,
    next_id: Arc<Mutex<u64>>,
}

impl FakeApi {
    fn record(&self, path: &str, headers: &HeaderMap, body: &Value) -> u64 {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.writes
            .lock()
            .unwrap()
            .push((path.to_string(), auth, body.clone()));
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        *id
    }

    fn writes(&self) -> Vec<(String, String, Value)> {
        self.writes.lock().unwrap().clone()
    }
}

fn scripted_failure(text: &str) -> Option<Response> {
    if text.contains("[503]") {
        return Some((StatusCode::SERVICE_UNAVAILABLE, "upstream busy").into_response());
    }
    if text.contains("[401]") {
        return Some((StatusCode::UNAUTHORIZED, Json(json!({"title": "Unauthorized"}))).into_response());
    }
    if text.contains("[403]") {
        return Some((StatusCode::FORBIDDEN, Json(json!({"detail": "duplicate content"}))).into_response());
    }
    None
}

async fn create_tweet(State(api): State<FakeApi>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Some(failure) = scripted_failure(body["text"].as_str().unwrap_or_default()) {
        return failure;
    }
    let id = api.record("/2/tweets", &headers, &body);
    (StatusCode::CREATED, Json(json!({"data": {"id": format!("{}", 1000 + id), "text": body["text"]}})))
        .into_response()
}

async fn lookup_tweets(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let data: Vec<Value> = query["ids"]
        .split(',')
        .map(|id| {
            json!({
                "id": id,
                "text": "x",
                "public_metrics": {
                    "like_count": 7, "reply_count": 2, "retweet_count": 3,
                    "quote_count": 1, "impression_count": 420
                }
            })
        })
        .collect();
    Json(json!({ "data": data }))
}

async fn create_ugc_post(State(api): State<FakeApi>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let text = body["specificContent"]["com.linkedin.ugc.ShareContent"]["shareCommentary"]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    if let Some(failure) = scripted_failure(&text) {
        return failure;
    }
    let id = api.record("/v2/ugcPosts", &headers, &body);
    (
        StatusCode::CREATED,
        [("x-restli-id", format!("urn:li:share:{}", id))],
        "",
    )
        .into_response()
}

async fn create_comment(
    State(api): State<FakeApi>,
    Path(urn): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(failure) = scripted_failure(body["message"]["text"].as_str().unwrap_or_default()) {
        return failure;
    }
    let id = api.record(&format!("/v2/socialActions/{}/comments", urn), &headers, &body);
    (
        StatusCode::CREATED,
        Json(json!({"$URN": format!("urn:li:comment:({},{})", urn, id), "id": id.to_string()})),
    )
        .into_response()
}

async fn social_actions(Path(_urn): Path<String>) -> Json<Value> {
    Json(json!({
        "likesSummary": {"totalLikes": 11},
        "commentsSummary": {"aggregatedTotalComments": 4}
    }))
}

async fn spawn_fake_api() -> (String, FakeApi) {
    let api = FakeApi::default();
    let app = Router::new()
        .route("/2/tweets", post(create_tweet).get(lookup_tweets))
        .route("/v2/ugcPosts", post(create_ugc_post))
        .route("/v2/socialActions/{urn}/comments", post(create_comment))
        .route("/v2/socialActions/{urn}", get(social_actions))
        .with_state(api.clone());

    (serve(app).await, api)
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn connector(base: &str) -> HttpConnector {
    let app = |client_id: &str| {
        let mut app = PlatformAppConfig::new(client_id);
        app.api_base = Some(base.to_string());
        app.thread_delay_ms = 0;
        app
    };
    let config = Config {
        twitter: Some(app("tw-client")),
        linkedin: Some(app("li-client")),
        ..Config::default()
    };
    HttpConnector::from_config(&config).unwrap()
}

fn session(platform: SocialPlatform) -> PlatformSession {
    PlatformSession {
        platform,
        access_token: SecretString::from("live-token"),
        platform_user_id: "member-9".to_string(),
    }
}

fn thread(texts: &[&str]) -> Content {
    Content::Thread(texts.iter().map(|t| ContentUnit::text(*t)).collect())
}

#[tokio::test]
async fn test_twitter_thread_links_replies() {
    let (base, api) = spawn_fake_api().await;
    let client = connector(&base).connect(session(SocialPlatform::Twitter)).unwrap();

    let receipt = publish_content(client.as_ref(), &thread(&["one", "two", "three"]))
        .await
        .unwrap();
    assert_eq!(receipt.ids, vec!["1001", "1002", "1003"]);
    assert_eq!(receipt.urls[0], "https://twitter.com/i/web/status/1001");

    let writes = api.writes();
    assert_eq!(writes.len(), 3);
    assert_eq!(writes[0].1, "Bearer live-token");
    assert!(writes[0].2.get("reply").is_none());
    assert_eq!(writes[1].2["reply"]["in_reply_to_tweet_id"], "1001");
    assert_eq!(writes[2].2["reply"]["in_reply_to_tweet_id"], "1002");
}

#[tokio::test]
async fn test_twitter_partial_thread_reports_prefix() {
    let (base, _api) = spawn_fake_api().await;
    let client = connector(&base).connect(session(SocialPlatform::Twitter)).unwrap();

    let err = publish_content(client.as_ref(), &thread(&["a", "b", "c [503]", "d", "e"]))
        .await
        .unwrap_err();
    match err {
        CrosscastError::Platform(e @ PlatformError::PartialSequence { .. }) => {
            assert_eq!(e.published_prefix(), ["1001", "1002"]);
            assert!(e.is_transient());
        }
        other => panic!("expected a partial sequence, got {other}"),
    }
}

#[tokio::test]
async fn test_twitter_status_mapping() {
    let (base, _api) = spawn_fake_api().await;
    let client = connector(&base).connect(session(SocialPlatform::Twitter)).unwrap();

    let err = client.publish_single(&ContentUnit::text("[401]")).await.unwrap_err();
    assert!(matches!(err, CrosscastError::Platform(PlatformError::Authentication(_))));

    let err = client.publish_single(&ContentUnit::text("[403]")).await.unwrap_err();
    match err {
        CrosscastError::Platform(e) => {
            assert!(matches!(e, PlatformError::Validation(_)));
            assert!(!e.is_transient());
        }
        other => panic!("unexpected {other}"),
    }
}

#[tokio::test]
async fn test_twitter_metrics() {
    let (base, _api) = spawn_fake_api().await;
    let client = connector(&base).connect(session(SocialPlatform::Twitter)).unwrap();

    let metrics = client
        .fetch_metrics(&["1".to_string(), "2".to_string()])
        .await
        .unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[1].post_id, "2");
    assert_eq!(metrics[0].likes, 7);
    assert_eq!(metrics[0].reposts, 4);
    assert_eq!(metrics[0].impressions, Some(420));
}

#[tokio::test]
async fn test_linkedin_thread_becomes_comments() {
    let (base, api) = spawn_fake_api().await;
    let client = connector(&base).connect(session(SocialPlatform::LinkedIn)).unwrap();

    let receipt = publish_content(client.as_ref(), &thread(&["post", "first comment", "second comment"]))
        .await
        .unwrap();
    assert_eq!(receipt.ids[0], "urn:li:share:1");
    assert_eq!(receipt.urls[0], "https://www.linkedin.com/feed/update/urn:li:share:1");
    assert_eq!(receipt.ids.len(), 3);

    let writes = api.writes();
    assert_eq!(writes[0].0, "/v2/ugcPosts");
    assert_eq!(writes[0].2["author"], "urn:li:person:member-9");
    assert_eq!(writes[0].2["lifecycleState"], "PUBLISHED");
    assert_eq!(writes[1].0, "/v2/socialActions/urn:li:share:1/comments");
    assert_eq!(writes[1].2["actor"], "urn:li:person:member-9");
    assert_eq!(writes[2].2["message"]["text"], "second comment");
}

#[tokio::test]
async fn test_linkedin_comment_failure_keeps_post_id() {
    let (base, _api) = spawn_fake_api().await;
    let client = connector(&base).connect(session(SocialPlatform::LinkedIn)).unwrap();

    let err = publish_content(client.as_ref(), &thread(&["post", "comment [403]"]))
        .await
        .unwrap_err();
    match err {
        CrosscastError::Platform(PlatformError::PartialSequence {
            published_ids,
            failed_index,
            source,
        }) => {
            assert_eq!(published_ids, vec!["urn:li:share:1"]);
            assert_eq!(failed_index, 1);
            assert!(matches!(*source, PlatformError::Validation(_)));
        }
        other => panic!("expected a partial sequence, got {other}"),
    }
}

#[tokio::test]
async fn test_linkedin_metrics() {
    let (base, _api) = spawn_fake_api().await;
    let client = connector(&base).connect(session(SocialPlatform::LinkedIn)).unwrap();

    let metrics = client.fetch_metrics(&["urn:li:share:1".to_string()]).await.unwrap();
    assert_eq!(metrics[0].likes, 11);
    assert_eq!(metrics[0].replies, 4);
}

/// Token endpoint answering by the refresh token it is shown.
async fn token_endpoint(Form(form): Form<HashMap<String, String>>) -> Response {
    match form.get("refresh_token").map(String::as_str) {
        Some("throttled") => (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response(),
        Some("revoked") => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": "token revoked"})),
        )
            .into_response(),
        _ => Json(json!({
            "token_type": "bearer",
            "access_token": "fresh-access",
            "expires_in": 7200
        }))
        .into_response(),
    }
}

struct TokenEnv {
    manager: TokenManager,
    db: Database,
    vault: Arc<CredentialVault>,
    _dir: TempDir,
}

async fn token_env() -> TokenEnv {
    let base = serve(Router::new().route("/2/oauth2/token", post(token_endpoint))).await;
    let mut twitter = PlatformAppConfig::new("tw-client");
    twitter.token_url = Some(format!("{}/2/oauth2/token", base));
    let config = Config {
        twitter: Some(twitter),
        ..Config::default()
    };
    let providers = OAuthProviders::from_config(&config, &Secrets::default()).unwrap();

    let dir = TempDir::new().unwrap();
    let db = Database::new(dir.path().join("tokens.db").to_str().unwrap())
        .await
        .unwrap();
    let vault = Arc::new(CredentialVault::new(&[9u8; 32]));
    let manager = TokenManager::new(db.clone(), vault.clone(), providers, TokenConfig::default());
    TokenEnv {
        manager,
        db,
        vault,
        _dir: dir,
    }
}

impl TokenEnv {
    /// Store an account whose access token is inside the refresh threshold.
    async fn expiring_account(&self, refresh_token: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        self.db
            .upsert_account(&ConnectedAccount {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: format!("user-{}", refresh_token),
                platform: SocialPlatform::Twitter,
                platform_user_id: "tw-7".to_string(),
                platform_username: None,
                access_token_enc: self.vault.encrypt("stale-access").unwrap(),
                refresh_token_enc: Some(self.vault.encrypt(refresh_token).unwrap()),
                token_expires_at: Some(now + 60),
                is_active: true,
                last_verified_at: Some(now),
                last_error: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
            .id
    }
}

#[tokio::test]
async fn test_token_endpoint_rate_limit_keeps_account_active() {
    let env = token_env().await;
    let account = env.expiring_account("throttled").await;

    let err = env.manager.get_usable_access_token(&account).await.unwrap_err();
    match err {
        CrosscastError::Platform(e) => {
            assert!(matches!(e, PlatformError::RateLimit(_)));
            assert!(e.is_transient());
        }
        other => panic!("expected a rate limit, got {other}"),
    }

    let stored = env.db.get_account(&account).await.unwrap().unwrap();
    assert!(stored.is_active);
    assert!(stored.last_error.is_none());
}

#[tokio::test]
async fn test_token_endpoint_rejection_deactivates_account() {
    let env = token_env().await;
    let account = env.expiring_account("revoked").await;

    let err = env.manager.get_usable_access_token(&account).await.unwrap_err();
    assert!(err.is_reauthentication_required());

    let stored = env.db.get_account(&account).await.unwrap().unwrap();
    assert!(!stored.is_active);
    assert!(stored.last_error.unwrap().contains("invalid_grant"));
}

#[tokio::test]
async fn test_token_endpoint_grant_is_stored() {
    let env = token_env().await;
    let account = env.expiring_account("good").await;

    let token = env.manager.get_usable_access_token(&account).await.unwrap();
    assert_eq!(token.access_token.expose_secret(), "fresh-access");
    let stored = env.db.get_account(&account).await.unwrap().unwrap();
    assert_eq!(
        env.vault.decrypt(&stored.access_token_enc).unwrap().expose_secret(),
        "fresh-access"
    );
}
