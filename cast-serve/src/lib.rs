//! HTTP surface of the publishing pipeline
//!
//! - `POST /webhooks/post-execute`: signed queue deliveries
//! - `GET /oauth/{platform}/connect`: start a connect flow for the user in `X-User-Id`
//! - `GET /oauth/{platform}/callback`: platform redirect target
//! - `DELETE /oauth/{platform}`: disconnect
//! - `GET /healthz`

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use libcrosscast::error::{AuthError, CrosscastError, QueueError};
use libcrosscast::oauth::HandshakeController;
use libcrosscast::queue::SIGNATURE_HEADER;
use libcrosscast::{Config, PublishDispatcher, Runtime, SocialPlatform};

/// Header the gateway sets to the authenticated user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: PublishDispatcher,
    pub handshake: HandshakeController,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(runtime: &Runtime, config: Config) -> Self {
        Self {
            dispatcher: runtime.dispatcher.clone(),
            handshake: runtime.handshake.clone(),
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/post-execute", post(post_execute))
        .route("/oauth/{platform}/connect", get(oauth_connect))
        .route("/oauth/{platform}/callback", get(oauth_callback))
        .route("/oauth/{platform}", delete(oauth_disconnect))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn post_execute(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    match state.dispatcher.handle_delivery(signature, &body).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(CrosscastError::Queue(QueueError::InvalidSignature)) => {
            (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid signature"}))).into_response()
        }
        Err(e) => {
            // Non-2xx makes the queue redeliver
            tracing::error!(error = %e, "Delivery could not be processed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

fn parse_platform(raw: &str) -> Result<SocialPlatform, Response> {
    raw.parse::<SocialPlatform>().map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown platform: {}", raw)})),
        )
            .into_response()
    })
}

fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Browser-facing failures land back in the app with a short code.
fn app_redirect(config: &Config, param: &str, value: &str) -> Response {
    let base = &config.server.app_redirect_url;
    let separator = if base.contains('?') { '&' } else { '?' };
    Redirect::to(&format!("{}{}{}={}", base, separator, param, value)).into_response()
}

fn error_code(error: &CrosscastError) -> &'static str {
    match error {
        CrosscastError::Auth(AuthError::CsrfMismatch) => "csrf_mismatch",
        CrosscastError::Auth(AuthError::StateExpiredOrReplayed) => "state_expired",
        CrosscastError::Auth(AuthError::Exchange(_)) => "exchange_failed",
        CrosscastError::Auth(AuthError::UnsupportedPlatform(_)) => "platform_not_configured",
        CrosscastError::Platform(_) => "platform_unavailable",
        _ => "internal_error",
    }
}

async fn oauth_connect(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    headers: HeaderMap,
) -> Response {
    let platform = match parse_platform(&platform) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let Some(user_id) = user_id(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing user identity"})),
        )
            .into_response();
    };

    let redirect_uri = state.config.redirect_uri(platform);
    match state.handshake.begin(&user_id, platform, &redirect_uri).await {
        Ok(request) => Redirect::to(&request.url).into_response(),
        Err(e) => {
            tracing::error!(platform = %platform, error = %e, "Could not start OAuth handshake");
            app_redirect(&state.config, "error", error_code(&e))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    /// Set by the platform when the user declined
    error: Option<String>,
}

async fn oauth_callback(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let platform = match parse_platform(&platform) {
        Ok(p) => p,
        Err(response) => return response,
    };

    if let Some(denied) = params.error.as_deref() {
        tracing::info!(platform = %platform, error = %denied, "User declined authorization");
        return app_redirect(&state.config, "error", "access_denied");
    }
    let (Some(code), Some(oauth_state)) = (params.code.as_deref(), params.state.as_deref()) else {
        return app_redirect(&state.config, "error", "missing_parameters");
    };

    match state
        .handshake
        .complete_from_store(platform, code, oauth_state)
        .await
    {
        Ok(account) => {
            tracing::info!(
                account_id = %account.id,
                platform = %platform,
                "Account connected"
            );
            app_redirect(&state.config, "connected", platform.as_str())
        }
        Err(e) => {
            tracing::warn!(platform = %platform, error = %e, "OAuth callback failed");
            app_redirect(&state.config, "error", error_code(&e))
        }
    }
}

async fn oauth_disconnect(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    headers: HeaderMap,
) -> Response {
    let platform = match parse_platform(&platform) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let Some(user_id) = user_id(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match state.handshake.disconnect(&user_id, platform).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Disconnect failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz(State(state): State<AppState>) -> Response {
    match state.dispatcher.queue_stats().await {
        Ok(stats) => Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "publications": stats,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable", "error": e.to_string()})),
        )
            .into_response(),
    }
}
