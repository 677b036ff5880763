//! OAuth 2.0 providers and the connect handshake
//!
//! Each platform implements [`OAuthProvider`]: authorization URL
//! construction, authorization-code exchange, the refresh grant and a
//! minimal profile lookup. [`handshake::HandshakeController`] drives the
//! browser flow on top of it; [`crate::tokens::TokenManager`] uses the
//! refresh grant.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, Secrets};
use crate::error::{AuthError, CrosscastError, PlatformError, Result};
use crate::types::{PlatformProfile, SocialPlatform};

pub mod handshake;
pub mod linkedin;
pub mod mock;
pub mod pkce;
pub mod twitter;

pub use handshake::{AuthorizationRequest, HandshakeController};

/// Tokens issued by a platform's token endpoint.
pub struct TokenGrant {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Seconds until the access token expires, if the platform said
    pub expires_in: Option<i64>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl TokenGrant {
    pub fn expires_at(&self, now: i64) -> Option<i64> {
        self.expires_in.map(|secs| now + secs)
    }
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn platform(&self) -> SocialPlatform;

    /// Whether the authorization request must carry a PKCE challenge.
    fn requires_pkce(&self) -> bool;

    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        code_challenge: Option<&str>,
    ) -> Result<String>;

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant>;

    /// Refresh grant.
    ///
    /// A rejection by the token endpoint is `AuthError::Exchange`. Transport
    /// failures, timeouts and 5xx are `PlatformError::Network`, 429 is
    /// `PlatformError::RateLimit`.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant>;

    async fn fetch_profile(&self, access_token: &SecretString) -> Result<PlatformProfile>;
}

/// Registered OAuth applications, one per enabled platform.
#[derive(Clone, Default)]
pub struct OAuthProviders {
    providers: HashMap<SocialPlatform, Arc<dyn OAuthProvider>>,
}

impl OAuthProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
        self.providers.insert(provider.platform(), provider);
        self
    }

    /// Build providers for every platform section present in the config.
    pub fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let mut providers = Self::new();
        if let Some(app) = &config.twitter {
            let provider = twitter::TwitterOAuth::new(
                app,
                secrets.client_secret(SocialPlatform::Twitter).map(|s| s.expose_secret()),
            )?;
            providers = providers.with(Arc::new(provider));
        }
        if let Some(app) = &config.linkedin {
            let secret = secrets.client_secret(SocialPlatform::LinkedIn).ok_or_else(|| {
                crate::error::ConfigError::MissingEnv(
                    crate::config::ENV_LINKEDIN_CLIENT_SECRET.to_string(),
                )
            })?;
            let provider = linkedin::LinkedInOAuth::new(app, secret.expose_secret())?;
            providers = providers.with(Arc::new(provider));
        }
        Ok(providers)
    }

    pub fn get(&self, platform: SocialPlatform) -> Result<Arc<dyn OAuthProvider>> {
        self.providers
            .get(&platform)
            .cloned()
            .ok_or_else(|| AuthError::UnsupportedPlatform(platform.to_string()).into())
    }

    pub fn platforms(&self) -> Vec<SocialPlatform> {
        SocialPlatform::ALL
            .into_iter()
            .filter(|p| self.providers.contains_key(p))
            .collect()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
        .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)).into())
}

/// POST a form to a token endpoint and parse the grant.
///
/// `basic` sends client credentials as HTTP Basic auth instead of in the
/// form body.
pub(crate) async fn request_token(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
    basic: Option<(&str, &str)>,
) -> Result<TokenGrant> {
    let mut request = http
        .post(token_url)
        .header("Accept", "application/json")
        .form(form);
    if let Some((client_id, client_secret)) = basic {
        request = request.basic_auth(client_id, Some(client_secret));
    }

    let response = request
        .send()
        .await
        .map_err(|e| PlatformError::Network(format!("Token endpoint unreachable: {}", e)))?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(PlatformError::RateLimit(format!("Token endpoint returned {}", status)).into());
    }
    if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
        return Err(PlatformError::Network(format!("Token endpoint returned {}", status)).into());
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Exchange(format!("Token endpoint returned {}: {}", status, body)).into());
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::Exchange(format!("Unexpected token response: {}", e)))?;
    if parsed.access_token.is_empty() {
        return Err(AuthError::Exchange("Token endpoint returned an empty access token".to_string()).into());
    }

    Ok(TokenGrant {
        access_token: SecretString::from(parsed.access_token),
        refresh_token: parsed
            .refresh_token
            .filter(|t| !t.is_empty())
            .map(SecretString::from),
        expires_in: parsed.expires_in,
    })
}

/// GET a JSON document with a bearer token, mapping HTTP failures.
pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    access_token: &SecretString,
) -> Result<T> {
    let response = http
        .get(url)
        .bearer_auth(access_token.expose_secret())
        .send()
        .await
        .map_err(|e| PlatformError::Network(format!("Profile request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CrosscastError::Platform(crate::platforms::map_status(status, &body)));
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::Exchange(format!("Unexpected profile response: {}", e)).into())
}
