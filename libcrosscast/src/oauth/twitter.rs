//! Twitter (X) OAuth 2.0 with PKCE

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{get_json, http_client, request_token, OAuthProvider, TokenGrant};
use crate::config::PlatformAppConfig;
use crate::error::{CrosscastError, Result};
use crate::types::{PlatformProfile, SocialPlatform};

pub const AUTHORIZE_URL: &str = "https://twitter.com/i/oauth2/authorize";
pub const TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
pub const API_BASE: &str = "https://api.twitter.com";
pub const DEFAULT_SCOPES: &[&str] = &["tweet.read", "tweet.write", "users.read", "offline.access"];

pub struct TwitterOAuth {
    http: reqwest::Client,
    client_id: String,
    /// Confidential clients authenticate with Basic auth; public clients
    /// send only the client id
    client_secret: Option<String>,
    scopes: Vec<String>,
    authorize_url: String,
    token_url: String,
    api_base: String,
}

#[derive(Deserialize)]
struct MeResponse {
    data: MeData,
}

#[derive(Deserialize)]
struct MeData {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

impl TwitterOAuth {
    pub fn new(app: &PlatformAppConfig, client_secret: Option<&str>) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            client_id: app.client_id.clone(),
            client_secret: client_secret.map(str::to_string),
            scopes: app
                .scopes
                .clone()
                .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()),
            authorize_url: app.authorize_url.clone().unwrap_or_else(|| AUTHORIZE_URL.to_string()),
            token_url: app.token_url.clone().unwrap_or_else(|| TOKEN_URL.to_string()),
            api_base: app
                .api_base
                .clone()
                .unwrap_or_else(|| API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn basic_auth(&self) -> Option<(&str, &str)> {
        self.client_secret
            .as_deref()
            .map(|secret| (self.client_id.as_str(), secret))
    }
}

#[async_trait]
impl OAuthProvider for TwitterOAuth {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::Twitter
    }

    fn requires_pkce(&self) -> bool {
        true
    }

    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        code_challenge: Option<&str>,
    ) -> Result<String> {
        let challenge = code_challenge.ok_or_else(|| {
            CrosscastError::InvalidInput("Twitter authorization requires a PKCE challenge".to_string())
        })?;
        let scope = self.scopes.join(" ");

        let url = reqwest::Url::parse_with_params(
            &self.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
                ("state", state),
                ("code_challenge", challenge),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| CrosscastError::InvalidInput(format!("Invalid authorize URL: {}", e)))?;

        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant> {
        let verifier = code_verifier.ok_or_else(|| {
            CrosscastError::InvalidInput("Twitter code exchange requires the PKCE verifier".to_string())
        })?;

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
            ("client_id", self.client_id.as_str()),
        ];
        request_token(&self.http, &self.token_url, &form, self.basic_auth()).await
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", self.client_id.as_str()),
        ];
        request_token(&self.http, &self.token_url, &form, self.basic_auth()).await
    }

    async fn fetch_profile(&self, access_token: &SecretString) -> Result<PlatformProfile> {
        let url = format!("{}/2/users/me", self.api_base);
        let me: MeResponse = get_json(&self.http, &url, access_token).await?;
        Ok(PlatformProfile {
            id: me.data.id,
            display_name: me.data.username,
        })
    }
}
