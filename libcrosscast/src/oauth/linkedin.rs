//! LinkedIn OAuth 2.0 (authorization code, no PKCE)

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{get_json, http_client, request_token, OAuthProvider, TokenGrant};
use crate::config::PlatformAppConfig;
use crate::error::{CrosscastError, Result};
use crate::types::{PlatformProfile, SocialPlatform};

pub const AUTHORIZE_URL: &str = "https://www.linkedin.com/oauth/v2/authorization";
pub const TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";
pub const API_BASE: &str = "https://api.linkedin.com";
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "w_member_social"];

pub struct LinkedInOAuth {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    authorize_url: String,
    token_url: String,
    api_base: String,
}

/// OpenID Connect userinfo
#[derive(Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    name: Option<String>,
}

impl LinkedInOAuth {
    pub fn new(app: &PlatformAppConfig, client_secret: &str) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            client_id: app.client_id.clone(),
            client_secret: client_secret.to_string(),
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
}

#[async_trait]
impl OAuthProvider for LinkedInOAuth {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::LinkedIn
    }

    fn requires_pkce(&self) -> bool {
        false
    }

    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        _code_challenge: Option<&str>,
    ) -> Result<String> {
        let scope = self.scopes.join(" ");
        let url = reqwest::Url::parse_with_params(
            &self.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
                ("scope", scope.as_str()),
            ],
        )
        .map_err(|e| CrosscastError::InvalidInput(format!("Invalid authorize URL: {}", e)))?;

        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> Result<TokenGrant> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        request_token(&self.http, &self.token_url, &form, None).await
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        request_token(&self.http, &self.token_url, &form, None).await
    }

    async fn fetch_profile(&self, access_token: &SecretString) -> Result<PlatformProfile> {
        let url = format!("{}/v2/userinfo", self.api_base);
        let info: UserInfo = get_json(&self.http, &url, access_token).await?;
        Ok(PlatformProfile {
            id: info.sub,
            display_name: info.name,
        })
    }
}
