//! Mock OAuth provider for testing
//!
//! Available for all builds so integration tests in other crates can wire a
//! handshake or a token refresh without a real token endpoint.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{OAuthProvider, TokenGrant};
use crate::error::{AuthError, PlatformError, Result};
use crate::types::{PlatformProfile, SocialPlatform};

/// Scripted answer to one refresh call.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// Issue `access`, optionally rotating the refresh token
    Grant {
        access: String,
        refresh: Option<String>,
        expires_in: Option<i64>,
    },
    /// Token endpoint rejects the refresh token
    Reject(String),
    /// Token endpoint unreachable
    Unavailable(String),
    /// Token endpoint answers 429
    Throttled(String),
}

pub struct MockOAuthProvider {
    pub platform: SocialPlatform,
    pub pkce: bool,
    /// Consumed front to back; when empty a fresh grant is issued
    pub refresh_script: Arc<Mutex<VecDeque<RefreshOutcome>>>,
    pub exchange_calls: Arc<Mutex<usize>>,
    pub refresh_calls: Arc<Mutex<usize>>,
    /// Refresh tokens presented to `refresh`, in order
    pub refresh_tokens_seen: Arc<Mutex<Vec<String>>>,
}

impl MockOAuthProvider {
    pub fn new(platform: SocialPlatform, pkce: bool) -> Self {
        Self {
            platform,
            pkce,
            refresh_script: Arc::new(Mutex::new(VecDeque::new())),
            exchange_calls: Arc::new(Mutex::new(0)),
            refresh_calls: Arc::new(Mutex::new(0)),
            refresh_tokens_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn twitter() -> Self {
        Self::new(SocialPlatform::Twitter, true)
    }

    pub fn linkedin() -> Self {
        Self::new(SocialPlatform::LinkedIn, false)
    }

    /// Queue the outcome of the next refresh call.
    pub fn script_refresh(self, outcome: RefreshOutcome) -> Self {
        if let Ok(mut script) = self.refresh_script.lock() {
            script.push_back(outcome);
        }
        self
    }

    /// Every refresh is rejected by the token endpoint.
    pub fn rejecting_refresh(self, reason: &str) -> Self {
        let outcomes = (0..16).map(|_| RefreshOutcome::Reject(reason.to_string()));
        if let Ok(mut script) = self.refresh_script.lock() {
            script.extend(outcomes);
        }
        self
    }

    fn bump(counter: &Mutex<usize>) -> usize {
        counter
            .lock()
            .map(|mut n| {
                *n += 1;
                *n
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl OAuthProvider for MockOAuthProvider {
    fn platform(&self) -> SocialPlatform {
        self.platform
    }

    fn requires_pkce(&self) -> bool {
        self.pkce
    }

    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        code_challenge: Option<&str>,
    ) -> Result<String> {
        let mut url = format!(
            "https://auth.mock/{}/authorize?redirect_uri={}&state={}",
            self.platform, redirect_uri, state
        );
        if let Some(challenge) = code_challenge {
            url.push_str(&format!("&code_challenge={}&code_challenge_method=S256", challenge));
        }
        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant> {
        Self::bump(&self.exchange_calls);
        if self.pkce && code_verifier.is_none() {
            return Err(AuthError::Exchange("invalid_request: missing code_verifier".to_string()).into());
        }
        Ok(TokenGrant {
            access_token: SecretString::from(format!("access-{}", code)),
            refresh_token: Some(SecretString::from(format!("refresh-{}", code))),
            expires_in: Some(7200),
        })
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant> {
        let n = Self::bump(&self.refresh_calls);
        if let Ok(mut seen) = self.refresh_tokens_seen.lock() {
            seen.push(refresh_token.expose_secret().to_string());
        }

        let next = self.refresh_script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(RefreshOutcome::Grant {
                access,
                refresh,
                expires_in,
            }) => Ok(TokenGrant {
                access_token: SecretString::from(access),
                refresh_token: refresh.map(SecretString::from),
                expires_in,
            }),
            Some(RefreshOutcome::Reject(reason)) => Err(AuthError::Exchange(reason).into()),
            Some(RefreshOutcome::Unavailable(reason)) => Err(PlatformError::Network(reason).into()),
            Some(RefreshOutcome::Throttled(reason)) => Err(PlatformError::RateLimit(reason).into()),
            None => Ok(TokenGrant {
                access_token: SecretString::from(format!("refreshed-access-{}", n)),
                refresh_token: None,
                expires_in: Some(7200),
            }),
        }
    }

    async fn fetch_profile(&self, _access_token: &SecretString) -> Result<PlatformProfile> {
        Ok(PlatformProfile {
            id: "mock-user".to_string(),
            display_name: Some("Mock User".to_string()),
        })
    }
}
