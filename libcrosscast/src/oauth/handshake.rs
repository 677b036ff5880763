//! Browser connect flow
//!
//! `begin` issues a CSRF state (and a PKCE verifier where the platform
//! needs one), persists it server-side with a short TTL and returns the
//! platform's authorization URL. The platform redirects back with
//! `code` and `state`; `complete_from_store` consumes the stored state
//! exactly once, exchanges the code and upserts the connected account.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use super::{pkce, OAuthProviders};
use crate::db::{Database, OAuthStateRow};
use crate::error::{AuthError, Result};
use crate::types::{ConnectedAccount, SocialPlatform};
use crate::vault::CredentialVault;

/// Pending states expire after this many seconds.
pub const STATE_TTL_SECS: i64 = 10 * 60;

/// What the browser needs to start a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: Option<String>,
}

/// Inputs for finishing a handshake once the platform has redirected back.
#[derive(Debug, Clone)]
pub struct HandshakeCompletion {
    pub user_id: String,
    pub platform: SocialPlatform,
    pub code: String,
    /// State echoed back by the platform
    pub state: String,
    /// State issued when the handshake began
    pub stored_state: String,
    pub code_verifier: Option<String>,
    pub redirect_uri: String,
}

#[derive(Clone)]
pub struct HandshakeController {
    db: Database,
    vault: Arc<CredentialVault>,
    providers: OAuthProviders,
    state_ttl_secs: i64,
}

impl HandshakeController {
    pub fn new(db: Database, vault: Arc<CredentialVault>, providers: OAuthProviders) -> Self {
        Self {
            db,
            vault,
            providers,
            state_ttl_secs: STATE_TTL_SECS,
        }
    }

    /// Override the pending-state lifetime; capped at ten minutes.
    pub fn with_state_ttl(mut self, secs: i64) -> Self {
        self.state_ttl_secs = secs.clamp(1, STATE_TTL_SECS);
        self
    }

    /// Build the authorization URL with a fresh state and, for PKCE
    /// platforms, a fresh verifier. Nothing is persisted.
    pub fn build_authorization_url(
        &self,
        platform: SocialPlatform,
        redirect_uri: &str,
    ) -> Result<AuthorizationRequest> {
        let provider = self.providers.get(platform)?;
        let state = pkce::generate_state();
        let code_verifier = provider.requires_pkce().then(pkce::generate_verifier);
        let challenge = code_verifier.as_deref().map(pkce::challenge_s256);

        let url = provider.authorization_url(redirect_uri, &state, challenge.as_deref())?;
        Ok(AuthorizationRequest {
            url,
            state,
            code_verifier,
        })
    }

    /// Start a handshake for `user_id` and remember its state.
    pub async fn begin(
        &self,
        user_id: &str,
        platform: SocialPlatform,
        redirect_uri: &str,
    ) -> Result<AuthorizationRequest> {
        let request = self.build_authorization_url(platform, redirect_uri)?;
        let now = chrono::Utc::now().timestamp();

        let code_verifier_enc = request
            .code_verifier
            .as_deref()
            .map(|v| self.vault.encrypt(v))
            .transpose()?;

        self.db
            .insert_oauth_state(&OAuthStateRow {
                state: request.state.clone(),
                user_id: user_id.to_string(),
                platform,
                redirect_uri: redirect_uri.to_string(),
                code_verifier_enc,
                created_at: now,
                expires_at: now + self.state_ttl_secs,
            })
            .await?;

        match self.db.purge_oauth_states(now).await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Purged stale OAuth states"),
            Err(e) => tracing::warn!(error = %e, "Failed to purge stale OAuth states"),
        }

        tracing::info!(user_id = %user_id, platform = %platform, "OAuth handshake started");
        Ok(request)
    }

    /// Exchange the code and store the connected account.
    ///
    /// A state mismatch is rejected before any network call or write.
    pub async fn complete_handshake(&self, completion: HandshakeCompletion) -> Result<ConnectedAccount> {
        if completion.state.is_empty() || completion.state != completion.stored_state {
            tracing::warn!(
                user_id = %completion.user_id,
                platform = %completion.platform,
                "OAuth callback state mismatch"
            );
            return Err(AuthError::CsrfMismatch.into());
        }

        let provider = self.providers.get(completion.platform)?;
        if provider.requires_pkce() && completion.code_verifier.is_none() {
            return Err(AuthError::Exchange("missing PKCE verifier".to_string()).into());
        }

        let grant = provider
            .exchange_code(
                &completion.code,
                &completion.redirect_uri,
                completion.code_verifier.as_deref(),
            )
            .await?;
        let profile = provider.fetch_profile(&grant.access_token).await?;

        let now = chrono::Utc::now().timestamp();
        let account = ConnectedAccount {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: completion.user_id.clone(),
            platform: completion.platform,
            platform_user_id: profile.id,
            platform_username: profile.display_name,
            access_token_enc: self.vault.encrypt(grant.access_token.expose_secret())?,
            refresh_token_enc: grant
                .refresh_token
                .as_ref()
                .map(|t| self.vault.encrypt(t.expose_secret()))
                .transpose()?,
            token_expires_at: grant.expires_at(now),
            is_active: true,
            last_verified_at: Some(now),
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        let stored = self.db.upsert_account(&account).await?;
        tracing::info!(
            account_id = %stored.id,
            user_id = %stored.user_id,
            platform = %stored.platform,
            has_refresh_token = stored.refresh_token_enc.is_some(),
            "Connected account stored"
        );
        Ok(stored)
    }

    /// Finish a handshake using the server-side state row.
    ///
    /// Unknown, expired and replayed states are all rejected as
    /// [`AuthError::StateExpiredOrReplayed`].
    pub async fn complete_from_store(
        &self,
        platform: SocialPlatform,
        code: &str,
        state: &str,
    ) -> Result<ConnectedAccount> {
        let now = chrono::Utc::now().timestamp();
        let row = self
            .db
            .consume_oauth_state(state, platform, now)
            .await?
            .ok_or(AuthError::StateExpiredOrReplayed)?;

        let code_verifier = row
            .code_verifier_enc
            .as_deref()
            .map(|enc| self.vault.decrypt(enc))
            .transpose()?
            .map(|v: SecretString| v.expose_secret().to_string());

        self.complete_handshake(HandshakeCompletion {
            user_id: row.user_id,
            platform,
            code: code.to_string(),
            state: state.to_string(),
            stored_state: row.state,
            code_verifier,
            redirect_uri: row.redirect_uri,
        })
        .await
    }

    /// Remove a user's connection to a platform.
    pub async fn disconnect(&self, user_id: &str, platform: SocialPlatform) -> Result<bool> {
        let removed = self.db.delete_account_for_user(user_id, platform).await?;
        if removed {
            tracing::info!(user_id = %user_id, platform = %platform, "Account disconnected");
        }
        Ok(removed)
    }
}
