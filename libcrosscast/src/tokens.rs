//! Access token lifecycle
//!
//! Account token columns are written only from here (and by the handshake
//! when an account is first connected). A refresh that fails because the
//! platform rejected the refresh token deactivates the account: only the
//! user can fix that by reconnecting.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::TokenConfig;
use crate::db::{Database, TokenUpdate};
use crate::error::{AuthError, CrosscastError, Result};
use crate::oauth::OAuthProviders;
use crate::types::ConnectedAccount;
use crate::vault::CredentialVault;

/// Where an account's access token stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Usable as stored
    Valid,
    /// Inside the refresh threshold or already expired; needs a refresh
    Refreshing,
    /// Account deactivated; the user has to reconnect
    ExpiredUnrecoverable,
}

impl TokenState {
    pub fn of(account: &ConnectedAccount, now: i64, threshold_secs: i64) -> Self {
        if !account.is_active {
            return TokenState::ExpiredUnrecoverable;
        }
        match account.token_expires_at {
            None => TokenState::Valid,
            Some(expires_at) if expires_at - now > threshold_secs => TokenState::Valid,
            Some(_) => TokenState::Refreshing,
        }
    }
}

/// A decrypted access token ready for one API call.
pub struct UsableToken {
    pub access_token: SecretString,
    pub account: ConnectedAccount,
}

impl std::fmt::Debug for UsableToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsableToken")
            .field("access_token", &"<redacted>")
            .field("account_id", &self.account.id)
            .finish()
    }
}

/// Result of a batch refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    pub refreshed: usize,
    pub failed: usize,
    /// Accounts without a refresh token
    pub skipped: usize,
}

#[derive(Clone)]
pub struct TokenManager {
    db: Database,
    vault: Arc<CredentialVault>,
    providers: OAuthProviders,
    config: TokenConfig,
    refresh_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TokenManager {
    pub fn new(
        db: Database,
        vault: Arc<CredentialVault>,
        providers: OAuthProviders,
        config: TokenConfig,
    ) -> Self {
        Self {
            db,
            vault,
            providers,
            config,
            refresh_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn load(&self, account_id: &str) -> Result<ConnectedAccount> {
        self.db
            .get_account(account_id)
            .await?
            .ok_or_else(|| CrosscastError::NotFound(format!("connected account {}", account_id)))
    }

    /// Return an access token that stays valid for at least the refresh
    /// threshold, refreshing first if needed.
    pub async fn get_usable_access_token(&self, account_id: &str) -> Result<UsableToken> {
        let account = self.load(account_id).await?;
        let now = chrono::Utc::now().timestamp();

        match TokenState::of(&account, now, self.config.refresh_threshold_secs) {
            TokenState::ExpiredUnrecoverable => Err(inactive(&account)),
            TokenState::Valid => {
                let access_token = self.vault.reveal_stored(&account.access_token_enc)?;
                Ok(UsableToken {
                    access_token,
                    account,
                })
            }
            TokenState::Refreshing => {
                tracing::debug!(
                    account_id = %account.id,
                    expires_at = ?account.token_expires_at,
                    "Access token near expiry, refreshing"
                );
                self.refresh(account).await
            }
        }
    }

    /// Refresh regardless of expiry; used after a platform rejects a token.
    pub async fn force_refresh(&self, account_id: &str) -> Result<UsableToken> {
        let account = self.load(account_id).await?;
        if !account.is_active {
            return Err(inactive(&account));
        }
        self.refresh(account).await
    }

    /// Mark an account unusable with a reason the user will see.
    pub async fn deactivate(&self, account_id: &str, reason: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.db.deactivate_account(account_id, reason, now).await?;
        tracing::warn!(account_id = %account_id, reason = %reason, "Account deactivated");
        Ok(())
    }

    fn refresh_lock(&self, account_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(account_id.to_string()).or_default().clone()
    }

    /// Refresh with at most one refresh per account in flight in this
    /// process. A caller that waited behind another refresh reuses its
    /// result instead of presenting a refresh token that may have rotated.
    async fn refresh(&self, account: ConnectedAccount) -> Result<UsableToken> {
        let lock = self.refresh_lock(&account.id);
        let _guard = lock.lock().await;

        let current = self.load(&account.id).await?;
        if current.access_token_enc != account.access_token_enc {
            tracing::debug!(account_id = %account.id, "Token refreshed while waiting, using stored token");
            return self.stored_token(current);
        }
        if !current.is_active {
            return Err(inactive(&current));
        }
        self.refresh_unlocked(current).await
    }

    async fn refresh_unlocked(&self, account: ConnectedAccount) -> Result<UsableToken> {
        let Some(refresh_enc) = account.refresh_token_enc.as_deref() else {
            let reason = format!(
                "{} did not issue a refresh token; reconnect the account",
                account.platform
            );
            self.deactivate(&account.id, &reason).await?;
            return Err(AuthError::ReauthenticationRequired(reason).into());
        };

        let refresh_token = match self.vault.reveal_stored(refresh_enc) {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(account_id = %account.id, error = %e, "Stored refresh token is unreadable");
                return match self
                    .reject(&account, "stored refresh token is corrupt; reconnect the account")
                    .await
                {
                    Err(rejected) if rejected.is_reauthentication_required() => Err(e),
                    other => other,
                };
            }
        };

        let provider = self.providers.get(account.platform)?;
        let grant = match provider.refresh(&refresh_token).await {
            Ok(grant) => grant,
            Err(CrosscastError::Platform(e)) if e.is_transient() => {
                // Unreachable or throttled: nothing is known about the credential
                tracing::warn!(account_id = %account.id, error = %e, "Token refresh unavailable");
                return Err(e.into());
            }
            Err(e) => {
                let reason = format!("Token refresh failed: {}", e);
                return self.reject(&account, &reason).await;
            }
        };

        let now = chrono::Utc::now().timestamp();
        let update = TokenUpdate {
            access_token_enc: self.vault.encrypt(grant.access_token.expose_secret())?,
            refresh_token_enc: grant
                .refresh_token
                .as_ref()
                .map(|t| self.vault.encrypt(t.expose_secret()))
                .transpose()?,
            token_expires_at: grant.expires_at(now),
        };

        let won = self
            .db
            .update_tokens_if_unchanged(&account.id, &account.access_token_enc, &update, now)
            .await?;

        if !won {
            // A concurrent refresh already stored a newer token
            tracing::debug!(account_id = %account.id, "Lost refresh race, using stored token");
            let current = self.load(&account.id).await?;
            return self.stored_token(current);
        }

        tracing::info!(
            account_id = %account.id,
            platform = %account.platform,
            rotated = update.refresh_token_enc.is_some(),
            "Access token refreshed"
        );
        let refreshed = ConnectedAccount {
            access_token_enc: update.access_token_enc,
            refresh_token_enc: update.refresh_token_enc.or(account.refresh_token_enc.clone()),
            token_expires_at: update.token_expires_at,
            last_verified_at: Some(now),
            last_error: None,
            updated_at: now,
            ..account
        };
        Ok(UsableToken {
            access_token: grant.access_token,
            account: refreshed,
        })
    }

    /// Deactivate after the platform refused the refresh, unless the row no
    /// longer holds the token this attempt started from. A refresh token
    /// that was rotated by a concurrent refresh is refused too, and the
    /// account is healthy in that case.
    async fn reject(&self, account: &ConnectedAccount, reason: &str) -> Result<UsableToken> {
        let now = chrono::Utc::now().timestamp();
        let deactivated = self
            .db
            .deactivate_account_if_unchanged(&account.id, &account.access_token_enc, reason, now)
            .await?;

        if !deactivated {
            tracing::debug!(
                account_id = %account.id,
                "Refresh refused after a concurrent refresh, using stored token"
            );
            let current = self.load(&account.id).await?;
            return self.stored_token(current);
        }

        tracing::warn!(account_id = %account.id, reason = %reason, "Account deactivated");
        Err(AuthError::ReauthenticationRequired(reason.to_string()).into())
    }

    fn stored_token(&self, account: ConnectedAccount) -> Result<UsableToken> {
        if !account.is_active {
            return Err(inactive(&account));
        }
        let access_token = self.vault.reveal_stored(&account.access_token_enc)?;
        Ok(UsableToken {
            access_token,
            account,
        })
    }

    /// Refresh every active account whose token expires within the sweep
    /// window, one at a time with a pause between accounts.
    ///
    /// One account failing never stops the sweep.
    pub async fn refresh_expiring_tokens(&self) -> Result<SweepReport> {
        let now = chrono::Utc::now().timestamp();
        let accounts = self
            .db
            .find_expiring_accounts(now + self.config.sweep_window_secs)
            .await?;

        let mut report = SweepReport::default();
        for (i, account) in accounts.into_iter().enumerate() {
            if i > 0 && !self.config.sweep_delay().is_zero() {
                tokio::time::sleep(self.config.sweep_delay()).await;
            }

            if account.refresh_token_enc.is_none() {
                tracing::debug!(account_id = %account.id, "No refresh token, skipping");
                report.skipped += 1;
                continue;
            }

            let account_id = account.id.clone();
            match self.refresh(account).await {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    tracing::warn!(account_id = %account_id, error = %e, "Sweep refresh failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            refreshed = report.refreshed,
            failed = report.failed,
            skipped = report.skipped,
            "Token sweep finished"
        );
        Ok(report)
    }
}

fn inactive(account: &ConnectedAccount) -> CrosscastError {
    AuthError::ReauthenticationRequired(
        account
            .last_error
            .clone()
            .unwrap_or_else(|| format!("{} account is disconnected", account.platform)),
    )
    .into()
}
