//! Wiring of the pipeline from configuration
//!
//! The binaries build one [`Runtime`] at start-up and pass its parts to
//! whoever needs them.

use std::sync::Arc;

use crate::analytics::QueueAnalytics;
use crate::config::{Config, Secrets};
use crate::db::Database;
use crate::dispatcher::PublishDispatcher;
use crate::error::Result;
use crate::oauth::{HandshakeController, OAuthProviders};
use crate::platforms::{HttpConnector, PlatformConnector};
use crate::queue::{DelayedQueue, HttpQueue, SignatureVerifier};
use crate::tokens::TokenManager;
use crate::vault::CredentialVault;

#[derive(Clone)]
pub struct Runtime {
    pub db: Database,
    pub vault: Arc<CredentialVault>,
    pub tokens: TokenManager,
    pub dispatcher: PublishDispatcher,
    pub handshake: HandshakeController,
}

impl Runtime {
    /// Production wiring: HTTP queue, REST platform clients and the
    /// configured OAuth applications.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or a required secret is
    /// missing from the environment.
    pub async fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let queue: Arc<dyn DelayedQueue> = Arc::new(HttpQueue::new(
            &config.queue.endpoint,
            secrets.queue_token()?.clone(),
        )?);
        let connector: Arc<dyn PlatformConnector> = Arc::new(HttpConnector::from_config(config)?);
        let providers = OAuthProviders::from_config(config, secrets)?;
        Self::assemble(config, secrets, queue, connector, providers).await
    }

    /// Wiring with caller-supplied collaborators; tests hand in mocks here.
    pub async fn assemble(
        config: &Config,
        secrets: &Secrets,
        queue: Arc<dyn DelayedQueue>,
        connector: Arc<dyn PlatformConnector>,
        providers: OAuthProviders,
    ) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;
        let vault = Arc::new(CredentialVault::from_encoded_key(secrets.encryption_key()?)?);

        let tokens = TokenManager::new(
            db.clone(),
            vault.clone(),
            providers.clone(),
            config.tokens.clone(),
        );

        if secrets.signing_keys.is_empty() {
            tracing::warn!("No queue signing key configured; every delivery will be rejected");
        }
        let verifier = SignatureVerifier::new(secrets.signing_keys.clone());

        let dispatcher = PublishDispatcher::new(
            db.clone(),
            tokens.clone(),
            connector,
            queue.clone(),
            verifier,
            config.callback_url(),
        )
        .with_analytics(QueueAnalytics::from_config(&config.queue, queue))
        .with_publishing(config.publishing.clone());

        let handshake = HandshakeController::new(db.clone(), vault.clone(), providers);

        Ok(Self {
            db,
            vault,
            tokens,
            dispatcher,
            handshake,
        })
    }
}
