//! Configuration management for Crosscast
//!
//! Non-secret settings live in a TOML file. Secrets (the vault key, queue
//! credentials, OAuth client secrets) are only ever read from the
//! environment and kept in [`SecretString`]s.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::types::SocialPlatform;

pub const ENV_CONFIG: &str = "CROSSCAST_CONFIG";
pub const ENV_DB_PATH: &str = "CROSSCAST_DB_PATH";
pub const ENV_ENCRYPTION_KEY: &str = "CROSSCAST_ENCRYPTION_KEY";
pub const ENV_QUEUE_TOKEN: &str = "CROSSCAST_QUEUE_TOKEN";
pub const ENV_QUEUE_SIGNING_KEY: &str = "CROSSCAST_QUEUE_SIGNING_KEY";
pub const ENV_QUEUE_NEXT_SIGNING_KEY: &str = "CROSSCAST_QUEUE_NEXT_SIGNING_KEY";
pub const ENV_TWITTER_CLIENT_SECRET: &str = "CROSSCAST_TWITTER_CLIENT_SECRET";
pub const ENV_LINKEDIN_CLIENT_SECRET: &str = "CROSSCAST_LINKEDIN_CLIENT_SECRET";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    pub twitter: Option<PlatformAppConfig>,
    pub linkedin: Option<PlatformAppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/crosscast/crosscast.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to
    pub bind: String,
    /// Externally reachable base URL of this server
    pub public_url: String,
    /// Browser landing page after an OAuth handshake
    pub app_redirect_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
            app_redirect_url: "http://localhost:3000/settings/accounts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Base URL of the delayed delivery service
    pub endpoint: String,
    /// Where deliveries land; defaults to `<public_url>/webhooks/post-execute`
    pub callback_url: Option<String>,
    /// Optional downstream analytics collector notified after a post lands
    pub analytics_url: Option<String>,
    /// Delay before the analytics collector is invoked
    pub analytics_delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://qstash.upstash.io".to_string(),
            callback_url: None,
            analytics_url: None,
            analytics_delay_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    pub max_retries: u32,
    /// How long a `posting` claim is honoured before another delivery may take it over
    pub posting_lease_secs: i64,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            posting_lease_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Tokens expiring sooner than this are refreshed before use
    pub refresh_threshold_secs: i64,
    /// The sweep refreshes tokens expiring within this window
    pub sweep_window_secs: i64,
    /// Pause between accounts during a sweep
    pub sweep_delay_ms: u64,
    /// How often `cast-serve` runs the sweep; 0 disables it
    pub sweep_interval_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: 5 * 60,
            sweep_window_secs: 60 * 60,
            sweep_delay_ms: 500,
            sweep_interval_secs: 15 * 60,
        }
    }
}

impl TokenConfig {
    pub fn sweep_delay(&self) -> Duration {
        Duration::from_millis(self.sweep_delay_ms)
    }
}

/// OAuth application registration for one platform.
///
/// Endpoint overrides exist for staging environments and tests; when absent
/// the platform's public endpoints are used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformAppConfig {
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Pause between units of a thread
    #[serde(default = "default_thread_delay_ms")]
    pub thread_delay_ms: u64,
}

fn default_thread_delay_ms() -> u64 {
    1000
}

impl PlatformAppConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: None,
            scopes: None,
            authorize_url: None,
            token_url: None,
            api_base: None,
            thread_delay_ms: default_thread_delay_ms(),
        }
    }

    pub fn thread_delay(&self) -> Duration {
        Duration::from_millis(self.thread_delay_ms)
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;

        if let Ok(db_path) = std::env::var(ENV_DB_PATH) {
            config.database.path = db_path;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (or the resolved default location), falling back to
    /// defaults when the file does not exist. `CROSSCAST_DB_PATH` applies
    /// either way.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => resolve_config_path()?,
        };
        if path.exists() {
            return Self::load_from_path(&path);
        }

        tracing::debug!(path = %path.display(), "No config file found, using defaults");
        let mut config = Self::default_config();
        if let Ok(db_path) = std::env::var(ENV_DB_PATH) {
            config.database.path = db_path;
        }
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.publishing.max_retries > 10 {
            return Err(ConfigError::InvalidValue {
                field: "publishing.max_retries".to_string(),
                reason: "must be at most 10".to_string(),
            }
            .into());
        }
        for platform in SocialPlatform::ALL {
            if let Some(app) = self.platform_app(platform) {
                if app.client_id.trim().is_empty() {
                    return Err(ConfigError::MissingField(format!("{}.client_id", platform)).into());
                }
            }
        }
        Ok(())
    }

    /// OAuth application settings for a platform, if it is enabled.
    pub fn platform_app(&self, platform: SocialPlatform) -> Option<&PlatformAppConfig> {
        match platform {
            SocialPlatform::Twitter => self.twitter.as_ref(),
            SocialPlatform::LinkedIn => self.linkedin.as_ref(),
        }
    }

    /// URL the delayed queue delivers publish jobs to.
    pub fn callback_url(&self) -> String {
        self.queue.callback_url.clone().unwrap_or_else(|| {
            format!(
                "{}/webhooks/post-execute",
                self.server.public_url.trim_end_matches('/')
            )
        })
    }

    /// OAuth redirect URI registered for a platform.
    pub fn redirect_uri(&self, platform: SocialPlatform) -> String {
        self.platform_app(platform)
            .and_then(|app| app.redirect_uri.clone())
            .unwrap_or_else(|| {
                format!(
                    "{}/oauth/{}/callback",
                    self.server.public_url.trim_end_matches('/'),
                    platform
                )
            })
    }
}

/// Secrets supplied by the host environment at process start.
#[derive(Default)]
pub struct Secrets {
    pub encryption_key: Option<SecretString>,
    pub queue_token: Option<SecretString>,
    /// Current signing key first, then the next key during rotation
    pub signing_keys: Vec<SecretString>,
    pub twitter_client_secret: Option<SecretString>,
    pub linkedin_client_secret: Option<SecretString>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("encryption_key", &self.encryption_key.is_some())
            .field("queue_token", &self.queue_token.is_some())
            .field("signing_keys", &self.signing_keys.len())
            .field("twitter_client_secret", &self.twitter_client_secret.is_some())
            .field("linkedin_client_secret", &self.linkedin_client_secret.is_some())
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(SecretString::from)
        };

        Self {
            encryption_key: read(ENV_ENCRYPTION_KEY),
            queue_token: read(ENV_QUEUE_TOKEN),
            signing_keys: [ENV_QUEUE_SIGNING_KEY, ENV_QUEUE_NEXT_SIGNING_KEY]
                .into_iter()
                .filter_map(read)
                .collect(),
            twitter_client_secret: read(ENV_TWITTER_CLIENT_SECRET),
            linkedin_client_secret: read(ENV_LINKEDIN_CLIENT_SECRET),
        }
    }

    pub fn encryption_key(&self) -> Result<&SecretString> {
        self.encryption_key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnv(ENV_ENCRYPTION_KEY.to_string()).into())
    }

    pub fn queue_token(&self) -> Result<&SecretString> {
        self.queue_token
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnv(ENV_QUEUE_TOKEN.to_string()).into())
    }

    pub fn client_secret(&self, platform: SocialPlatform) -> Option<&SecretString> {
        match platform {
            SocialPlatform::Twitter => self.twitter_client_secret.as_ref(),
            SocialPlatform::LinkedIn => self.linkedin_client_secret.as_ref(),
        }
    }
}

/// Resolve the configuration file path, honouring `CROSSCAST_CONFIG` first
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosscast").join("config.toml"))
}
