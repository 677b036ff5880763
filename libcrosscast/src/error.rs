//! Error types for Crosscast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrosscastError>;

#[derive(Error, Debug)]
pub enum CrosscastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CrosscastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosscastError::InvalidInput(_) | CrosscastError::NotFound(_) => 3,
            CrosscastError::Auth(AuthError::ReauthenticationRequired(_)) => 2,
            CrosscastError::Platform(PlatformError::Authentication(_)) => 2,
            CrosscastError::Config(_) | CrosscastError::Database(_) => 2,
            CrosscastError::Vault(_) => 2,
            CrosscastError::Auth(_) | CrosscastError::Queue(_) | CrosscastError::Platform(_) => 1,
        }
    }

    /// True when the error means the stored credential is dead and the user
    /// has to redo the OAuth handshake.
    pub fn is_reauthentication_required(&self) -> bool {
        matches!(
            self,
            CrosscastError::Auth(AuthError::ReauthenticationRequired(_))
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// Integrity and key errors from the credential vault.
///
/// `TamperedOrCorrupt` is fatal: it means a stored secret can no longer be
/// trusted and must be surfaced to operators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Refusing to encrypt an empty secret")]
    EmptyPlaintext,

    #[error("Encryption key is invalid: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Encrypted secret is tampered or corrupt: {0}")]
    TamperedOrCorrupt(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("OAuth state does not match the state issued for this session")]
    CsrfMismatch,

    #[error("OAuth state is unknown, expired, or already used")]
    StateExpiredOrReplayed,

    #[error("Reauthentication required: {0}")]
    ReauthenticationRequired(String),

    #[error("OAuth code exchange failed: {0}")]
    Exchange(String),

    #[error("Platform {0} is not configured for OAuth")]
    UnsupportedPlatform(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Delivery signature is missing or invalid")]
    InvalidSignature,

    #[error("Failed to enqueue job: {0}")]
    Enqueue(String),

    #[error("Malformed delivery payload: {0}")]
    Payload(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Thread failed at unit {failed_index} after {} published: {source}", .published_ids.len())]
    PartialSequence {
        published_ids: Vec<String>,
        failed_index: usize,
        source: Box<PlatformError>,
    },
}

impl PlatformError {
    /// Whether retrying the same publication could succeed.
    ///
    /// Network trouble, 5xx and rate limits are transient. Content rejected
    /// by the platform is not: retrying cannot fix malformed content.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Network(_) | PlatformError::RateLimit(_) => true,
            PlatformError::Authentication(_)
            | PlatformError::Validation(_)
            | PlatformError::Posting(_) => false,
            PlatformError::PartialSequence { source, .. } => source.is_transient(),
        }
    }

    /// Whether the platform rejected the access token itself.
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            PlatformError::Authentication(_) => true,
            PlatformError::PartialSequence { source, .. } => source.is_auth_rejection(),
            _ => false,
        }
    }

    /// Ids of thread units that went out before the failure, if any.
    pub fn published_prefix(&self) -> &[String] {
        match self {
            PlatformError::PartialSequence { published_ids, .. } => published_ids.as_slice(),
            _ => &[],
        }
    }
}
