//! Platform abstraction and implementations
//!
//! A [`PlatformClient`] is built per publish attempt with the access token
//! that attempt obtained, through a [`PlatformConnector`]. There are no
//! global client singletons: the dispatcher is handed a connector and asks
//! it for a client when it needs one.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosscast::platforms::{HttpConnector, PlatformConnector, PlatformSession};
//! use libcrosscast::types::{ContentUnit, SocialPlatform};
//! use libcrosscast::Config;
//! use secrecy::SecretString;
//!
//! # async fn example() -> libcrosscast::error::Result<()> {
//! let connector = HttpConnector::from_config(&Config::default())?;
//! let client = connector.connect(PlatformSession {
//!     platform: SocialPlatform::Twitter,
//!     access_token: SecretString::from("token"),
//!     platform_user_id: "12345".to_string(),
//! })?;
//!
//! let receipt = client.publish_single(&ContentUnit::text("Hello!")).await?;
//! println!("Posted: {}", receipt.url);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::SecretString;
use std::time::Duration;

use crate::config::Config;
use crate::error::{PlatformError, Result};
use crate::types::{Content, ContentUnit, PostMetrics, PublishReceipt, SequenceReceipt, SocialPlatform};

pub mod linkedin;
pub mod twitter;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Unified interface to a destination platform's REST API.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn platform(&self) -> SocialPlatform;

    /// Maximum characters per unit.
    fn character_limit(&self) -> usize;

    /// Reject content the platform would refuse, before any network call.
    fn validate_unit(&self, unit: &ContentUnit) -> Result<()> {
        if unit.text.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }
        let length = unit.text.chars().count();
        if length > self.character_limit() {
            return Err(PlatformError::Validation(format!(
                "Content is {} characters; {} allows {}",
                length,
                self.platform(),
                self.character_limit()
            ))
            .into());
        }
        Ok(())
    }

    async fn publish_single(&self, unit: &ContentUnit) -> Result<PublishReceipt>;

    /// Publish units in order, each linked to the previous one.
    ///
    /// A failure after the first unit is reported as
    /// [`PlatformError::PartialSequence`] carrying the ids already
    /// published.
    async fn publish_sequence(&self, units: &[ContentUnit]) -> Result<SequenceReceipt>;

    async fn fetch_metrics(&self, post_ids: &[String]) -> Result<Vec<PostMetrics>>;
}

/// Credentials for one client instance.
pub struct PlatformSession {
    pub platform: SocialPlatform,
    pub access_token: SecretString,
    /// Author identity some APIs need in the request body
    pub platform_user_id: String,
}

/// Builds per-call platform clients.
pub trait PlatformConnector: Send + Sync {
    fn connect(&self, session: PlatformSession) -> Result<Box<dyn PlatformClient>>;
}

/// Per-unit character limit of a platform.
pub fn character_limit(platform: SocialPlatform) -> usize {
    match platform {
        SocialPlatform::Twitter => twitter::CHARACTER_LIMIT,
        SocialPlatform::LinkedIn => linkedin::CHARACTER_LIMIT,
    }
}

/// Publish content of either shape and return every unit's receipt.
pub async fn publish_content(client: &dyn PlatformClient, content: &Content) -> Result<SequenceReceipt> {
    match content {
        Content::Single(unit) => {
            let receipt = client.publish_single(unit).await?;
            let mut out = SequenceReceipt::default();
            out.push(receipt);
            Ok(out)
        }
        Content::Thread(units) => client.publish_sequence(units).await,
    }
}

/// Map a non-success HTTP status to the error taxonomy.
///
/// 401 is an auth rejection, 400/403/422 are content rejections, 429 is a
/// rate limit, and everything else (5xx in particular) is treated as a
/// transient network problem.
pub fn map_status(status: StatusCode, body: &str) -> PlatformError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, truncate(body, 300))
    };
    match status.as_u16() {
        401 => PlatformError::Authentication(detail),
        400 | 403 | 422 => PlatformError::Validation(detail),
        429 => PlatformError::RateLimit(detail),
        _ => PlatformError::Network(detail),
    }
}

/// Map a transport failure.
pub fn map_transport(error: reqwest::Error) -> PlatformError {
    PlatformError::Network(error.to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Per-platform endpoint settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api_base: String,
    pub thread_delay: Duration,
}

/// Connector producing real REST clients.
#[derive(Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    twitter: ApiSettings,
    linkedin: ApiSettings,
}

impl HttpConnector {
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(map_transport)?;

        let settings = |platform: SocialPlatform, default_base: &str| {
            let app = config.platform_app(platform);
            ApiSettings {
                api_base: app
                    .and_then(|a| a.api_base.clone())
                    .unwrap_or_else(|| default_base.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                thread_delay: app.map(|a| a.thread_delay()).unwrap_or(Duration::from_secs(1)),
            }
        };

        Ok(Self {
            http,
            twitter: settings(SocialPlatform::Twitter, twitter::API_BASE),
            linkedin: settings(SocialPlatform::LinkedIn, linkedin::API_BASE),
        })
    }
}

impl PlatformConnector for HttpConnector {
    fn connect(&self, session: PlatformSession) -> Result<Box<dyn PlatformClient>> {
        match session.platform {
            SocialPlatform::Twitter => Ok(Box::new(twitter::TwitterClient::new(
                self.http.clone(),
                self.twitter.clone(),
                session.access_token,
            ))),
            SocialPlatform::LinkedIn => Ok(Box::new(linkedin::LinkedInClient::new(
                self.http.clone(),
                self.linkedin.clone(),
                session.access_token,
                &session.platform_user_id,
            ))),
        }
    }
}
