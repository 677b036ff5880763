//! Core types for Crosscast

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CrosscastError, Result};

/// Destination platforms the pipeline can publish to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    Twitter,
    LinkedIn,
}

impl SocialPlatform {
    pub const ALL: [SocialPlatform; 2] = [SocialPlatform::Twitter, SocialPlatform::LinkedIn];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::LinkedIn => "linkedin",
        }
    }
}

impl fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialPlatform {
    type Err = CrosscastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "twitter" | "x" => Ok(SocialPlatform::Twitter),
            "linkedin" => Ok(SocialPlatform::LinkedIn),
            other => Err(CrosscastError::InvalidInput(format!(
                "Unknown platform '{}'. Valid options: twitter, linkedin",
                other
            ))),
        }
    }
}

/// A user's OAuth connection to one platform.
///
/// Token columns hold vault envelopes (`iv:tag:ciphertext`); accounts
/// connected before encryption was introduced may still hold plaintext
/// until `cast-creds migrate` runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectedAccount {
    pub id: String,
    pub user_id: String,
    pub platform: SocialPlatform,
    pub platform_user_id: String,
    pub platform_username: Option<String>,
    pub access_token_enc: String,
    pub refresh_token_enc: Option<String>,
    /// Unix timestamp; `None` when the platform did not report an expiry
    pub token_expires_at: Option<i64>,
    pub is_active: bool,
    pub last_verified_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Lifecycle status of a scheduled publication.
///
/// `scheduled -> posting -> {posted | scheduled (retry) | failed}`, with
/// `cancelled` reachable from `scheduled` or `posting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    Scheduled,
    Posting,
    Posted,
    Failed,
    Cancelled,
}

impl PublicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationStatus::Scheduled => "scheduled",
            PublicationStatus::Posting => "posting",
            PublicationStatus::Posted => "posted",
            PublicationStatus::Failed => "failed",
            PublicationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PublicationStatus::Posted | PublicationStatus::Failed | PublicationStatus::Cancelled
        )
    }
}

impl fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublicationStatus {
    type Err = CrosscastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(PublicationStatus::Scheduled),
            "posting" => Ok(PublicationStatus::Posting),
            "posted" => Ok(PublicationStatus::Posted),
            "failed" => Ok(PublicationStatus::Failed),
            "cancelled" => Ok(PublicationStatus::Cancelled),
            other => Err(CrosscastError::InvalidInput(format!(
                "Unknown publication status '{}'",
                other
            ))),
        }
    }
}

/// One postable unit: a tweet, or a LinkedIn post or comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUnit {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_refs: Vec<String>,
}

impl ContentUnit {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media_refs: Vec::new(),
        }
    }
}

/// Discriminator carried alongside the content payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Single,
    Thread,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Single => "single",
            ContentType::Thread => "thread",
        }
    }
}

impl FromStr for ContentType {
    type Err = CrosscastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "single" => Ok(ContentType::Single),
            "thread" => Ok(ContentType::Thread),
            other => Err(CrosscastError::InvalidInput(format!(
                "Unknown content type '{}'. Valid options: single, thread",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SequenceData {
    units: Vec<ContentUnit>,
}

/// Content payload: a single unit or an ordered thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Single(ContentUnit),
    Thread(Vec<ContentUnit>),
}

impl Content {
    pub fn content_type(&self) -> ContentType {
        match self {
            Content::Single(_) => ContentType::Single,
            Content::Thread(_) => ContentType::Thread,
        }
    }

    /// All units in publishing order.
    pub fn units(&self) -> &[ContentUnit] {
        match self {
            Content::Single(unit) => std::slice::from_ref(unit),
            Content::Thread(units) => units.as_slice(),
        }
    }

    /// Serialize the body that travels as `contentData`.
    pub fn to_data(&self) -> serde_json::Value {
        let value = match self {
            Content::Single(unit) => serde_json::to_value(unit),
            Content::Thread(units) => serde_json::to_value(SequenceData {
                units: units.clone(),
            }),
        };
        value.unwrap_or(serde_json::Value::Null)
    }

    /// Rebuild content from its discriminator and `contentData` body.
    pub fn from_parts(content_type: ContentType, data: serde_json::Value) -> Result<Self> {
        let content = match content_type {
            ContentType::Single => {
                let unit: ContentUnit = serde_json::from_value(data).map_err(|e| {
                    CrosscastError::InvalidInput(format!("Invalid single-unit content: {}", e))
                })?;
                Content::Single(unit)
            }
            ContentType::Thread => {
                let seq: SequenceData = serde_json::from_value(data).map_err(|e| {
                    CrosscastError::InvalidInput(format!("Invalid thread content: {}", e))
                })?;
                Content::Thread(seq.units)
            }
        };
        content.validate()?;
        Ok(content)
    }

    /// Structural checks shared by every platform.
    pub fn validate(&self) -> Result<()> {
        if self.units().is_empty() {
            return Err(CrosscastError::InvalidInput(
                "Thread must contain at least one unit".to_string(),
            ));
        }
        if let Some(pos) = self.units().iter().position(|u| u.text.trim().is_empty()) {
            return Err(CrosscastError::InvalidInput(format!(
                "Content unit {} is empty",
                pos + 1
            )));
        }
        Ok(())
    }
}

/// A publication queued for one platform and time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledPublication {
    pub id: String,
    pub account_id: String,
    pub platform: SocialPlatform,
    pub content: Content,
    pub scheduled_at: i64,
    pub status: PublicationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    /// Ids already published when a thread failed partway; diagnostics only
    pub published_unit_ids: Vec<String>,
    pub job_id: Option<String>,
    pub posted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScheduledPublication {
    pub fn new(
        account_id: String,
        platform: SocialPlatform,
        content: Content,
        scheduled_at: i64,
        max_retries: u32,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            account_id,
            platform,
            content,
            scheduled_at,
            status: PublicationStatus::Scheduled,
            retry_count: 0,
            max_retries,
            last_error: None,
            platform_post_id: None,
            platform_post_url: None,
            published_unit_ids: Vec::new(),
            job_id: None,
            posted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What a platform returns for one published unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub id: String,
    pub url: String,
}

/// What a platform returns for an ordered sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SequenceReceipt {
    pub ids: Vec<String>,
    pub urls: Vec<String>,
}

impl SequenceReceipt {
    pub fn push(&mut self, receipt: PublishReceipt) {
        self.ids.push(receipt.id);
        self.urls.push(receipt.url);
    }

    /// The head of the thread, which identifies the publication.
    pub fn head(&self) -> Option<PublishReceipt> {
        Some(PublishReceipt {
            id: self.ids.first()?.clone(),
            url: self.urls.first()?.clone(),
        })
    }
}

/// Engagement counters for one published post.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PostMetrics {
    pub post_id: String,
    pub likes: u64,
    pub replies: u64,
    pub reposts: u64,
    pub impressions: Option<u64>,
}

/// Identity of a connected account as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub id: String,
    pub display_name: Option<String>,
}
