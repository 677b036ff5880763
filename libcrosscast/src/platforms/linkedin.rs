//! LinkedIn UGC API client
//!
//! A thread on LinkedIn is a post followed by comments on that post, in
//! order.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::{map_status, map_transport, ApiSettings, PlatformClient};
use crate::error::{CrosscastError, PlatformError, Result};
use crate::types::{ContentUnit, PostMetrics, PublishReceipt, SequenceReceipt, SocialPlatform};

pub const API_BASE: &str = "https://api.linkedin.com";
pub const CHARACTER_LIMIT: usize = 3000;
const RESTLI_HEADER: &str = "X-Restli-Protocol-Version";
const RESTLI_VERSION: &str = "2.0.0";

pub fn feed_url(urn: &str) -> String {
    format!("https://www.linkedin.com/feed/update/{}", urn)
}

/// Percent-encode the URN characters that are significant in a path.
fn encode_urn(urn: &str) -> String {
    let mut out = String::with_capacity(urn.len() + 16);
    for c in urn.chars() {
        match c {
            ':' => out.push_str("%3A"),
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            ',' => out.push_str("%2C"),
            _ => out.push(c),
        }
    }
    out
}

pub struct LinkedInClient {
    http: reqwest::Client,
    settings: ApiSettings,
    access_token: SecretString,
    author: String,
}

#[derive(Deserialize)]
struct CreatedEntity {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "$URN", default)]
    urn: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct SocialActions {
    likes_summary: LikesSummary,
    comments_summary: CommentsSummary,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct LikesSummary {
    total_likes: u64,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct CommentsSummary {
    aggregated_total_comments: u64,
}

impl LinkedInClient {
    pub fn new(
        http: reqwest::Client,
        settings: ApiSettings,
        access_token: SecretString,
        platform_user_id: &str,
    ) -> Self {
        Self {
            http,
            settings,
            access_token,
            author: format!("urn:li:person:{}", platform_user_id),
        }
    }

    async fn post_json(&self, url: String, body: serde_json::Value) -> Result<(Option<String>, CreatedEntity)> {
        let response = self
            .http
            .post(url)
            .bearer_auth(self.access_token.expose_secret())
            .header(RESTLI_HEADER, RESTLI_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text).into());
        }

        let restli_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(map_transport)?;
        let entity = if text.trim().is_empty() {
            CreatedEntity { id: None, urn: None }
        } else {
            serde_json::from_str(&text)
                .map_err(|e| PlatformError::Posting(format!("Unexpected LinkedIn response: {}", e)))?
        };
        Ok((restli_id, entity))
    }

    async fn create_post(&self, unit: &ContentUnit) -> Result<PublishReceipt> {
        let media: Vec<serde_json::Value> = unit
            .media_refs
            .iter()
            .map(|urn| json!({"status": "READY", "media": urn}))
            .collect();
        let category = if media.is_empty() { "NONE" } else { "IMAGE" };
        let mut share = json!({
            "shareCommentary": {"text": unit.text},
            "shareMediaCategory": category,
        });
        if !media.is_empty() {
            share["media"] = serde_json::Value::Array(media);
        }

        let body = json!({
            "author": self.author,
            "lifecycleState": "PUBLISHED",
            "specificContent": {"com.linkedin.ugc.ShareContent": share},
            "visibility": {"com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"},
        });

        let (restli_id, entity) = self
            .post_json(format!("{}/v2/ugcPosts", self.settings.api_base), body)
            .await?;
        let urn = entity.id.or(restli_id).ok_or_else(|| {
            PlatformError::Posting("LinkedIn did not return the created post URN".to_string())
        })?;

        tracing::debug!(urn = %urn, "LinkedIn post created");
        Ok(PublishReceipt {
            url: feed_url(&urn),
            id: urn,
        })
    }

    async fn create_comment(&self, parent_urn: &str, unit: &ContentUnit) -> Result<PublishReceipt> {
        let body = json!({
            "actor": self.author,
            "message": {"text": unit.text},
        });
        let (restli_id, entity) = self
            .post_json(
                format!(
                    "{}/v2/socialActions/{}/comments",
                    self.settings.api_base,
                    encode_urn(parent_urn)
                ),
                body,
            )
            .await?;
        let id = entity.urn.or(entity.id).or(restli_id).ok_or_else(|| {
            PlatformError::Posting("LinkedIn did not return the created comment id".to_string())
        })?;

        tracing::debug!(comment = %id, parent = %parent_urn, "LinkedIn comment created");
        Ok(PublishReceipt {
            id,
            url: feed_url(parent_urn),
        })
    }
}

#[async_trait]
impl PlatformClient for LinkedInClient {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::LinkedIn
    }

    fn character_limit(&self) -> usize {
        CHARACTER_LIMIT
    }

    async fn publish_single(&self, unit: &ContentUnit) -> Result<PublishReceipt> {
        self.validate_unit(unit)?;
        self.create_post(unit).await
    }

    async fn publish_sequence(&self, units: &[ContentUnit]) -> Result<SequenceReceipt> {
        for unit in units {
            self.validate_unit(unit)?;
        }
        let Some((first, rest)) = units.split_first() else {
            return Err(PlatformError::Validation("Thread must contain at least one unit".to_string()).into());
        };

        let mut receipt = SequenceReceipt::default();
        let head = self.create_post(first).await?;
        let parent = head.id.clone();
        receipt.push(head);

        for (offset, unit) in rest.iter().enumerate() {
            if !self.settings.thread_delay.is_zero() {
                tokio::time::sleep(self.settings.thread_delay).await;
            }
            match self.create_comment(&parent, unit).await {
                Ok(r) => receipt.push(r),
                Err(CrosscastError::Platform(source)) => {
                    return Err(PlatformError::PartialSequence {
                        published_ids: receipt.ids,
                        failed_index: offset + 1,
                        source: Box::new(source),
                    }
                    .into());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(receipt)
    }

    async fn fetch_metrics(&self, post_ids: &[String]) -> Result<Vec<PostMetrics>> {
        let mut metrics = Vec::with_capacity(post_ids.len());
        for urn in post_ids {
            let response = self
                .http
                .get(format!("{}/v2/socialActions/{}", self.settings.api_base, encode_urn(urn)))
                .bearer_auth(self.access_token.expose_secret())
                .header(RESTLI_HEADER, RESTLI_VERSION)
                .send()
                .await
                .map_err(map_transport)?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(map_status(status, &text).into());
            }

            let actions: SocialActions = response
                .json()
                .await
                .map_err(|e| PlatformError::Posting(format!("Unexpected metrics response: {}", e)))?;
            metrics.push(PostMetrics {
                post_id: urn.clone(),
                likes: actions.likes_summary.total_likes,
                replies: actions.comments_summary.aggregated_total_comments,
                reposts: 0,
                impressions: None,
            });
        }
        Ok(metrics)
    }
}
