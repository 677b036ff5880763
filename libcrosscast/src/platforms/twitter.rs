//! Twitter (X) API v2 client

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{map_status, map_transport, ApiSettings, PlatformClient};
use crate::error::{PlatformError, Result};
use crate::types::{ContentUnit, PostMetrics, PublishReceipt, SequenceReceipt, SocialPlatform};

pub const API_BASE: &str = "https://api.twitter.com";
pub const CHARACTER_LIMIT: usize = 280;

pub fn status_url(tweet_id: &str) -> String {
    format!("https://twitter.com/i/web/status/{}", tweet_id)
}

pub struct TwitterClient {
    http: reqwest::Client,
    settings: ApiSettings,
    access_token: SecretString,
}

#[derive(Serialize)]
struct CreateTweet<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<Reply<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<Media<'a>>,
}

#[derive(Serialize)]
struct Reply<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Serialize)]
struct Media<'a> {
    media_ids: &'a [String],
}

#[derive(Deserialize)]
struct CreateTweetResponse {
    data: TweetRef,
}

#[derive(Deserialize)]
struct TweetRef {
    id: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    data: Vec<TweetWithMetrics>,
}

#[derive(Deserialize)]
struct TweetWithMetrics {
    id: String,
    public_metrics: PublicMetrics,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PublicMetrics {
    like_count: u64,
    reply_count: u64,
    retweet_count: u64,
    quote_count: u64,
    impression_count: Option<u64>,
}

impl TwitterClient {
    pub fn new(http: reqwest::Client, settings: ApiSettings, access_token: SecretString) -> Self {
        Self {
            http,
            settings,
            access_token,
        }
    }

    async fn create_tweet(&self, unit: &ContentUnit, reply_to: Option<&str>) -> Result<PublishReceipt> {
        let body = CreateTweet {
            text: &unit.text,
            reply: reply_to.map(|id| Reply {
                in_reply_to_tweet_id: id,
            }),
            media: (!unit.media_refs.is_empty()).then(|| Media {
                media_ids: &unit.media_refs,
            }),
        };

        let response = self
            .http
            .post(format!("{}/2/tweets", self.settings.api_base))
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text).into());
        }

        let created: CreateTweetResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Posting(format!("Unexpected create-tweet response: {}", e)))?;

        tracing::debug!(tweet_id = %created.data.id, reply_to = ?reply_to, "Tweet created");
        Ok(PublishReceipt {
            url: status_url(&created.data.id),
            id: created.data.id,
        })
    }
}

#[async_trait]
impl PlatformClient for TwitterClient {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::Twitter
    }

    fn character_limit(&self) -> usize {
        CHARACTER_LIMIT
    }

    async fn publish_single(&self, unit: &ContentUnit) -> Result<PublishReceipt> {
        self.validate_unit(unit)?;
        self.create_tweet(unit, None).await
    }

    async fn publish_sequence(&self, units: &[ContentUnit]) -> Result<SequenceReceipt> {
        for unit in units {
            self.validate_unit(unit)?;
        }

        let mut receipt = SequenceReceipt::default();
        for (index, unit) in units.iter().enumerate() {
            if index > 0 && !self.settings.thread_delay.is_zero() {
                tokio::time::sleep(self.settings.thread_delay).await;
            }

            let reply_to = receipt.ids.last().cloned();
            match self.create_tweet(unit, reply_to.as_deref()).await {
                Ok(r) => receipt.push(r),
                Err(crate::error::CrosscastError::Platform(source)) if index > 0 => {
                    return Err(PlatformError::PartialSequence {
                        published_ids: receipt.ids,
                        failed_index: index,
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
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = post_ids.join(",");
        let response = self
            .http
            .get(format!("{}/2/tweets", self.settings.api_base))
            .query(&[("ids", ids.as_str()), ("tweet.fields", "public_metrics")])
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text).into());
        }

        let lookup: LookupResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Posting(format!("Unexpected metrics response: {}", e)))?;

        Ok(lookup
            .data
            .into_iter()
            .map(|t| PostMetrics {
                post_id: t.id,
                likes: t.public_metrics.like_count,
                replies: t.public_metrics.reply_count,
                reposts: t.public_metrics.retweet_count + t.public_metrics.quote_count,
                impressions: t.public_metrics.impression_count,
            })
            .collect())
    }
}
