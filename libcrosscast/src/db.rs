//! Database operations for Crosscast
//!
//! All status changes on publication rows are guarded updates: the `WHERE`
//! clause carries the expected current state and the caller learns from
//! `rows_affected` whether it won. This is what makes concurrent queue
//! deliveries safe without holding locks across network calls.

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{
    Content, ContentType, ConnectedAccount, PublicationStatus, ScheduledPublication,
    SocialPlatform,
};

/// New token material written by a successful refresh.
#[derive(Debug, Clone)]
pub struct TokenUpdate {
    pub access_token_enc: String,
    /// `None` keeps the stored refresh token
    pub refresh_token_enc: Option<String>,
    pub token_expires_at: Option<i64>,
}

/// A pending OAuth handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthStateRow {
    pub state: String,
    pub user_id: String,
    pub platform: SocialPlatform,
    pub redirect_uri: String,
    pub code_verifier_enc: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Filter for listing publications.
#[derive(Debug, Clone, Default)]
pub struct PublicationFilter {
    pub status: Option<PublicationStatus>,
    pub platform: Option<SocialPlatform>,
    pub account_id: Option<String>,
    pub limit: Option<usize>,
}

/// Row counts per status plus the next due publication.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PublicationStats {
    pub scheduled: u64,
    pub posting: u64,
    pub posted: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub next_due: Option<i64>,
}

/// Outcome written when a publish attempt lands.
#[derive(Debug, Clone)]
pub struct PostedUpdate {
    pub platform_post_id: String,
    pub platform_post_url: String,
    pub published_unit_ids: Vec<String>,
    pub posted_at: i64,
}

/// Outcome written when a publish attempt is retried.
#[derive(Debug, Clone)]
pub struct RetryUpdate {
    pub next_scheduled_at: i64,
    pub error: String,
    pub published_unit_ids: Vec<String>,
}

const ACCOUNT_COLUMNS: &str = "id, user_id, platform, platform_user_id, platform_username, \
    access_token_enc, refresh_token_enc, token_expires_at, is_active, last_verified_at, \
    last_error, created_at, updated_at";

const PUBLICATION_COLUMNS: &str = "id, account_id, platform, content_type, content_data, \
    scheduled_at, status, retry_count, max_retries, last_error, platform_post_id, \
    platform_post_url, published_unit_ids, job_id, posted_at, created_at, updated_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file on first use
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ----- connected accounts -------------------------------------------------

    /// Insert or overwrite the account for `(user_id, platform)`.
    ///
    /// On conflict the existing row keeps its id and creation time; the
    /// token material is replaced and the account is reactivated. Returns
    /// the stored row.
    pub async fn upsert_account(&self, account: &ConnectedAccount) -> Result<ConnectedAccount> {
        sqlx::query(
            r#"
            INSERT INTO connected_accounts (
                id, user_id, platform, platform_user_id, platform_username,
                access_token_enc, refresh_token_enc, token_expires_at, is_active,
                last_verified_at, last_error, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, NULL, ?, ?)
            ON CONFLICT (user_id, platform) DO UPDATE SET
                platform_user_id = excluded.platform_user_id,
                platform_username = excluded.platform_username,
                access_token_enc = excluded.access_token_enc,
                refresh_token_enc = excluded.refresh_token_enc,
                token_expires_at = excluded.token_expires_at,
                is_active = 1,
                last_verified_at = excluded.last_verified_at,
                last_error = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&account.id)
        .bind(&account.user_id)
        .bind(account.platform.as_str())
        .bind(&account.platform_user_id)
        .bind(&account.platform_username)
        .bind(&account.access_token_enc)
        .bind(&account.refresh_token_enc)
        .bind(account.token_expires_at)
        .bind(account.last_verified_at)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        self.get_account_for_user(&account.user_id, account.platform)
            .await?
            .ok_or_else(|| {
                DbError::CorruptRow {
                    table: "connected_accounts",
                    reason: "upserted row vanished".to_string(),
                }
                .into()
            })
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<ConnectedAccount>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM connected_accounts WHERE id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| account_from_row(&r)).transpose()
    }

    pub async fn get_account_for_user(
        &self,
        user_id: &str,
        platform: SocialPlatform,
    ) -> Result<Option<ConnectedAccount>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM connected_accounts WHERE user_id = ? AND platform = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| account_from_row(&r)).transpose()
    }

    pub async fn list_accounts(&self) -> Result<Vec<ConnectedAccount>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM connected_accounts ORDER BY user_id, platform",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    /// Active accounts whose access token expires at or before `cutoff`.
    ///
    /// Accounts without an expiry never show up here.
    pub async fn find_expiring_accounts(&self, cutoff: i64) -> Result<Vec<ConnectedAccount>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM connected_accounts
            WHERE is_active = 1
              AND token_expires_at IS NOT NULL
              AND token_expires_at <= ?
            ORDER BY token_expires_at ASC
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    /// Write refreshed tokens only if the stored access token is still the
    /// one the caller read. Returns `false` when another refresh won.
    pub async fn update_tokens_if_unchanged(
        &self,
        account_id: &str,
        expected_access_token_enc: &str,
        update: &TokenUpdate,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE connected_accounts SET
                access_token_enc = ?,
                refresh_token_enc = COALESCE(?, refresh_token_enc),
                token_expires_at = ?,
                is_active = 1,
                last_verified_at = ?,
                last_error = NULL,
                updated_at = ?
            WHERE id = ? AND access_token_enc = ?
            "#,
        )
        .bind(&update.access_token_enc)
        .bind(&update.refresh_token_enc)
        .bind(update.token_expires_at)
        .bind(now)
        .bind(now)
        .bind(account_id)
        .bind(expected_access_token_enc)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Rewrite token columns verbatim; used by credential migration.
    pub async fn replace_token_columns(
        &self,
        account_id: &str,
        access_token_enc: &str,
        refresh_token_enc: Option<&str>,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE connected_accounts
            SET access_token_enc = ?, refresh_token_enc = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(access_token_enc)
        .bind(refresh_token_enc)
        .bind(now)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn deactivate_account(&self, account_id: &str, reason: &str, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE connected_accounts
            SET is_active = 0, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Deactivate only if the stored access token is still the one the
    /// caller read. Returns `false` when a concurrent refresh replaced it.
    pub async fn deactivate_account_if_unchanged(
        &self,
        account_id: &str,
        expected_access_token_enc: &str,
        reason: &str,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE connected_accounts
            SET is_active = 0, last_error = ?, updated_at = ?
            WHERE id = ? AND access_token_enc = ?
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(account_id)
        .bind(expected_access_token_enc)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete the account for `(user_id, platform)`. Its publications go
    /// with it.
    pub async fn delete_account_for_user(
        &self,
        user_id: &str,
        platform: SocialPlatform,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM connected_accounts WHERE user_id = ? AND platform = ?")
            .bind(user_id)
            .bind(platform.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    // ----- scheduled publications ---------------------------------------------

    pub async fn create_publication(&self, publication: &ScheduledPublication) -> Result<()> {
        let content_data = publication.content.to_data().to_string();
        let published = encode_ids(&publication.published_unit_ids)?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_publications (
                id, account_id, platform, content_type, content_data, scheduled_at,
                status, retry_count, max_retries, last_error, platform_post_id,
                platform_post_url, published_unit_ids, job_id, posted_at,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&publication.id)
        .bind(&publication.account_id)
        .bind(publication.platform.as_str())
        .bind(publication.content.content_type().as_str())
        .bind(content_data)
        .bind(publication.scheduled_at)
        .bind(publication.status.as_str())
        .bind(publication.retry_count as i64)
        .bind(publication.max_retries as i64)
        .bind(&publication.last_error)
        .bind(&publication.platform_post_id)
        .bind(&publication.platform_post_url)
        .bind(published)
        .bind(&publication.job_id)
        .bind(publication.posted_at)
        .bind(publication.created_at)
        .bind(publication.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_publication(&self, id: &str) -> Result<Option<ScheduledPublication>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scheduled_publications WHERE id = ?",
            PUBLICATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| publication_from_row(&r)).transpose()
    }

    /// Compare-and-set `scheduled → posting` for the given attempt.
    ///
    /// A `posting` row whose claim is older than `lease_secs` is also
    /// claimable, so a worker that died mid-publish does not strand it.
    pub async fn claim_for_posting(
        &self,
        id: &str,
        attempt: u32,
        now: i64,
        lease_secs: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_publications
            SET status = 'posting', claimed_at = ?, updated_at = ?
            WHERE id = ?
              AND retry_count = ?
              AND (
                status = 'scheduled'
                OR (status = 'posting' AND claimed_at IS NOT NULL AND claimed_at <= ?)
              )
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(attempt as i64)
        .bind(now - lease_secs)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// `posting → posted`.
    pub async fn mark_posted(&self, id: &str, update: &PostedUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_publications
            SET status = 'posted',
                platform_post_id = ?,
                platform_post_url = ?,
                published_unit_ids = ?,
                posted_at = ?,
                last_error = NULL,
                claimed_at = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'posting'
            "#,
        )
        .bind(&update.platform_post_id)
        .bind(&update.platform_post_url)
        .bind(encode_ids(&update.published_unit_ids)?)
        .bind(update.posted_at)
        .bind(update.posted_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// `posting → scheduled` with the retry counter bumped.
    ///
    /// Refused once the counter has reached the ceiling.
    pub async fn mark_retry(&self, id: &str, update: &RetryUpdate, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_publications
            SET status = 'scheduled',
                retry_count = retry_count + 1,
                scheduled_at = ?,
                last_error = ?,
                published_unit_ids = ?,
                claimed_at = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'posting' AND retry_count < max_retries
            "#,
        )
        .bind(update.next_scheduled_at)
        .bind(&update.error)
        .bind(encode_ids(&update.published_unit_ids)?)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// `posting → failed`.
    pub async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        published_unit_ids: &[String],
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_publications
            SET status = 'failed',
                last_error = ?,
                published_unit_ids = ?,
                claimed_at = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'posting'
            "#,
        )
        .bind(error)
        .bind(encode_ids(published_unit_ids)?)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_job_id(&self, id: &str, job_id: &str) -> Result<()> {
        sqlx::query("UPDATE scheduled_publications SET job_id = ? WHERE id = ?")
            .bind(job_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// `scheduled | posting → cancelled`.
    pub async fn cancel_publication(&self, id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_publications
            SET status = 'cancelled', claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status IN ('scheduled', 'posting')
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a still-scheduled publication to a new time.
    pub async fn reschedule_publication(&self, id: &str, scheduled_at: i64, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_publications
            SET scheduled_at = ?, updated_at = ?
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(scheduled_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn list_publications(
        &self,
        filter: &PublicationFilter,
    ) -> Result<Vec<ScheduledPublication>> {
        let mut where_clauses = vec!["1=1"];
        if filter.status.is_some() {
            where_clauses.push("status = ?");
        }
        if filter.platform.is_some() {
            where_clauses.push("platform = ?");
        }
        if filter.account_id.is_some() {
            where_clauses.push("account_id = ?");
        }

        let query_str = format!(
            "SELECT {} FROM scheduled_publications WHERE {} ORDER BY scheduled_at ASC LIMIT ?",
            PUBLICATION_COLUMNS,
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(platform) = filter.platform {
            query = query.bind(platform.as_str());
        }
        if let Some(account_id) = &filter.account_id {
            query = query.bind(account_id);
        }
        query = query.bind(filter.limit.map(|l| l as i64).unwrap_or(-1));

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(publication_from_row).collect()
    }

    pub async fn publication_stats(&self) -> Result<PublicationStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM scheduled_publications GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut stats = PublicationStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count = row.get::<i64, _>("n") as u64;
            match status.parse::<PublicationStatus>() {
                Ok(PublicationStatus::Scheduled) => stats.scheduled = count,
                Ok(PublicationStatus::Posting) => stats.posting = count,
                Ok(PublicationStatus::Posted) => stats.posted = count,
                Ok(PublicationStatus::Failed) => stats.failed = count,
                Ok(PublicationStatus::Cancelled) => stats.cancelled = count,
                Err(_) => tracing::warn!(status = %status, "Unknown publication status in database"),
            }
        }

        stats.next_due = sqlx::query(
            "SELECT MIN(scheduled_at) AS next_due FROM scheduled_publications WHERE status = 'scheduled'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?
        .get("next_due");

        Ok(stats)
    }

    // ----- oauth states -------------------------------------------------------

    pub async fn insert_oauth_state(&self, row: &OAuthStateRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO oauth_states (
                state, user_id, platform, redirect_uri, code_verifier_enc,
                created_at, expires_at, used
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&row.state)
        .bind(&row.user_id)
        .bind(row.platform.as_str())
        .bind(&row.redirect_uri)
        .bind(&row.code_verifier_enc)
        .bind(row.created_at)
        .bind(row.expires_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Atomically mark a state as used and return it.
    ///
    /// Returns `None` for unknown, expired, already-used, or wrong-platform
    /// states. Exactly one caller can ever consume a given state.
    pub async fn consume_oauth_state(
        &self,
        state: &str,
        platform: SocialPlatform,
        now: i64,
    ) -> Result<Option<OAuthStateRow>> {
        let row = sqlx::query(
            r#"
            UPDATE oauth_states SET used = 1
            WHERE state = ? AND platform = ? AND used = 0 AND expires_at > ?
            RETURNING state, user_id, platform, redirect_uri, code_verifier_enc,
                      created_at, expires_at
            "#,
        )
        .bind(state)
        .bind(platform.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| oauth_state_from_row(&r)).transpose()
    }

    /// Delete expired or used states. Returns how many were removed.
    pub async fn purge_oauth_states(&self, now: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE used = 1 OR expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }
}

fn encode_ids(ids: &[String]) -> Result<String> {
    serde_json::to_string(ids)
        .map_err(|e| corrupt("scheduled_publications", format!("published_unit_ids: {}", e)))
}

fn corrupt(table: &'static str, reason: impl Into<String>) -> crate::error::CrosscastError {
    DbError::CorruptRow {
        table,
        reason: reason.into(),
    }
    .into()
}

fn parse_platform(table: &'static str, value: &str) -> Result<SocialPlatform> {
    value
        .parse()
        .map_err(|_| corrupt(table, format!("unknown platform '{}'", value)))
}

fn account_from_row(r: &SqliteRow) -> Result<ConnectedAccount> {
    Ok(ConnectedAccount {
        id: r.get("id"),
        user_id: r.get("user_id"),
        platform: parse_platform("connected_accounts", r.get("platform"))?,
        platform_user_id: r.get("platform_user_id"),
        platform_username: r.get("platform_username"),
        access_token_enc: r.get("access_token_enc"),
        refresh_token_enc: r.get("refresh_token_enc"),
        token_expires_at: r.get("token_expires_at"),
        is_active: r.get::<i64, _>("is_active") != 0,
        last_verified_at: r.get("last_verified_at"),
        last_error: r.get("last_error"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn publication_from_row(r: &SqliteRow) -> Result<ScheduledPublication> {
    const TABLE: &str = "scheduled_publications";

    let content_type: ContentType = r
        .get::<String, _>("content_type")
        .parse()
        .map_err(|_| corrupt(TABLE, "unknown content_type"))?;
    let data: serde_json::Value = serde_json::from_str(r.get("content_data"))
        .map_err(|e| corrupt(TABLE, format!("content_data is not JSON: {}", e)))?;
    let content = Content::from_parts(content_type, data)
        .map_err(|e| corrupt(TABLE, e.to_string()))?;
    let status: PublicationStatus = r
        .get::<String, _>("status")
        .parse()
        .map_err(|_| corrupt(TABLE, "unknown status"))?;
    let published_unit_ids: Vec<String> = serde_json::from_str(r.get("published_unit_ids"))
        .map_err(|e| corrupt(TABLE, format!("published_unit_ids is not a JSON list: {}", e)))?;

    Ok(ScheduledPublication {
        id: r.get("id"),
        account_id: r.get("account_id"),
        platform: parse_platform(TABLE, r.get("platform"))?,
        content,
        scheduled_at: r.get("scheduled_at"),
        status,
        retry_count: r.get::<i64, _>("retry_count") as u32,
        max_retries: r.get::<i64, _>("max_retries") as u32,
        last_error: r.get("last_error"),
        platform_post_id: r.get("platform_post_id"),
        platform_post_url: r.get("platform_post_url"),
        published_unit_ids,
        job_id: r.get("job_id"),
        posted_at: r.get("posted_at"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn oauth_state_from_row(r: &SqliteRow) -> Result<OAuthStateRow> {
    Ok(OAuthStateRow {
        state: r.get("state"),
        user_id: r.get("user_id"),
        platform: parse_platform("oauth_states", r.get("platform"))?,
        redirect_uri: r.get("redirect_uri"),
        code_verifier_enc: r.get("code_verifier_enc"),
        created_at: r.get("created_at"),
        expires_at: r.get("expires_at"),
    })
}
