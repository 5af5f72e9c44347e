//! Database operations for Promocast
//!
//! Every state transition the dispatcher relies on is a single conditional
//! `UPDATE ... WHERE status = ?`, so overlapping dispatcher runs (in one process
//! or several) can never both own the same job.

use secrecy::{ExposeSecret, SecretString};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DbError, Result};
use crate::types::{
    AttemptOutcome, Campaign, CampaignPost, CampaignStatus, CatalogItem, Credential, JobStatus,
    PublishAttempt, RateLimitWindow,
};

/// Inclusive time range over `scheduled_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
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

    // ========================================================================
    // Campaigns
    // ========================================================================

    pub async fn create_campaign(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, user_id, name, start_date, duration_days, posts_per_day,
                posting_times, platforms, content_ratio, items, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&campaign.id)
        .bind(&campaign.user_id)
        .bind(&campaign.name)
        .bind(campaign.start_date.format("%Y-%m-%d").to_string())
        .bind(i64::from(campaign.duration_days))
        .bind(i64::from(campaign.posts_per_day))
        .bind(to_json(&campaign.posting_times))
        .bind(to_json(&campaign.platforms))
        .bind(i64::from(campaign.content_ratio))
        .bind(to_json(&campaign.items))
        .bind(campaign.status.as_str())
        .bind(campaign.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?")
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(campaign_from_row).transpose()
    }

    pub async fn list_campaigns(&self, user_id: Option<&str>) -> Result<Vec<Campaign>> {
        let rows = match user_id {
            Some(user) => {
                sqlx::query("SELECT * FROM campaigns WHERE user_id = ? ORDER BY created_at, id")
                    .bind(user)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM campaigns ORDER BY created_at, id")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(DbError::SqlxError)?;

        rows.iter().map(campaign_from_row).collect()
    }

    /// Move a campaign to `to` only if it is currently in one of `from`
    pub async fn transition_campaign(
        &self,
        campaign_id: &str,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool> {
        let placeholders = vec!["?"; from.len()].join(", ");
        let query_str = format!(
            "UPDATE campaigns SET status = ? WHERE id = ? AND status IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&query_str).bind(to.as_str()).bind(campaign_id);
        for status in from {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await.map_err(DbError::SqlxError)?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete a campaign; its jobs and their attempts cascade
    pub async fn delete_campaign(&self, campaign_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(campaign_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Persist a generated schedule and mark the campaign active in one transaction
    ///
    /// Slots that already exist (same campaign, slot index and platform) are left
    /// untouched, so re-activating a campaign never duplicates jobs. Returns the
    /// number of newly inserted jobs, or `None` if the campaign was not in one of
    /// the `from` states.
    pub async fn activate_campaign(
        &self,
        campaign_id: &str,
        from: &[CampaignStatus],
        posts: &[CampaignPost],
    ) -> Result<Option<u64>> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let placeholders = vec!["?"; from.len()].join(", ");
        let query_str = format!(
            "UPDATE campaigns SET status = 'active' WHERE id = ? AND status IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&query_str).bind(campaign_id);
        for status in from {
            query = query.bind(status.as_str());
        }
        let updated = query.execute(&mut *tx).await.map_err(DbError::SqlxError)?;
        if updated.rows_affected() != 1 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(None);
        }

        let mut inserted = 0;
        for post in posts {
            let result = sqlx::query(
                r#"
                INSERT INTO campaign_posts (
                    id, campaign_id, slot_index, item_id, platform, content_type,
                    scheduled_at, status, attempt_count
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
                ON CONFLICT(campaign_id, slot_index, platform) DO NOTHING
                "#,
            )
            .bind(&post.id)
            .bind(&post.campaign_id)
            .bind(i64::from(post.slot_index))
            .bind(&post.item_id)
            .bind(&post.platform)
            .bind(post.content_type.as_str())
            .bind(post.scheduled_at)
            .bind(post.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(Some(inserted))
    }

    /// Mark active campaigns with no open jobs as completed
    pub async fn complete_finished_campaigns(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET status = 'completed'
            WHERE status = 'active'
              AND NOT EXISTS (
                  SELECT 1 FROM campaign_posts p
                  WHERE p.campaign_id = campaigns.id
                    AND p.status IN ('scheduled', 'publishing')
              )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    pub async fn get_post(&self, post_id: &str) -> Result<Option<CampaignPost>> {
        let row = sqlx::query("SELECT * FROM campaign_posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    pub async fn list_posts(&self, campaign_id: &str) -> Result<Vec<CampaignPost>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM campaign_posts
            WHERE campaign_id = ?
            ORDER BY scheduled_at ASC, slot_index ASC, platform ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Scheduled jobs of active campaigns that are due at `now`, oldest first
    pub async fn due_posts(&self, now: i64) -> Result<Vec<CampaignPost>> {
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM campaign_posts p
            JOIN campaigns c ON c.id = p.campaign_id
            WHERE p.status = 'scheduled'
              AND p.scheduled_at <= ?
              AND c.status = 'active'
            ORDER BY p.scheduled_at ASC, p.slot_index ASC, p.platform ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// `scheduled -> publishing`, honored only if the row is still scheduled and
    /// its campaign still active. Returns whether this caller won the claim.
    pub async fn claim_post(&self, post_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_posts
            SET status = 'publishing', claimed_at = ?, attempt_count = attempt_count + 1
            WHERE id = ?
              AND status = 'scheduled'
              AND EXISTS (
                  SELECT 1 FROM campaigns c
                  WHERE c.id = campaign_posts.campaign_id AND c.status = 'active'
              )
            "#,
        )
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_post_published(
        &self,
        post_id: &str,
        published_at: i64,
        provider_post_id: Option<&str>,
        note: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_posts
            SET status = 'published', published_at = ?, provider_post_id = ?,
                last_error = ?, claimed_at = NULL
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(published_at)
        .bind(provider_post_id)
        .bind(note)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_post_failed(&self, post_id: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_posts
            SET status = 'failed', last_error = ?, claimed_at = NULL
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(error)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Return a claimed job to the queue for the next due-scan
    pub async fn requeue_post(&self, post_id: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_posts
            SET status = 'scheduled', last_error = ?, claimed_at = NULL
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(error)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn skip_post(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE campaign_posts SET status = 'skipped' WHERE id = ? AND status = 'scheduled'",
        )
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn skip_remaining_posts(&self, campaign_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE campaign_posts SET status = 'skipped' WHERE campaign_id = ? AND status = 'scheduled'",
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    /// Move a job that has not been picked up yet; `scheduled_at` is frozen afterwards
    pub async fn reschedule_post(&self, post_id: &str, scheduled_at: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE campaign_posts SET scheduled_at = ? WHERE id = ? AND status = 'scheduled'",
        )
        .bind(scheduled_at)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Release claims older than `claimed_before`, left behind by a crashed run
    pub async fn recover_stale_claims(&self, claimed_before: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_posts
            SET status = 'scheduled', claimed_at = NULL,
                last_error = 'claim abandoned by an interrupted dispatch run'
            WHERE status = 'publishing' AND claimed_at < ?
            "#,
        )
        .bind(claimed_before)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    /// Job counts per status, optionally scoped to a campaign and/or window
    pub async fn count_posts_by_status(
        &self,
        campaign_id: Option<&str>,
        window: Option<TimeWindow>,
    ) -> Result<HashMap<JobStatus, u64>> {
        let mut where_clauses = vec!["1=1"];
        if campaign_id.is_some() {
            where_clauses.push("campaign_id = ?");
        }
        if window.is_some() {
            where_clauses.push("scheduled_at >= ?");
            where_clauses.push("scheduled_at <= ?");
        }

        let query_str = format!(
            "SELECT status, COUNT(*) AS n FROM campaign_posts WHERE {} GROUP BY status",
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(id) = campaign_id {
            query = query.bind(id);
        }
        if let Some(w) = window {
            query = query.bind(w.start).bind(w.end);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(DbError::SqlxError)?;

        let mut counts = HashMap::new();
        for row in &rows {
            let status: String = row.try_get("status").map_err(DbError::SqlxError)?;
            let n: i64 = row.try_get("n").map_err(DbError::SqlxError)?;
            counts.insert(parse_column(&status, "campaign_posts")?, to_u64(n));
        }
        Ok(counts)
    }

    /// Scheduled jobs already due at `now`, optionally scoped
    pub async fn count_due(
        &self,
        campaign_id: Option<&str>,
        window: Option<TimeWindow>,
        now: i64,
    ) -> Result<u64> {
        let mut where_clauses = vec!["status = 'scheduled'", "scheduled_at <= ?"];
        if campaign_id.is_some() {
            where_clauses.push("campaign_id = ?");
        }
        if window.is_some() {
            where_clauses.push("scheduled_at >= ?");
            where_clauses.push("scheduled_at <= ?");
        }

        let query_str = format!(
            "SELECT COUNT(*) AS n FROM campaign_posts WHERE {}",
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str).bind(now);
        if let Some(id) = campaign_id {
            query = query.bind(id);
        }
        if let Some(w) = window {
            query = query.bind(w.start).bind(w.end);
        }

        let row = query.fetch_one(&self.pool).await.map_err(DbError::SqlxError)?;
        let n: i64 = row.try_get("n").map_err(DbError::SqlxError)?;
        Ok(to_u64(n))
    }

    /// Earliest scheduled job strictly after `now`
    pub async fn next_upcoming_post(
        &self,
        campaign_id: Option<&str>,
        window: Option<TimeWindow>,
        now: i64,
    ) -> Result<Option<CampaignPost>> {
        let mut where_clauses = vec!["status = 'scheduled'", "scheduled_at > ?"];
        if campaign_id.is_some() {
            where_clauses.push("campaign_id = ?");
        }
        if window.is_some() {
            where_clauses.push("scheduled_at >= ?");
            where_clauses.push("scheduled_at <= ?");
        }

        let query_str = format!(
            "SELECT * FROM campaign_posts WHERE {} ORDER BY scheduled_at ASC, slot_index ASC, platform ASC LIMIT 1",
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str).bind(now);
        if let Some(id) = campaign_id {
            query = query.bind(id);
        }
        if let Some(w) = window {
            query = query.bind(w.start).bind(w.end);
        }

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        row.as_ref().map(post_from_row).transpose()
    }

    // ========================================================================
    // Attempts
    // ========================================================================

    pub async fn record_attempt(&self, attempt: &PublishAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO publish_attempts (
                post_id, credential_id, account_identifier, outcome,
                error_kind, error_message, provider_post_id, attempted_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt.post_id)
        .bind(&attempt.credential_id)
        .bind(&attempt.account_identifier)
        .bind(attempt.outcome.as_str())
        .bind(attempt.error_kind.map(|k| k.as_str()))
        .bind(&attempt.error_message)
        .bind(&attempt.provider_post_id)
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_attempts(&self, post_id: &str) -> Result<Vec<PublishAttempt>> {
        let rows = sqlx::query(
            "SELECT * FROM publish_attempts WHERE post_id = ? ORDER BY attempted_at ASC, id ASC",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(attempt_from_row).collect()
    }

    // ========================================================================
    // Credentials
    // ========================================================================

    /// Insert a credential, or refresh tokens of the existing
    /// (user, platform, account) row. Returns the stored credential id.
    pub async fn upsert_credential(&self, credential: &Credential) -> Result<String> {
        let row = sqlx::query(
            r#"
            INSERT INTO credentials (
                id, user_id, platform, account_identifier, access_token,
                refresh_token, expires_at, is_default, invalid, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(user_id, platform, account_identifier) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                is_default = excluded.is_default,
                invalid = 0
            RETURNING id
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.user_id)
        .bind(&credential.platform)
        .bind(&credential.account_identifier)
        .bind(credential.access_token.expose_secret())
        .bind(credential.refresh_token.as_ref().map(|t| t.expose_secret()))
        .bind(credential.expires_at)
        .bind(credential.is_default)
        .bind(credential.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.try_get("id").map_err(DbError::SqlxError)?)
    }

    pub async fn get_credential(&self, credential_id: &str) -> Result<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credentials WHERE id = ?")
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(credential_from_row).transpose()
    }

    /// All accounts of a user on a platform, default account first
    pub async fn list_credentials(&self, user_id: &str, platform: &str) -> Result<Vec<Credential>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM credentials
            WHERE user_id = ? AND platform = ?
            ORDER BY is_default DESC, account_identifier ASC
            "#,
        )
        .bind(user_id)
        .bind(platform)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(credential_from_row).collect()
    }

    pub async fn list_user_credentials(&self, user_id: &str) -> Result<Vec<Credential>> {
        let rows = sqlx::query(
            "SELECT * FROM credentials WHERE user_id = ? ORDER BY platform ASC, account_identifier ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(credential_from_row).collect()
    }

    pub async fn mark_credential_invalid(&self, credential_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE credentials SET invalid = 1 WHERE id = ?")
            .bind(credential_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn rotate_credential(
        &self,
        credential_id: &str,
        access_token: &SecretString,
        refresh_token: Option<&SecretString>,
        expires_at: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET access_token = ?, refresh_token = ?, expires_at = ?, invalid = 0
            WHERE id = ?
            "#,
        )
        .bind(access_token.expose_secret())
        .bind(refresh_token.map(|t| t.expose_secret()))
        .bind(expires_at)
        .bind(credential_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_credential(&self, credential_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = ?")
            .bind(credential_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    // ========================================================================
    // Rate-limit windows
    // ========================================================================

    pub async fn get_rate_limit_window(
        &self,
        account_id: &str,
        endpoint: &str,
    ) -> Result<Option<RateLimitWindow>> {
        let row = sqlx::query(
            "SELECT * FROM rate_limit_windows WHERE account_id = ? AND endpoint = ?",
        )
        .bind(account_id)
        .bind(endpoint)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(window_from_row).transpose()
    }

    pub async fn upsert_rate_limit_window(&self, window: &RateLimitWindow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rate_limit_windows (account_id, endpoint, limit_max, remaining, reset_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, endpoint) DO UPDATE SET
                limit_max = excluded.limit_max,
                remaining = excluded.remaining,
                reset_at = excluded.reset_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&window.account_id)
        .bind(&window.endpoint)
        .bind(i64::from(window.limit_max))
        .bind(i64::from(window.remaining))
        .bind(window.reset_at)
        .bind(window.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn delete_rate_limit_windows_before(&self, reset_before: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_windows WHERE reset_at < ?")
            .bind(reset_before)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    pub async fn upsert_catalog_item(&self, item: &CatalogItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO catalog_items (id, title, blurb, link, media_ref)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                blurb = excluded.blurb,
                link = excluded.link,
                media_ref = excluded.media_ref
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.blurb)
        .bind(&item.link)
        .bind(&item.media_ref)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_catalog_item(&self, item_id: &str) -> Result<Option<CatalogItem>> {
        let row = sqlx::query("SELECT * FROM catalog_items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(|r| -> Result<CatalogItem> {
            Ok(CatalogItem {
                id: r.try_get("id").map_err(DbError::SqlxError)?,
                title: r.try_get("title").map_err(DbError::SqlxError)?,
                blurb: r.try_get("blurb").map_err(DbError::SqlxError)?,
                link: r.try_get("link").map_err(DbError::SqlxError)?,
                media_ref: r.try_get("media_ref").map_err(DbError::SqlxError)?,
            })
        })
        .transpose()
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn to_json(values: &[String]) -> String {
    serde_json::Value::from(values.to_vec()).to_string()
}

fn from_json(raw: &str, table: &'static str) -> Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| {
        DbError::CorruptRow {
            table,
            reason: format!("invalid JSON list: {}", e),
        }
        .into()
    })
}

fn parse_column<T: FromStr<Err = String>>(raw: &str, table: &'static str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|reason| DbError::CorruptRow { table, reason }.into())
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value.max(0)).unwrap_or(0)
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    Ok(row.try_get(column).map_err(DbError::SqlxError)?)
}

fn campaign_from_row(row: &SqliteRow) -> Result<Campaign> {
    let start_date: String = get(row, "start_date")?;
    let start_date = chrono::NaiveDate::parse_from_str(&start_date, "%Y-%m-%d").map_err(|e| {
        DbError::CorruptRow {
            table: "campaigns",
            reason: format!("invalid start_date: {}", e),
        }
    })?;
    let ratio: i64 = get(row, "content_ratio")?;

    Ok(Campaign {
        id: get(row, "id")?,
        user_id: get(row, "user_id")?,
        name: get(row, "name")?,
        start_date,
        duration_days: to_u32(get(row, "duration_days")?),
        posts_per_day: to_u32(get(row, "posts_per_day")?),
        posting_times: from_json(&get::<String>(row, "posting_times")?, "campaigns")?,
        platforms: from_json(&get::<String>(row, "platforms")?, "campaigns")?,
        content_ratio: ratio.clamp(0, 100) as u8,
        items: from_json(&get::<String>(row, "items")?, "campaigns")?,
        status: parse_column(&get::<String>(row, "status")?, "campaigns")?,
        created_at: get(row, "created_at")?,
    })
}

fn post_from_row(row: &SqliteRow) -> Result<CampaignPost> {
    Ok(CampaignPost {
        id: get(row, "id")?,
        campaign_id: get(row, "campaign_id")?,
        slot_index: to_u32(get(row, "slot_index")?),
        item_id: get(row, "item_id")?,
        platform: get(row, "platform")?,
        content_type: parse_column(&get::<String>(row, "content_type")?, "campaign_posts")?,
        scheduled_at: get(row, "scheduled_at")?,
        status: parse_column(&get::<String>(row, "status")?, "campaign_posts")?,
        published_at: get(row, "published_at")?,
        provider_post_id: get(row, "provider_post_id")?,
        attempt_count: to_u32(get(row, "attempt_count")?),
        last_error: get(row, "last_error")?,
        claimed_at: get(row, "claimed_at")?,
    })
}

fn attempt_from_row(row: &SqliteRow) -> Result<PublishAttempt> {
    let error_kind: Option<String> = get(row, "error_kind")?;
    let outcome: String = get(row, "outcome")?;

    Ok(PublishAttempt {
        id: get(row, "id")?,
        post_id: get(row, "post_id")?,
        credential_id: get(row, "credential_id")?,
        account_identifier: get(row, "account_identifier")?,
        outcome: parse_column::<AttemptOutcome>(&outcome, "publish_attempts")?,
        error_kind: error_kind
            .map(|k| parse_column(&k, "publish_attempts"))
            .transpose()?,
        error_message: get(row, "error_message")?,
        provider_post_id: get(row, "provider_post_id")?,
        attempted_at: get(row, "attempted_at")?,
    })
}

fn credential_from_row(row: &SqliteRow) -> Result<Credential> {
    let access_token: String = get(row, "access_token")?;
    let refresh_token: Option<String> = get(row, "refresh_token")?;

    Ok(Credential {
        id: get(row, "id")?,
        user_id: get(row, "user_id")?,
        platform: get(row, "platform")?,
        account_identifier: get(row, "account_identifier")?,
        access_token: SecretString::from(access_token),
        refresh_token: refresh_token.map(SecretString::from),
        expires_at: get(row, "expires_at")?,
        is_default: get(row, "is_default")?,
        invalid: get(row, "invalid")?,
        created_at: get(row, "created_at")?,
    })
}

fn window_from_row(row: &SqliteRow) -> Result<RateLimitWindow> {
    Ok(RateLimitWindow {
        account_id: get(row, "account_id")?,
        endpoint: get(row, "endpoint")?,
        limit_max: to_u32(get(row, "limit_max")?),
        remaining: to_u32(get(row, "remaining")?),
        reset_at: get(row, "reset_at")?,
        updated_at: get(row, "updated_at")?,
    })
}
