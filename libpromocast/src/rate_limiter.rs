//! Rate-limit tracking for provider accounts
//!
//! Mirrors the last rate-limit window each provider reported per
//! (account, endpoint). The mirror is advisory: it only stops local flooding
//! between provider responses and is refreshed whenever a response carries
//! limit metadata.

use crate::error::Result;
use crate::types::{RateLimitInfo, RateLimitWindow};
use crate::Database;

/// Endpoint key used when an adapter does not name one
pub const DEFAULT_ENDPOINT: &str = "publish";

/// Tracker over the `rate_limit_windows` table
#[derive(Debug, Default, Clone, Copy)]
pub struct RateLimitTracker;

impl RateLimitTracker {
    pub fn new() -> Self {
        Self
    }

    /// Check whether an attempt against (account, endpoint) may be made at `now`
    ///
    /// Allowed when no window is recorded, when the window has remaining
    /// capacity, or once its reset time has passed.
    pub async fn can_dispatch(
        &self,
        db: &Database,
        account_id: &str,
        endpoint: &str,
        now: i64,
    ) -> Result<bool> {
        let window = match db.get_rate_limit_window(account_id, endpoint).await? {
            Some(w) => w,
            None => return Ok(true),
        };

        Ok(window.remaining > 0 || now >= window.reset_at)
    }

    /// Update the window from a provider response
    ///
    /// Overwrites the stored window only when the provider reported limit
    /// metadata; otherwise prior state is left as is. Returns whether the
    /// window was written.
    pub async fn record_attempt(
        &self,
        db: &Database,
        account_id: &str,
        endpoint: &str,
        info: Option<RateLimitInfo>,
        now: i64,
    ) -> Result<bool> {
        let info = match info {
            Some(i) => i,
            None => return Ok(false),
        };

        let window = RateLimitWindow {
            account_id: account_id.to_string(),
            endpoint: endpoint.to_string(),
            limit_max: info.limit_max,
            remaining: info.remaining.min(info.limit_max),
            reset_at: info.reset_at,
            updated_at: now,
        };
        db.upsert_rate_limit_window(&window).await?;

        if window.remaining == 0 {
            tracing::debug!(
                account = %account_id,
                endpoint = %endpoint,
                reset_at = window.reset_at,
                "Rate limit window exhausted"
            );
        }
        Ok(true)
    }

    /// Whole minutes until the window resets, rounded up
    ///
    /// `None` when no window is recorded; `Some(0)` once the reset time passed.
    pub async fn minutes_until_reset(
        &self,
        db: &Database,
        account_id: &str,
        endpoint: &str,
        now: i64,
    ) -> Result<Option<i64>> {
        let window = db.get_rate_limit_window(account_id, endpoint).await?;
        Ok(window.map(|w| {
            let seconds = (w.reset_at - now).max(0);
            (seconds + 59) / 60
        }))
    }

    /// Drop windows whose reset time is before `cutoff`
    pub async fn purge_expired(&self, db: &Database, cutoff: i64) -> Result<u64> {
        db.delete_rate_limit_windows_before(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path.to_string_lossy()).await.unwrap();
        (temp_dir, db)
    }

    fn info(limit_max: u32, remaining: u32, reset_at: i64) -> Option<RateLimitInfo> {
        Some(RateLimitInfo {
            limit_max,
            remaining,
            reset_at,
        })
    }

    #[tokio::test]
    async fn test_allows_unknown_account() {
        let (_temp, db) = setup_test_db().await;
        let tracker = RateLimitTracker::new();

        let allowed = tracker
            .can_dispatch(&db, "x:@books", DEFAULT_ENDPOINT, 1_000_000)
            .await
            .unwrap();
        assert!(allowed, "No recorded window should allow dispatch");
    }

    #[tokio::test]
    async fn test_allows_with_remaining_capacity() {
        let (_temp, db) = setup_test_db().await;
        let tracker = RateLimitTracker::new();
        let now = 1_000_000;

        tracker
            .record_attempt(&db, "x:@books", DEFAULT_ENDPOINT, info(300, 1, now + 900), now)
            .await
            .unwrap();

        assert!(tracker
            .can_dispatch(&db, "x:@books", DEFAULT_ENDPOINT, now)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_blocks_exhausted_window_until_reset() {
        let (_temp, db) = setup_test_db().await;
        let tracker = RateLimitTracker::new();
        let now = 1_000_000;
        let reset_at = now + 900;

        tracker
            .record_attempt(&db, "x:@books", DEFAULT_ENDPOINT, info(300, 0, reset_at), now)
            .await
            .unwrap();

        let allowed = tracker
            .can_dispatch(&db, "x:@books", DEFAULT_ENDPOINT, reset_at - 1)
            .await
            .unwrap();
        assert!(!allowed, "Should be blocked before reset");

        let allowed = tracker
            .can_dispatch(&db, "x:@books", DEFAULT_ENDPOINT, reset_at)
            .await
            .unwrap();
        assert!(allowed, "Should be allowed once reset_at has passed");
    }

    #[tokio::test]
    async fn test_missing_info_leaves_window_untouched() {
        let (_temp, db) = setup_test_db().await;
        let tracker = RateLimitTracker::new();
        let now = 1_000_000;

        tracker
            .record_attempt(&db, "x:@books", DEFAULT_ENDPOINT, info(300, 0, now + 900), now)
            .await
            .unwrap();
        let written = tracker
            .record_attempt(&db, "x:@books", DEFAULT_ENDPOINT, None, now + 10)
            .await
            .unwrap();
        assert!(!written);

        let allowed = tracker
            .can_dispatch(&db, "x:@books", DEFAULT_ENDPOINT, now + 10)
            .await
            .unwrap();
        assert!(!allowed, "No guessing: the exhausted window still applies");
    }

    #[tokio::test]
    async fn test_independent_accounts_and_endpoints() {
        let (_temp, db) = setup_test_db().await;
        let tracker = RateLimitTracker::new();
        let now = 1_000_000;

        tracker
            .record_attempt(&db, "x:@books", DEFAULT_ENDPOINT, info(300, 0, now + 900), now)
            .await
            .unwrap();

        assert!(tracker
            .can_dispatch(&db, "x:@other", DEFAULT_ENDPOINT, now)
            .await
            .unwrap());
        assert!(tracker
            .can_dispatch(&db, "x:@books", "media", now)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_remaining_clamped_to_limit() {
        let (_temp, db) = setup_test_db().await;
        let tracker = RateLimitTracker::new();

        tracker
            .record_attempt(&db, "x:@books", DEFAULT_ENDPOINT, info(10, 50, 2_000), 1_000)
            .await
            .unwrap();

        let window = db
            .get_rate_limit_window("x:@books", DEFAULT_ENDPOINT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(window.remaining, 10);
    }

    #[tokio::test]
    async fn test_minutes_until_reset() {
        let (_temp, db) = setup_test_db().await;
        let tracker = RateLimitTracker::new();
        let now = 1_000_000;

        let none = tracker
            .minutes_until_reset(&db, "x:@books", DEFAULT_ENDPOINT, now)
            .await
            .unwrap();
        assert_eq!(none, None);

        tracker
            .record_attempt(&db, "x:@books", DEFAULT_ENDPOINT, info(300, 0, now + 61), now)
            .await
            .unwrap();
        let minutes = tracker
            .minutes_until_reset(&db, "x:@books", DEFAULT_ENDPOINT, now)
            .await
            .unwrap();
        assert_eq!(minutes, Some(2));

        let minutes = tracker
            .minutes_until_reset(&db, "x:@books", DEFAULT_ENDPOINT, now + 120)
            .await
            .unwrap();
        assert_eq!(minutes, Some(0));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (_temp, db) = setup_test_db().await;
        let tracker = RateLimitTracker::new();

        tracker
            .record_attempt(&db, "x:@old", DEFAULT_ENDPOINT, info(300, 0, 1_000), 500)
            .await
            .unwrap();
        tracker
            .record_attempt(&db, "x:@new", DEFAULT_ENDPOINT, info(300, 0, 9_000), 500)
            .await
            .unwrap();

        let purged = tracker.purge_expired(&db, 5_000).await.unwrap();
        assert_eq!(purged, 1);
        assert!(db
            .get_rate_limit_window("x:@new", DEFAULT_ENDPOINT)
            .await
            .unwrap()
            .is_some());
    }
}
