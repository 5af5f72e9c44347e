//! Publication monitor
//!
//! Read-only aggregation over the job table: counts per status, the next
//! upcoming job and completion percentage, for a time window and/or a single
//! campaign. Snapshots are cached per scope for `refresh_interval`, so callers
//! polling the monitor never add load proportional to their polling rate and
//! never wait on the dispatcher.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::MonitorConfig;
use crate::db::{Database, TimeWindow};
use crate::error::Result;
use crate::types::{CampaignPost, JobStatus};

/// What a snapshot covers; both parts are optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct MonitorScope {
    pub campaign_id: Option<String>,
    pub window: Option<TimeWindow>,
}

impl MonitorScope {
    /// Every job in the database
    pub fn all() -> Self {
        Self::default()
    }

    pub fn campaign(campaign_id: impl Into<String>) -> Self {
        Self {
            campaign_id: Some(campaign_id.into()),
            window: None,
        }
    }

    pub fn window(start: i64, end: i64) -> Self {
        Self {
            campaign_id: None,
            window: Some(TimeWindow::new(start, end)),
        }
    }

    pub fn with_window(mut self, start: i64, end: i64) -> Self {
        self.window = Some(TimeWindow::new(start, end));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub scope: MonitorScope,
    pub total: u64,
    pub scheduled: u64,
    pub publishing: u64,
    pub published: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Jobs not yet resolved (`scheduled` plus `publishing`)
    pub pending: u64,
    /// Scheduled jobs whose time has already come
    pub due: u64,
    pub next_upcoming: Option<CampaignPost>,
    /// Share of jobs in a terminal state, 0.0 to 100.0
    pub completion_percent: f64,
    /// The `now` the snapshot was computed for
    pub as_of: i64,
}

struct CachedSnapshot {
    taken: Instant,
    snapshot: MonitorSnapshot,
}

pub struct PublicationMonitor {
    db: Database,
    refresh_interval: Duration,
    cache: Mutex<HashMap<MonitorScope, CachedSnapshot>>,
}

impl PublicationMonitor {
    pub fn new(db: Database, refresh_interval: Duration) -> Self {
        Self {
            db,
            refresh_interval,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(db: Database, config: &MonitorConfig) -> Self {
        Self::new(db, Duration::from_secs(config.refresh_interval))
    }

    /// Snapshot for `scope`, at most `refresh_interval` old
    pub async fn snapshot(&self, scope: &MonitorScope, now: i64) -> Result<MonitorSnapshot> {
        if let Some(cached) = self.cached(scope) {
            return Ok(cached);
        }

        let snapshot = self.compute(scope, now).await?;
        self.lock_cache().insert(
            scope.clone(),
            CachedSnapshot {
                taken: Instant::now(),
                snapshot: snapshot.clone(),
            },
        );
        Ok(snapshot)
    }

    /// Bypass the cache and recompute
    pub async fn refresh(&self, scope: &MonitorScope, now: i64) -> Result<MonitorSnapshot> {
        self.lock_cache().remove(scope);
        self.snapshot(scope, now).await
    }

    fn cached(&self, scope: &MonitorScope) -> Option<MonitorSnapshot> {
        let cache = self.lock_cache();
        let entry = cache.get(scope)?;
        if entry.taken.elapsed() < self.refresh_interval {
            Some(entry.snapshot.clone())
        } else {
            None
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<MonitorScope, CachedSnapshot>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn compute(&self, scope: &MonitorScope, now: i64) -> Result<MonitorSnapshot> {
        let campaign_id = scope.campaign_id.as_deref();
        let counts = self.db.count_posts_by_status(campaign_id, scope.window).await?;
        let due = self.db.count_due(campaign_id, scope.window, now).await?;
        let next_upcoming = self
            .db
            .next_upcoming_post(campaign_id, scope.window, now)
            .await?;

        let count = |status: JobStatus| counts.get(&status).copied().unwrap_or(0);
        let scheduled = count(JobStatus::Scheduled);
        let publishing = count(JobStatus::Publishing);
        let published = count(JobStatus::Published);
        let failed = count(JobStatus::Failed);
        let skipped = count(JobStatus::Skipped);
        let total = scheduled + publishing + published + failed + skipped;

        Ok(MonitorSnapshot {
            scope: scope.clone(),
            total,
            scheduled,
            publishing,
            published,
            failed,
            skipped,
            pending: scheduled + publishing,
            due,
            next_upcoming,
            completion_percent: completion_percent(published + failed + skipped, total),
            as_of: now,
        })
    }
}

fn completion_percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64 * 1000.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleGenerator;
    use crate::types::{Campaign, CampaignStatus};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    // 2024-01-01T00:00Z
    const DAY_ONE: i64 = 1_704_067_200;

    async fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path.to_string_lossy()).await.unwrap();
        (temp_dir, db)
    }

    /// Two days, two posts a day at 10:00 and 18:00, one platform
    async fn seed_campaign(db: &Database) -> (Campaign, Vec<CampaignPost>) {
        let mut campaign = Campaign::draft("user-1", "Launch", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        campaign.duration_days = 2;
        campaign.posts_per_day = 2;
        campaign.posting_times = vec!["10:00".to_string(), "18:00".to_string()];
        campaign.platforms = vec!["x".to_string()];
        campaign.items = vec!["book-1".to_string()];
        db.create_campaign(&campaign).await.unwrap();

        let posts = ScheduleGenerator::new().generate(&campaign).unwrap();
        db.activate_campaign(&campaign.id, &[CampaignStatus::Draft], &posts)
            .await
            .unwrap();
        (campaign, posts)
    }

    #[tokio::test]
    async fn test_snapshot_counts_and_next_job() {
        let (_temp, db) = setup_test_db().await;
        let (campaign, posts) = seed_campaign(&db).await;

        db.claim_post(&posts[0].id, posts[0].scheduled_at).await.unwrap();
        db.mark_post_published(&posts[0].id, posts[0].scheduled_at, Some("p-1"), None)
            .await
            .unwrap();

        let monitor = PublicationMonitor::new(db, Duration::ZERO);
        let now = DAY_ONE + 20 * 3600; // day one, 20:00
        let snapshot = monitor
            .snapshot(&MonitorScope::campaign(&campaign.id), now)
            .await
            .unwrap();

        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.scheduled, 3);
        assert_eq!(snapshot.pending, 3);
        assert_eq!(snapshot.due, 1, "the 18:00 job is due");
        assert_eq!(snapshot.completion_percent, 25.0);
        assert_eq!(
            snapshot.next_upcoming.map(|p| p.scheduled_at),
            Some(posts[2].scheduled_at)
        );
    }

    #[tokio::test]
    async fn test_window_scope() {
        let (_temp, db) = setup_test_db().await;
        seed_campaign(&db).await;

        let monitor = PublicationMonitor::new(db, Duration::ZERO);
        let day_two = MonitorScope::window(DAY_ONE + 86_400, DAY_ONE + 2 * 86_400 - 1);
        let snapshot = monitor.snapshot(&day_two, DAY_ONE).await.unwrap();

        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.due, 0);
        assert_eq!(
            snapshot.next_upcoming.map(|p| p.scheduled_at),
            Some(DAY_ONE + 86_400 + 10 * 3600)
        );
    }

    #[tokio::test]
    async fn test_empty_scope() {
        let (_temp, db) = setup_test_db().await;
        let monitor = PublicationMonitor::new(db, Duration::ZERO);

        let snapshot = monitor.snapshot(&MonitorScope::all(), DAY_ONE).await.unwrap();
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.completion_percent, 0.0);
        assert!(snapshot.next_upcoming.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_until_refresh() {
        let (_temp, db) = setup_test_db().await;
        let (campaign, posts) = seed_campaign(&db).await;
        let monitor = PublicationMonitor::new(db.clone(), Duration::from_secs(3600));
        let scope = MonitorScope::campaign(&campaign.id);

        let before = monitor.snapshot(&scope, DAY_ONE).await.unwrap();
        db.skip_post(&posts[3].id).await.unwrap();

        let cached = monitor.snapshot(&scope, DAY_ONE).await.unwrap();
        assert_eq!(cached, before);

        let fresh = monitor.refresh(&scope, DAY_ONE).await.unwrap();
        assert_eq!(fresh.skipped, 1);
        assert_eq!(fresh.scheduled, 3);
    }

    #[test]
    fn test_completion_percent_rounding() {
        assert_eq!(completion_percent(1, 3), 33.3);
        assert_eq!(completion_percent(2, 3), 66.7);
        assert_eq!(completion_percent(3, 3), 100.0);
    }
}
