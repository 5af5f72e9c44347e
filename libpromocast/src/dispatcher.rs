//! Job dispatcher
//!
//! One call to [`Dispatcher::run_due_jobs`] is one dispatch pass:
//!
//! 1. select scheduled jobs of active campaigns that are due, oldest first
//! 2. claim each job (`scheduled -> publishing`) with a conditional update;
//!    a job someone else claimed is left alone
//! 3. render the job and resolve its media
//! 4. fan out one attempt per valid connected account, concurrently, with
//!    attempts against the same account serialized
//! 5. aggregate: any success publishes the job; otherwise any transient
//!    outcome returns it to `scheduled`; otherwise it fails
//!
//! Runs are safe to overlap, whether in one process or several.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::error::{PublishError, PublishErrorKind, Result};
use crate::platforms::{Platform, PlatformRegistry, PublishContent};
use crate::rate_limiter::RateLimitTracker;
use crate::render::{CatalogRenderer, ContentRenderer, MediaResolver, PassthroughResolver, ResolvedMedia};
use crate::types::{AttemptOutcome, CampaignPost, Credential, PublishAttempt};

/// Default bound on a single provider call
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Counts produced by one dispatch pass
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchReport {
    /// Jobs selected as due
    pub due: usize,
    /// Jobs this pass won the claim for
    pub claimed: usize,
    /// Per-account attempts that published
    pub published: usize,
    /// Per-account attempts that failed terminally
    pub failed: usize,
    /// Per-account attempts deferred to a later pass
    pub deferred: usize,
    pub jobs_published: usize,
    pub jobs_failed: usize,
    /// Jobs returned to `scheduled`
    pub jobs_deferred: usize,
}

impl DispatchReport {
    fn absorb(&mut self, outcome: &JobOutcome) {
        for attempt in &outcome.attempts {
            match attempt.outcome {
                AttemptOutcome::Published => self.published += 1,
                AttemptOutcome::Failed => self.failed += 1,
                AttemptOutcome::Deferred => self.deferred += 1,
            }
        }
        match outcome.resolution {
            Resolution::Published => self.jobs_published += 1,
            Resolution::Failed => self.jobs_failed += 1,
            Resolution::Deferred => self.jobs_deferred += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Published,
    Failed,
    Deferred,
}

struct JobOutcome {
    resolution: Resolution,
    attempts: Vec<AccountAttempt>,
}

impl JobOutcome {
    fn without_attempts(resolution: Resolution) -> Self {
        Self {
            resolution,
            attempts: Vec::new(),
        }
    }
}

/// Result of one per-account attempt
#[derive(Debug, Clone)]
struct AccountAttempt {
    credential_id: String,
    account: String,
    outcome: AttemptOutcome,
    error: Option<PublishError>,
    provider_post_id: Option<String>,
}

pub struct Dispatcher {
    db: Database,
    registry: PlatformRegistry,
    credentials: CredentialStore,
    rate_limits: RateLimitTracker,
    renderer: Arc<dyn ContentRenderer>,
    resolver: Arc<dyn MediaResolver>,
    attempt_timeout: Duration,
    /// Serializes attempts per rate-limit key within this process
    account_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Dispatcher {
    /// Create a dispatcher with the catalog renderer and passthrough media resolver
    pub fn new(db: Database, registry: PlatformRegistry) -> Self {
        Self {
            renderer: Arc::new(CatalogRenderer::new(db.clone())),
            resolver: Arc::new(PassthroughResolver),
            db,
            registry,
            credentials: CredentialStore::default(),
            rate_limits: RateLimitTracker::new(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a dispatcher with timeout and expiry skew from configuration
    pub fn from_config(db: Database, registry: PlatformRegistry, config: &DispatchConfig) -> Result<Self> {
        Ok(Self::new(db, registry)
            .with_attempt_timeout(config.attempt_timeout()?)
            .with_credential_store(CredentialStore::new(config.expiry_skew)))
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ContentRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn MediaResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_credential_store(mut self, credentials: CredentialStore) -> Self {
        self.credentials = credentials;
        self
    }

    /// Dispatch every job due at `now`
    ///
    /// A failing job never aborts the pass; only an error reading the due set
    /// is returned.
    pub async fn run_due_jobs(&self, now: i64) -> Result<DispatchReport> {
        let due = self.db.due_posts(now).await?;
        let mut report = DispatchReport {
            due: due.len(),
            ..Default::default()
        };

        if due.is_empty() {
            debug!("No due jobs");
            return Ok(report);
        }
        info!(count = due.len(), "Dispatching due jobs");

        for post in due {
            match self.db.claim_post(&post.id, now).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job_id = %post.id, "Job already claimed or campaign inactive, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(job_id = %post.id, error = %e, "Claim failed, leaving job for the next pass");
                    continue;
                }
            }
            report.claimed += 1;

            let outcome = match self.dispatch_claimed(&post, now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Leave the claim for stale-claim recovery rather than guess a state
                    warn!(job_id = %post.id, error = %e, "Dispatch bookkeeping failed");
                    continue;
                }
            };
            report.absorb(&outcome);
        }

        info!(
            claimed = report.claimed,
            published = report.jobs_published,
            failed = report.jobs_failed,
            deferred = report.jobs_deferred,
            "Dispatch pass complete"
        );
        Ok(report)
    }

    /// Return `publishing` jobs claimed before `now - stale_after` to the queue
    pub async fn recover_stale_claims(&self, now: i64, stale_after: i64) -> Result<u64> {
        let recovered = self.db.recover_stale_claims(now - stale_after).await?;
        if recovered > 0 {
            warn!(count = recovered, "Recovered stale publishing claims");
        }
        Ok(recovered)
    }

    async fn dispatch_claimed(&self, post: &CampaignPost, now: i64) -> Result<JobOutcome> {
        let campaign = match self.db.get_campaign(&post.campaign_id).await? {
            Some(c) => c,
            None => {
                // Deleted between claim and here; the job went with it
                return Ok(JobOutcome::without_attempts(Resolution::Failed));
            }
        };

        let platform = match self.registry.get(&post.platform) {
            Some(p) => p,
            None => {
                let reason = format!("no adapter registered for platform '{}'", post.platform);
                warn!(job_id = %post.id, platform = %post.platform, "{}", reason);
                self.db.mark_post_failed(&post.id, &reason).await?;
                return Ok(JobOutcome::without_attempts(Resolution::Failed));
            }
        };

        let accounts = self
            .credentials
            .valid_accounts(&self.db, &campaign.user_id, &post.platform, now)
            .await?;
        if accounts.is_empty() {
            let reason = format!("no valid credentials for platform '{}'", post.platform);
            info!(job_id = %post.id, platform = %post.platform, "{}, deferring", reason);
            self.db.requeue_post(&post.id, &reason).await?;
            return Ok(JobOutcome::without_attempts(Resolution::Deferred));
        }

        let rendered = match self.renderer.render(post).await {
            Ok(r) => r,
            Err(e) => {
                let resolution = if e.kind.is_transient() {
                    self.db.requeue_post(&post.id, &e.to_string()).await?;
                    Resolution::Deferred
                } else {
                    self.db.mark_post_failed(&post.id, &e.to_string()).await?;
                    Resolution::Failed
                };
                warn!(job_id = %post.id, error = %e, "Rendering failed");
                return Ok(JobOutcome::without_attempts(resolution));
            }
        };

        let media = match &rendered.media_ref {
            Some(media_ref) => match self.resolver.resolve(media_ref).await {
                Ok(m) => Some(m),
                Err(e) => {
                    let e = PublishError::unsupported_media(e.message);
                    warn!(job_id = %post.id, error = %e, "Media resolution failed");
                    self.db.mark_post_failed(&post.id, &e.to_string()).await?;
                    return Ok(JobOutcome::without_attempts(Resolution::Failed));
                }
            },
            None => None,
        };

        let content = PublishContent::text(&post.id, &post.item_id, post.content_type, rendered.text)
            .with_media(media.as_ref().map(|m| m.url.clone()));

        // Each pass resolves afresh, so the handle is released on every path
        let outcome = self
            .publish_to_accounts(platform.as_ref(), post, &accounts, &content, now)
            .await;
        if let Some(media) = &media {
            self.release_media(post, media).await;
        }
        outcome
    }

    async fn publish_to_accounts(
        &self,
        platform: &dyn Platform,
        post: &CampaignPost,
        accounts: &[Credential],
        content: &PublishContent,
        now: i64,
    ) -> Result<JobOutcome> {
        let attempts = join_all(
            accounts
                .iter()
                .map(|credential| self.attempt_account(platform, post, credential, content, now)),
        )
        .await;

        for attempt in &attempts {
            self.record_attempt(post, attempt, now).await;
        }

        let resolution = self.resolve_job(post, &attempts, now).await?;
        Ok(JobOutcome {
            resolution,
            attempts,
        })
    }

    async fn attempt_account(
        &self,
        platform: &dyn Platform,
        post: &CampaignPost,
        credential: &Credential,
        content: &PublishContent,
        now: i64,
    ) -> AccountAttempt {
        let account_key = credential.rate_limit_key();
        let endpoint = platform.rate_limit_endpoint();
        let lock = self.account_lock(&account_key);
        let _guard = lock.lock().await;

        let attempt = |outcome, error: Option<PublishError>, provider_post_id| AccountAttempt {
            credential_id: credential.id.clone(),
            account: credential.account_identifier.clone(),
            outcome,
            error,
            provider_post_id,
        };

        match self
            .rate_limits
            .can_dispatch(&self.db, &account_key, endpoint, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                let minutes = self
                    .rate_limits
                    .minutes_until_reset(&self.db, &account_key, endpoint, now)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or(0);
                debug!(
                    job_id = %post.id,
                    account = %credential.account_identifier,
                    minutes_until_reset = minutes,
                    "Rate limit window exhausted, deferring"
                );
                let error = PublishError::rate_limited(format!(
                    "local rate-limit window exhausted, resets in {} min",
                    minutes
                ));
                return attempt(AttemptOutcome::Deferred, Some(error), None);
            }
            Err(e) => {
                warn!(account = %credential.account_identifier, error = %e, "Rate limit lookup failed");
                let error = PublishError::transient_network(format!("rate limit lookup failed: {}", e));
                return attempt(AttemptOutcome::Deferred, Some(error), None);
            }
        }

        let result = match tokio::time::timeout(self.attempt_timeout, platform.publish(credential, content)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::transient_network(format!(
                "publish timed out after {}",
                humantime::format_duration(self.attempt_timeout)
            ))),
        };

        let rate_limit = match &result {
            Ok(receipt) => receipt.rate_limit,
            Err(e) => e.rate_limit,
        };
        if let Err(e) = self
            .rate_limits
            .record_attempt(&self.db, &account_key, endpoint, rate_limit, now)
            .await
        {
            warn!(account = %credential.account_identifier, error = %e, "Failed to update rate limit window");
        }

        match result {
            Ok(receipt) => {
                info!(
                    job_id = %post.id,
                    platform = %post.platform,
                    account = %credential.account_identifier,
                    provider_post_id = %receipt.provider_post_id,
                    "Published"
                );
                attempt(AttemptOutcome::Published, None, Some(receipt.provider_post_id))
            }
            Err(e) => {
                if e.kind == PublishErrorKind::AuthExpired {
                    if let Err(mark_err) = self.credentials.mark_invalid(&self.db, &credential.id).await {
                        warn!(credential_id = %credential.id, error = %mark_err, "Failed to flag credential");
                    }
                }

                let outcome = if e.kind.is_transient() {
                    AttemptOutcome::Deferred
                } else {
                    AttemptOutcome::Failed
                };
                warn!(
                    job_id = %post.id,
                    platform = %post.platform,
                    account = %credential.account_identifier,
                    kind = %e.kind,
                    error = %e.message,
                    "Publish attempt did not succeed"
                );
                attempt(outcome, Some(e), None)
            }
        }
    }

    async fn resolve_job(&self, post: &CampaignPost, attempts: &[AccountAttempt], now: i64) -> Result<Resolution> {
        let summary = failure_summary(attempts);

        if let Some(success) = attempts.iter().find(|a| a.outcome == AttemptOutcome::Published) {
            let updated = self
                .db
                .mark_post_published(&post.id, now, success.provider_post_id.as_deref(), summary.as_deref())
                .await?;
            if !updated {
                warn!(job_id = %post.id, "Job left publishing before it could be marked published");
            }
            return Ok(Resolution::Published);
        }

        let summary = summary.unwrap_or_else(|| "no account attempt was made".to_string());
        if attempts.iter().any(|a| a.outcome == AttemptOutcome::Deferred) {
            self.db.requeue_post(&post.id, &summary).await?;
            Ok(Resolution::Deferred)
        } else {
            self.db.mark_post_failed(&post.id, &summary).await?;
            Ok(Resolution::Failed)
        }
    }

    async fn record_attempt(&self, post: &CampaignPost, attempt: &AccountAttempt, now: i64) {
        let entry = PublishAttempt {
            id: None,
            post_id: post.id.clone(),
            credential_id: attempt.credential_id.clone(),
            account_identifier: attempt.account.clone(),
            outcome: attempt.outcome,
            error_kind: attempt.error.as_ref().map(|e| e.kind),
            error_message: attempt.error.as_ref().map(|e| e.message.clone()),
            provider_post_id: attempt.provider_post_id.clone(),
            attempted_at: now,
        };

        if let Err(e) = self.db.record_attempt(&entry).await {
            warn!(job_id = %post.id, account = %attempt.account, error = %e, "Failed to record attempt");
        }
    }

    async fn release_media(&self, post: &CampaignPost, media: &ResolvedMedia) {
        if let Err(e) = self.resolver.cleanup(media).await {
            warn!(job_id = %post.id, error = %e, "Media cleanup failed");
        }
    }

    fn account_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .account_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// "account: kind: message" for every attempt that did not publish
fn failure_summary(attempts: &[AccountAttempt]) -> Option<String> {
    let failures: Vec<String> = attempts
        .iter()
        .filter_map(|a| a.error.as_ref().map(|e| format!("{}: {}", a.account, e)))
        .collect();

    if failures.is_empty() {
        None
    } else {
        Some(failures.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::{MockOutcome, MockPlatform};
    use crate::render::RenderedContent;
    use crate::types::{Campaign, CampaignStatus, JobStatus, RateLimitInfo};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const NOW: i64 = 1_704_103_200; // 2024-01-01T10:00Z

    struct FixedRenderer {
        media_ref: Option<String>,
    }

    #[async_trait]
    impl ContentRenderer for FixedRenderer {
        async fn render(&self, post: &CampaignPost) -> std::result::Result<RenderedContent, PublishError> {
            Ok(RenderedContent {
                text: format!("Promoting {}", post.item_id),
                media_ref: self.media_ref.clone(),
            })
        }
    }

    #[derive(Default)]
    struct CountingResolver {
        resolves: AtomicUsize,
        cleanups: AtomicUsize,
    }

    #[async_trait]
    impl MediaResolver for CountingResolver {
        async fn resolve(&self, media_ref: &str) -> std::result::Result<ResolvedMedia, PublishError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            PassthroughResolver.resolve(media_ref).await
        }

        async fn cleanup(&self, _media: &ResolvedMedia) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path.to_string_lossy()).await.unwrap();
        (temp_dir, db)
    }

    /// One active campaign on platform "x" with a single job due at NOW
    async fn seed_due_job(db: &Database) -> CampaignPost {
        let mut campaign = Campaign::draft("user-1", "Launch", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        campaign.platforms = vec!["x".to_string()];
        campaign.items = vec!["book-1".to_string()];
        campaign.posting_times = vec!["10:00".to_string()];
        db.create_campaign(&campaign).await.unwrap();

        let posts = crate::schedule::ScheduleGenerator::new().generate(&campaign).unwrap();
        db.activate_campaign(&campaign.id, &[CampaignStatus::Draft], &posts)
            .await
            .unwrap();
        posts.into_iter().next().unwrap()
    }

    async fn connect(db: &Database, account: &str) -> String {
        db.upsert_credential(&Credential::new("user-1", "x", account, "token"))
            .await
            .unwrap()
    }

    fn dispatcher(db: &Database, platform: MockPlatform) -> Dispatcher {
        let mut registry = PlatformRegistry::new();
        registry.register(platform);
        Dispatcher::new(db.clone(), registry).with_renderer(Arc::new(FixedRenderer { media_ref: None }))
    }

    #[tokio::test]
    async fn test_publishes_due_job() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        connect(&db, "@books").await;
        let mock = MockPlatform::success("x");

        let report = dispatcher(&db, mock.clone()).run_due_jobs(NOW).await.unwrap();

        assert_eq!(report.due, 1);
        assert_eq!(report.claimed, 1);
        assert_eq!(report.published, 1);
        assert_eq!(report.jobs_published, 1);

        let job = db.get_post(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Published);
        assert_eq!(job.published_at, Some(NOW));
        assert!(job.provider_post_id.unwrap().starts_with("x:mock-"));
        assert_eq!(job.attempt_count, 1);
        assert_eq!(mock.published()[0].text, "Promoting book-1");
    }

    #[tokio::test]
    async fn test_claim_error_does_not_abort_pass() {
        let (_temp, db) = setup_test_db().await;
        let broken = seed_due_job(&db).await;
        let healthy = seed_due_job(&db).await;
        connect(&db, "@books").await;

        let trigger = format!(
            "CREATE TRIGGER reject_claim BEFORE UPDATE OF status ON campaign_posts \
             WHEN NEW.id = '{}' AND NEW.status = 'publishing' \
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
            broken.id
        );
        sqlx::query(&trigger).execute(db.pool()).await.unwrap();

        let report = dispatcher(&db, MockPlatform::success("x")).run_due_jobs(NOW).await.unwrap();

        assert_eq!(report.due, 2);
        assert_eq!(report.claimed, 1);
        assert_eq!(report.jobs_published, 1);
        assert_eq!(
            db.get_post(&broken.id).await.unwrap().unwrap().status,
            JobStatus::Scheduled
        );
        assert_eq!(
            db.get_post(&healthy.id).await.unwrap().unwrap().status,
            JobStatus::Published
        );
    }

    #[tokio::test]
    async fn test_future_job_is_not_due() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        connect(&db, "@books").await;
        let mock = MockPlatform::success("x");

        let report = dispatcher(&db, mock.clone()).run_due_jobs(NOW - 1).await.unwrap();

        assert_eq!(report, DispatchReport::default());
        assert_eq!(mock.publish_call_count(), 0);
        let job = db.get_post(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_partial_success_with_expired_account() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        let expired_id = connect(&db, "@a").await;
        connect(&db, "@b").await;
        let mock = MockPlatform::success("x").account_outcome(
            "@a",
            MockOutcome::Fail(PublishErrorKind::AuthExpired, "token revoked".to_string()),
        );

        let report = dispatcher(&db, mock).run_due_jobs(NOW).await.unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.jobs_published, 1);

        let job = db.get_post(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Published);
        assert!(db.get_credential(&expired_id).await.unwrap().unwrap().invalid);

        let attempts = db.get_attempts(&job.id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        let failed = attempts.iter().find(|a| a.account_identifier == "@a").unwrap();
        assert_eq!(failed.outcome, AttemptOutcome::Deferred);
        assert_eq!(failed.error_kind, Some(PublishErrorKind::AuthExpired));
    }

    #[tokio::test]
    async fn test_content_rejected_fails_job() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        connect(&db, "@books").await;
        let mock = MockPlatform::failure("x", PublishErrorKind::ContentRejected, "duplicate");

        let report = dispatcher(&db, mock).run_due_jobs(NOW).await.unwrap();
        assert_eq!(report.jobs_failed, 1);

        let job = db.get_post(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.last_error.unwrap().contains("duplicate"));
    }

    #[tokio::test]
    async fn test_transient_failure_requeues_job() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        connect(&db, "@books").await;
        let mock = MockPlatform::failure("x", PublishErrorKind::TransientNetwork, "connection reset");
        let dispatcher = dispatcher(&db, mock.clone());

        let report = dispatcher.run_due_jobs(NOW).await.unwrap();
        assert_eq!(report.jobs_deferred, 1);

        let requeued = db.get_post(&job.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Scheduled);
        assert_eq!(requeued.scheduled_at, job.scheduled_at);
        assert!(requeued.last_error.unwrap().contains("connection reset"));

        // Eligible again on the next scan
        dispatcher.run_due_jobs(NOW + 60).await.unwrap();
        assert_eq!(mock.publish_call_count(), 2);
        assert_eq!(db.get_post(&job.id).await.unwrap().unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        connect(&db, "@books").await;
        let mock = MockPlatform::with_delay("x", Duration::from_millis(500));

        let report = dispatcher(&db, mock)
            .with_attempt_timeout(Duration::from_millis(20))
            .run_due_jobs(NOW)
            .await
            .unwrap();

        assert_eq!(report.deferred, 1);
        let attempts = db.get_attempts(&job.id).await.unwrap();
        assert_eq!(attempts[0].error_kind, Some(PublishErrorKind::TransientNetwork));
        assert!(attempts[0].error_message.as_ref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_no_credentials_defers() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        let mock = MockPlatform::success("x");

        let report = dispatcher(&db, mock.clone()).run_due_jobs(NOW).await.unwrap();
        assert_eq!(report.jobs_deferred, 1);
        assert_eq!(mock.publish_call_count(), 0);

        let job = db.get_post(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Scheduled);
        assert!(job.last_error.unwrap().contains("no valid credentials"));
    }

    #[tokio::test]
    async fn test_unknown_platform_fails() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        connect(&db, "@books").await;

        let report = dispatcher(&db, MockPlatform::success("mastodon"))
            .run_due_jobs(NOW)
            .await
            .unwrap();
        assert_eq!(report.jobs_failed, 1);
        assert_eq!(
            db.get_post(&job.id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_account() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        connect(&db, "@books").await;
        let reset_at = NOW + 900;
        let mock = MockPlatform::success("x");
        let tracker = RateLimitTracker::new();
        tracker
            .record_attempt(
                &db,
                "x:@books",
                crate::rate_limiter::DEFAULT_ENDPOINT,
                Some(RateLimitInfo {
                    limit_max: 300,
                    remaining: 0,
                    reset_at,
                }),
                NOW,
            )
            .await
            .unwrap();
        let dispatcher = dispatcher(&db, mock.clone());

        let report = dispatcher.run_due_jobs(NOW).await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(mock.publish_call_count(), 0, "no call while the window is exhausted");

        dispatcher.run_due_jobs(reset_at).await.unwrap();
        assert_eq!(mock.publish_call_count(), 1);
        assert_eq!(
            db.get_post(&job.id).await.unwrap().unwrap().status,
            JobStatus::Published
        );
    }

    #[tokio::test]
    async fn test_provider_rate_limit_info_is_recorded() {
        let (_temp, db) = setup_test_db().await;
        seed_due_job(&db).await;
        connect(&db, "@books").await;
        let info = RateLimitInfo {
            limit_max: 10,
            remaining: 0,
            reset_at: NOW + 600,
        };

        dispatcher(&db, MockPlatform::success("x").rate_limit(info))
            .run_due_jobs(NOW)
            .await
            .unwrap();

        let window = db
            .get_rate_limit_window("x:@books", crate::rate_limiter::DEFAULT_ENDPOINT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(window.remaining, 0);
        assert_eq!(window.reset_at, NOW + 600);
    }

    #[tokio::test]
    async fn test_media_released_after_every_pass() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        connect(&db, "@books").await;
        let resolver = Arc::new(CountingResolver::default());
        let dispatcher = |platform: MockPlatform| {
            let mut registry = PlatformRegistry::new();
            registry.register(platform);
            Dispatcher::new(db.clone(), registry)
                .with_renderer(Arc::new(FixedRenderer {
                    media_ref: Some("https://cdn.example/cover.jpg".to_string()),
                }))
                .with_resolver(resolver.clone())
        };

        let flaky = MockPlatform::failure("x", PublishErrorKind::TransientNetwork, "connection reset");
        for pass in 0..3 {
            let report = dispatcher(flaky.clone()).run_due_jobs(NOW + pass * 60).await.unwrap();
            assert_eq!(report.jobs_deferred, 1);
            assert_eq!(
                resolver.cleanups.load(Ordering::SeqCst),
                resolver.resolves.load(Ordering::SeqCst),
                "deferred pass {} must release its media",
                pass
            );
        }

        let mock = MockPlatform::success("x");
        dispatcher(mock.clone()).run_due_jobs(NOW + 3_600).await.unwrap();

        assert_eq!(resolver.resolves.load(Ordering::SeqCst), 4);
        assert_eq!(resolver.cleanups.load(Ordering::SeqCst), 4);
        assert_eq!(
            mock.published()[0].media_url.as_deref(),
            Some("https://cdn.example/cover.jpg")
        );
        assert_eq!(
            db.get_post(&job.id).await.unwrap().unwrap().status,
            JobStatus::Published
        );
    }

    #[tokio::test]
    async fn test_unresolvable_media_fails_job() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        connect(&db, "@books").await;
        let mock = MockPlatform::success("x");
        let mut registry = PlatformRegistry::new();
        registry.register(mock.clone());

        Dispatcher::new(db.clone(), registry)
            .with_renderer(Arc::new(FixedRenderer {
                media_ref: Some("vault://encrypted/cover".to_string()),
            }))
            .run_due_jobs(NOW)
            .await
            .unwrap();

        assert_eq!(mock.publish_call_count(), 0);
        let job = db.get_post(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.last_error.unwrap().contains("unsupported_media"));
    }

    #[tokio::test]
    async fn test_paused_campaign_is_not_dispatched() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        connect(&db, "@books").await;
        db.transition_campaign(&job.campaign_id, &[CampaignStatus::Active], CampaignStatus::Paused)
            .await
            .unwrap();
        let mock = MockPlatform::success("x");

        let report = dispatcher(&db, mock.clone()).run_due_jobs(NOW).await.unwrap();
        assert_eq!(report.due, 0);
        assert_eq!(mock.publish_call_count(), 0);
    }

    #[tokio::test]
    async fn test_recover_stale_claims() {
        let (_temp, db) = setup_test_db().await;
        let job = seed_due_job(&db).await;
        db.claim_post(&job.id, NOW).await.unwrap();
        let dispatcher = dispatcher(&db, MockPlatform::success("x"));

        assert_eq!(dispatcher.recover_stale_claims(NOW + 100, 900).await.unwrap(), 0);
        assert_eq!(dispatcher.recover_stale_claims(NOW + 1_000, 900).await.unwrap(), 1);
        assert_eq!(
            db.get_post(&job.id).await.unwrap().unwrap().status,
            JobStatus::Scheduled
        );
    }

    #[test]
    fn test_failure_summary() {
        let attempts = vec![
            AccountAttempt {
                credential_id: "c1".to_string(),
                account: "@a".to_string(),
                outcome: AttemptOutcome::Deferred,
                error: Some(PublishError::auth_expired("revoked")),
                provider_post_id: None,
            },
            AccountAttempt {
                credential_id: "c2".to_string(),
                account: "@b".to_string(),
                outcome: AttemptOutcome::Published,
                error: None,
                provider_post_id: Some("1".to_string()),
            },
        ];
        assert_eq!(
            failure_summary(&attempts).as_deref(),
            Some("@a: auth_expired: revoked")
        );
        assert_eq!(failure_summary(&attempts[1..]), None);
    }
}
