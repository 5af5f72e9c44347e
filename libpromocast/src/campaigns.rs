//! Campaign lifecycle
//!
//! `draft -> active <-> paused -> completed`. Activation generates the schedule
//! and persists it together with the status change; cancelling skips every job
//! that has not been picked up yet. Jobs already `publishing` are never
//! interrupted.

use tracing::info;

use crate::db::Database;
use crate::error::{PromocastError, Result};
use crate::schedule::ScheduleGenerator;
use crate::types::{Campaign, CampaignPost, CampaignStatus};

pub struct CampaignService {
    db: Database,
    generator: ScheduleGenerator,
}

impl CampaignService {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            generator: ScheduleGenerator::new(),
        }
    }

    /// Validate and store a new draft campaign
    pub async fn create(&self, campaign: &Campaign) -> Result<()> {
        if campaign.status != CampaignStatus::Draft {
            return Err(PromocastError::InvalidInput(format!(
                "new campaigns must be drafts, got {}",
                campaign.status
            )));
        }
        self.generator.validate(campaign)?;
        self.db.create_campaign(campaign).await?;

        info!(campaign_id = %campaign.id, name = %campaign.name, "Created campaign");
        Ok(())
    }

    pub async fn get(&self, campaign_id: &str) -> Result<Campaign> {
        self.db
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| PromocastError::NotFound(format!("campaign {}", campaign_id)))
    }

    pub async fn list(&self, user_id: Option<&str>) -> Result<Vec<Campaign>> {
        self.db.list_campaigns(user_id).await
    }

    pub async fn jobs(&self, campaign_id: &str) -> Result<Vec<CampaignPost>> {
        self.get(campaign_id).await?;
        self.db.list_posts(campaign_id).await
    }

    /// Generate and persist the schedule, then mark the campaign active
    ///
    /// Re-activating an active campaign inserts nothing. Returns the number of
    /// jobs created.
    pub async fn activate(&self, campaign_id: &str) -> Result<u64> {
        let campaign = self.get(campaign_id).await?;
        let posts = self.generator.generate(&campaign)?;

        let inserted = self
            .db
            .activate_campaign(
                campaign_id,
                &[CampaignStatus::Draft, CampaignStatus::Active],
                &posts,
            )
            .await?
            .ok_or_else(|| invalid_transition(&campaign, "activate"))?;

        info!(campaign_id = %campaign_id, jobs = inserted, "Activated campaign");
        Ok(inserted)
    }

    /// Stop selecting the campaign's jobs for dispatch
    pub async fn pause(&self, campaign_id: &str) -> Result<()> {
        self.transition(campaign_id, &[CampaignStatus::Active], CampaignStatus::Paused, "pause")
            .await
    }

    pub async fn resume(&self, campaign_id: &str) -> Result<()> {
        self.transition(campaign_id, &[CampaignStatus::Paused], CampaignStatus::Active, "resume")
            .await
    }

    /// Complete the campaign now; returns the number of jobs skipped
    pub async fn cancel(&self, campaign_id: &str) -> Result<u64> {
        self.transition(
            campaign_id,
            &[CampaignStatus::Draft, CampaignStatus::Active, CampaignStatus::Paused],
            CampaignStatus::Completed,
            "cancel",
        )
        .await?;

        let skipped = self.db.skip_remaining_posts(campaign_id).await?;
        info!(campaign_id = %campaign_id, skipped, "Cancelled campaign");
        Ok(skipped)
    }

    /// Delete a campaign with its jobs and attempt history
    pub async fn delete(&self, campaign_id: &str) -> Result<()> {
        if !self.db.delete_campaign(campaign_id).await? {
            return Err(PromocastError::NotFound(format!("campaign {}", campaign_id)));
        }
        info!(campaign_id = %campaign_id, "Deleted campaign");
        Ok(())
    }

    /// Skip a single job that has not been picked up yet
    pub async fn skip_job(&self, post_id: &str) -> Result<()> {
        if self.db.skip_post(post_id).await? {
            return Ok(());
        }
        Err(self.job_not_scheduled(post_id, "skip").await)
    }

    /// Move a job that has not been picked up yet to `scheduled_at`
    pub async fn reschedule_job(&self, post_id: &str, scheduled_at: i64) -> Result<()> {
        if self.db.reschedule_post(post_id, scheduled_at).await? {
            return Ok(());
        }
        Err(self.job_not_scheduled(post_id, "reschedule").await)
    }

    /// Mark active campaigns with no open jobs as completed
    pub async fn complete_finished(&self) -> Result<u64> {
        let completed = self.db.complete_finished_campaigns().await?;
        if completed > 0 {
            info!(count = completed, "Completed finished campaigns");
        }
        Ok(completed)
    }

    async fn transition(
        &self,
        campaign_id: &str,
        from: &[CampaignStatus],
        to: CampaignStatus,
        action: &str,
    ) -> Result<()> {
        if self.db.transition_campaign(campaign_id, from, to).await? {
            info!(campaign_id = %campaign_id, status = %to, "Campaign status changed");
            return Ok(());
        }
        let campaign = self.get(campaign_id).await?;
        Err(invalid_transition(&campaign, action))
    }

    async fn job_not_scheduled(&self, post_id: &str, action: &str) -> PromocastError {
        match self.db.get_post(post_id).await {
            Ok(Some(post)) => PromocastError::InvalidInput(format!(
                "cannot {} job {}: it is {}",
                action, post_id, post.status
            )),
            Ok(None) => PromocastError::NotFound(format!("job {}", post_id)),
            Err(e) => e,
        }
    }
}

fn invalid_transition(campaign: &Campaign, action: &str) -> PromocastError {
    PromocastError::InvalidInput(format!(
        "cannot {} campaign {}: it is {}",
        action, campaign.id, campaign.status
    ))
}
