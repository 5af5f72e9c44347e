//! Schedule generation
//!
//! Expands a campaign definition into concrete, platform-specific publish jobs.
//! Generation is a pure function of the campaign: regenerating the same
//! definition yields the same slot timestamps, classifications and items.

use chrono::{Days, NaiveTime};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::types::{Campaign, CampaignPost, ContentType, JobStatus};
use crate::{PromocastError, Result};

/// Offset applied to a slot whose timestamp is already taken
pub const COLLISION_OFFSET_SECONDS: i64 = 60;

/// One slot per minute of the day
pub const MAX_POSTS_PER_DAY: u32 = 1440;

/// Upper bound on slots per campaign, before platform fan-out
pub const MAX_CAMPAIGN_SLOTS: u64 = 100_000;

/// One post slot before platform fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledSlot {
    pub slot_index: u32,
    pub scheduled_at: i64,
    pub content_type: ContentType,
    pub item_id: String,
}

/// Turns campaign definitions into job lists
#[derive(Debug, Default, Clone, Copy)]
pub struct ScheduleGenerator;

impl ScheduleGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Check that a campaign can produce a schedule
    ///
    /// # Errors
    ///
    /// Returns `PromocastError::InvalidCampaign` for a zero duration or cadence,
    /// more than [`MAX_POSTS_PER_DAY`] posts a day or [`MAX_CAMPAIGN_SLOTS`] in
    /// total, an empty item, platform or posting-time list, a ratio above 100,
    /// or an unparseable time of day.
    pub fn validate(&self, campaign: &Campaign) -> Result<()> {
        if campaign.duration_days == 0 {
            return Err(invalid("duration_days must be at least 1"));
        }
        if campaign.posts_per_day == 0 {
            return Err(invalid("posts_per_day must be at least 1"));
        }
        if campaign.posts_per_day > MAX_POSTS_PER_DAY {
            return Err(invalid(&format!(
                "posts_per_day must be at most {}",
                MAX_POSTS_PER_DAY
            )));
        }
        if campaign.content_ratio > 100 {
            return Err(invalid("content_ratio must be between 0 and 100"));
        }
        if campaign.items.is_empty() {
            return Err(invalid("candidate item set is empty"));
        }
        if campaign.platforms.iter().all(|p| p.trim().is_empty()) {
            return Err(invalid("at least one target platform is required"));
        }
        if campaign.posting_times.is_empty() {
            return Err(invalid("at least one posting time is required"));
        }
        for time in &campaign.posting_times {
            parse_time_of_day(time)?;
        }
        if campaign.slot_count() > MAX_CAMPAIGN_SLOTS {
            return Err(invalid(&format!(
                "campaign would produce {} slots, the limit is {}",
                campaign.slot_count(),
                MAX_CAMPAIGN_SLOTS
            )));
        }
        Ok(())
    }

    /// Compute the ordered slot list of a campaign
    pub fn slots(&self, campaign: &Campaign) -> Result<Vec<ScheduledSlot>> {
        self.validate(campaign)?;

        let times = campaign
            .posting_times
            .iter()
            .map(|t| parse_time_of_day(t))
            .collect::<Result<Vec<_>>>()?;

        let mut slots = Vec::with_capacity(campaign.slot_count() as usize);
        let mut taken = HashSet::new();
        // Where probing resumes for each base timestamp; everything before it is taken
        let mut next_free: HashMap<i64, i64> = HashMap::new();
        let mut slot_index: u32 = 0;

        for day in 0..campaign.duration_days {
            let date = campaign
                .start_date
                .checked_add_days(Days::new(u64::from(day)))
                .ok_or_else(|| invalid("campaign runs past the supported date range"))?;

            for i in 0..campaign.posts_per_day {
                let time = times[i as usize % times.len()];
                let base = date.and_time(time).and_utc().timestamp();
                let mut scheduled_at = next_free.get(&base).copied().unwrap_or(base);
                while !taken.insert(scheduled_at) {
                    scheduled_at += COLLISION_OFFSET_SECONDS;
                }
                next_free.insert(base, scheduled_at + COLLISION_OFFSET_SECONDS);

                slots.push(ScheduledSlot {
                    slot_index,
                    scheduled_at,
                    content_type: classify(slot_index, campaign.content_ratio),
                    item_id: campaign.items[slot_index as usize % campaign.items.len()].clone(),
                });
                slot_index += 1;
            }
        }

        Ok(slots)
    }

    /// Generate one `scheduled` job per (slot, platform)
    ///
    /// Nothing is produced unless the whole campaign validates.
    pub fn generate(&self, campaign: &Campaign) -> Result<Vec<CampaignPost>> {
        let slots = self.slots(campaign)?;
        let platforms = target_platforms(campaign);

        let mut posts = Vec::with_capacity(slots.len() * platforms.len());
        for slot in &slots {
            for platform in &platforms {
                posts.push(CampaignPost {
                    id: Uuid::new_v4().to_string(),
                    campaign_id: campaign.id.clone(),
                    slot_index: slot.slot_index,
                    item_id: slot.item_id.clone(),
                    platform: (*platform).to_string(),
                    content_type: slot.content_type,
                    scheduled_at: slot.scheduled_at,
                    status: JobStatus::Scheduled,
                    published_at: None,
                    provider_post_id: None,
                    attempt_count: 0,
                    last_error: None,
                    claimed_at: None,
                });
            }
        }

        tracing::debug!(
            campaign_id = %campaign.id,
            slots = slots.len(),
            jobs = posts.len(),
            "Generated campaign schedule"
        );

        Ok(posts)
    }
}

/// Parse an "HH:MM" time of day
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map_err(|_| invalid(&format!("invalid posting time '{}', expected HH:MM", input)))
}

/// Carried-remainder classification: slot `k` is content exactly when the
/// running content quota `floor(k * ratio / 100)` steps up at `k + 1`.
fn classify(slot_index: u32, ratio: u8) -> ContentType {
    let k = u64::from(slot_index);
    let ratio = u64::from(ratio);
    if (k + 1) * ratio / 100 > k * ratio / 100 {
        ContentType::Content
    } else {
        ContentType::Sales
    }
}

/// Distinct, non-blank platform names in their configured order
fn target_platforms(campaign: &Campaign) -> Vec<&str> {
    let mut seen = HashSet::new();
    campaign
        .platforms
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty() && seen.insert(*p))
        .collect()
}

fn invalid(reason: &str) -> PromocastError {
    PromocastError::InvalidCampaign(reason.to_string())
}
