//! Core types for Promocast

use chrono::NaiveDate;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PublishErrorKind;

/// Lifecycle of a campaign
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Completed,
    Paused,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Paused => "paused",
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "paused" => Ok(Self::Paused),
            other => Err(format!("Unknown campaign status: {}", other)),
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-defined promotional run with cadence and platform targets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub duration_days: u32,
    pub posts_per_day: u32,
    /// Times of day as "HH:MM", cycled when shorter than `posts_per_day`
    pub posting_times: Vec<String>,
    pub platforms: Vec<String>,
    /// Percentage of slots classified as content (the rest are sales)
    pub content_ratio: u8,
    /// Candidate catalog item ids, in assignment order
    pub items: Vec<String>,
    pub status: CampaignStatus,
    pub created_at: i64,
}

impl Campaign {
    /// Create a draft campaign with a single daily post at 09:00
    pub fn draft(user_id: impl Into<String>, name: impl Into<String>, start_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            start_date,
            duration_days: 1,
            posts_per_day: 1,
            posting_times: vec!["09:00".to_string()],
            platforms: Vec::new(),
            content_ratio: 50,
            items: Vec::new(),
            status: CampaignStatus::Draft,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Total number of post slots, before platform fan-out
    pub fn slot_count(&self) -> u64 {
        u64::from(self.duration_days) * u64::from(self.posts_per_day)
    }
}

/// Status of a single platform-specific job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Scheduled,
    Publishing,
    Published,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// `published`, `failed` and `skipped` never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Failed | Self::Skipped)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "publishing" => Ok(Self::Publishing),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a slot promotes through editorial content or a direct sales pitch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Content,
    Sales,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Sales => "sales",
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(Self::Content),
            "sales" => Ok(Self::Sales),
            other => Err(format!("Unknown content type: {}", other)),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled, platform-specific publish job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignPost {
    pub id: String,
    pub campaign_id: String,
    pub slot_index: u32,
    pub item_id: String,
    pub platform: String,
    pub content_type: ContentType,
    pub scheduled_at: i64,
    pub status: JobStatus,
    pub published_at: Option<i64>,
    pub provider_post_id: Option<String>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// When the job entered `publishing`, used to recover abandoned claims
    pub claimed_at: Option<i64>,
}

/// Stored access data for one account on one platform
#[derive(Debug)]
pub struct Credential {
    pub id: String,
    pub user_id: String,
    pub platform: String,
    /// Handle, page id or channel id
    pub account_identifier: String,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// `None` for long-lived tokens
    pub expires_at: Option<i64>,
    /// Advisory only; publishing targets every connected account
    pub is_default: bool,
    /// Set after an authentication failure until the token is rotated
    pub invalid: bool,
    pub created_at: i64,
}

impl Credential {
    pub fn new(
        user_id: impl Into<String>,
        platform: impl Into<String>,
        account_identifier: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            platform: platform.into(),
            account_identifier: account_identifier.into(),
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            expires_at: None,
            is_default: false,
            invalid: false,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Key used for rate-limit windows and per-account serialization
    pub fn rate_limit_key(&self) -> String {
        format!("{}:{}", self.platform, self.account_identifier)
    }
}

/// Rate-limit metadata as communicated by a provider response
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit_max: u32,
    pub remaining: u32,
    pub reset_at: i64,
}

/// Locally mirrored rate-limit window for one (account, endpoint)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub account_id: String,
    pub endpoint: String,
    pub limit_max: u32,
    pub remaining: u32,
    pub reset_at: i64,
    pub updated_at: i64,
}

/// Result of one per-account publish attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Published,
    Deferred,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Deferred => "deferred",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "published" => Ok(Self::Published),
            "deferred" => Ok(Self::Deferred),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown attempt outcome: {}", other)),
        }
    }
}

/// Ledger entry for a per-account attempt, kept for diagnosis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishAttempt {
    pub id: Option<i64>,
    pub post_id: String,
    pub credential_id: String,
    pub account_identifier: String,
    pub outcome: AttemptOutcome,
    pub error_kind: Option<PublishErrorKind>,
    pub error_message: Option<String>,
    pub provider_post_id: Option<String>,
    pub attempted_at: i64,
}

/// Minimal catalog record consumed by the default renderer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    pub blurb: String,
    pub link: Option<String>,
    pub media_ref: Option<String>,
}
