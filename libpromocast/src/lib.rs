//! Promocast - campaign publishing orchestrator
//!
//! This library turns declarative promotional campaigns into per-platform
//! publish jobs and dispatches them against the connected accounts of each
//! user, honoring provider rate limits and token expiry.

pub mod campaigns;
pub mod config;
pub mod credentials;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod platforms;
pub mod rate_limiter;
pub mod render;
pub mod schedule;
pub mod types;

// Re-export commonly used types
pub use campaigns::CampaignService;
pub use config::Config;
pub use credentials::CredentialStore;
pub use db::{Database, TimeWindow};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{PromocastError, PublishError, PublishErrorKind, Result};
pub use monitor::{MonitorScope, MonitorSnapshot, PublicationMonitor};
pub use rate_limiter::RateLimitTracker;
pub use schedule::ScheduleGenerator;
pub use types::{
    AttemptOutcome, Campaign, CampaignPost, CampaignStatus, CatalogItem, ContentType, Credential,
    JobStatus, PublishAttempt, RateLimitInfo,
};
