//! Error types for Promocast

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RateLimitInfo;

pub type Result<T> = std::result::Result<T, PromocastError>;

#[derive(Error, Debug)]
pub enum PromocastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Campaign parameters that cannot produce a schedule
    #[error("Invalid campaign: {0}")]
    InvalidCampaign(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl PromocastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PromocastError::InvalidInput(_)
            | PromocastError::InvalidCampaign(_)
            | PromocastError::NotFound(_) => 3,
            PromocastError::Publish(e) if e.kind == PublishErrorKind::AuthExpired => 2,
            PromocastError::Config(_) => 2,
            PromocastError::Publish(_) => 1,
            PromocastError::Database(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// Normalized classification of every provider failure.
///
/// Adapters map provider-specific errors into exactly one kind; the dispatcher
/// decides between deferral and terminal failure from the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishErrorKind {
    AuthExpired,
    RateLimited,
    ContentRejected,
    TransientNetwork,
    UnsupportedMedia,
}

impl PublishErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthExpired => "auth_expired",
            Self::RateLimited => "rate_limited",
            Self::ContentRejected => "content_rejected",
            Self::TransientNetwork => "transient_network",
            Self::UnsupportedMedia => "unsupported_media",
        }
    }

    /// Whether a job hitting this error stays eligible for the next due-scan
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AuthExpired | Self::RateLimited | Self::TransientNetwork => true,
            Self::ContentRejected | Self::UnsupportedMedia => false,
        }
    }
}

impl std::fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PublishErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auth_expired" => Ok(Self::AuthExpired),
            "rate_limited" => Ok(Self::RateLimited),
            "content_rejected" => Ok(Self::ContentRejected),
            "transient_network" => Ok(Self::TransientNetwork),
            "unsupported_media" => Ok(Self::UnsupportedMedia),
            other => Err(format!("Unknown publish error kind: {}", other)),
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct PublishError {
    pub kind: PublishErrorKind,
    pub message: String,
    /// Rate-limit metadata the provider sent alongside the failure, if any
    pub rate_limit: Option<RateLimitInfo>,
}

impl PublishError {
    pub fn new(kind: PublishErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            rate_limit: None,
        }
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::AuthExpired, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::RateLimited, message)
    }

    pub fn content_rejected(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::ContentRejected, message)
    }

    pub fn transient_network(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::TransientNetwork, message)
    }

    pub fn unsupported_media(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::UnsupportedMedia, message)
    }

    pub fn with_rate_limit(mut self, info: Option<RateLimitInfo>) -> Self {
        self.rate_limit = info;
        self
    }
}
