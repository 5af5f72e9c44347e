//! Platform abstraction and implementations
//!
//! Every provider family implements [`Platform`]. Adapters classify each
//! provider failure into exactly one [`PublishErrorKind`], which is all the
//! dispatcher looks at when deciding between deferral and terminal failure.
//!
//! # Examples
//!
//! ```no_run
//! use libpromocast::platforms::{mock::MockPlatform, Platform, PlatformRegistry, PublishContent};
//! use libpromocast::types::{ContentType, Credential};
//!
//! # async fn example() -> Result<(), libpromocast::error::PublishError> {
//! let mut registry = PlatformRegistry::new();
//! registry.register(MockPlatform::success("x"));
//!
//! let platform = registry.get("x").expect("registered");
//! let credential = Credential::new("user-1", "x", "@books", "token");
//! let content = PublishContent::text("post-1", "book-1", ContentType::Sales, "New release!");
//!
//! let receipt = platform.publish(&credential, &content).await?;
//! println!("Published as {}", receipt.provider_post_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, PlatformConfig};
use crate::error::{PublishError, PublishErrorKind};
use crate::rate_limiter::DEFAULT_ENDPOINT;
use crate::types::{ContentType, Credential, RateLimitInfo};

pub mod mastodon;
pub mod webhook;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Rendered content handed to an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct PublishContent {
    /// Job id, forwarded for provider-side idempotency where supported
    pub post_id: String,
    pub item_id: String,
    pub content_type: ContentType,
    pub text: String,
    /// Publicly fetchable media URL, already resolved
    pub media_url: Option<String>,
}

impl PublishContent {
    pub fn text(
        post_id: impl Into<String>,
        item_id: impl Into<String>,
        content_type: ContentType,
        text: impl Into<String>,
    ) -> Self {
        Self {
            post_id: post_id.into(),
            item_id: item_id.into(),
            content_type,
            text: text.into(),
            media_url: None,
        }
    }

    pub fn with_media(mut self, media_url: Option<String>) -> Self {
        self.media_url = media_url;
        self
    }
}

/// Successful publish outcome
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReceipt {
    pub provider_post_id: String,
    /// Rate-limit metadata returned with the response, if the provider sent any
    pub rate_limit: Option<RateLimitInfo>,
}

/// Uniform publish contract implemented per provider family
#[async_trait]
pub trait Platform: Send + Sync {
    /// Platform name as used in campaign definitions (e.g. "mastodon", "x")
    fn name(&self) -> &str;

    /// Key under which this adapter's rate-limit windows are tracked
    fn rate_limit_endpoint(&self) -> &str {
        DEFAULT_ENDPOINT
    }

    /// Maximum post length in characters, if the provider enforces one
    fn character_limit(&self) -> Option<usize> {
        None
    }

    /// Local checks run before any network call
    ///
    /// # Errors
    ///
    /// Returns `content_rejected` for empty text or text over the character limit.
    fn validate_content(&self, content: &PublishContent) -> Result<(), PublishError> {
        if content.text.trim().is_empty() {
            return Err(PublishError::content_rejected("Content cannot be empty"));
        }

        if let Some(limit) = self.character_limit() {
            let char_count = content.text.chars().count();
            if char_count > limit {
                return Err(PublishError::content_rejected(format!(
                    "Content exceeds {}'s {} character limit (current: {} characters)",
                    self.name(),
                    limit,
                    char_count
                )));
            }
        }

        Ok(())
    }

    /// Publish `content` as the account behind `credential`
    ///
    /// # Errors
    ///
    /// Every failure is returned as a [`PublishError`] carrying exactly one
    /// [`PublishErrorKind`] and, when the provider sent it, rate-limit info.
    async fn publish(
        &self,
        credential: &Credential,
        content: &PublishContent,
    ) -> Result<PublishReceipt, PublishError>;
}

/// Adapters keyed by platform name
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    platforms: HashMap<String, Arc<dyn Platform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name, replacing any previous one
    pub fn register<P: Platform + 'static>(&mut self, platform: P) {
        self.register_arc(Arc::new(platform));
    }

    pub fn register_arc(&mut self, platform: Arc<dyn Platform>) {
        self.platforms.insert(platform.name().to_string(), platform);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Platform>> {
        self.platforms.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.platforms.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}

/// Build adapters for every `[platforms.<name>]` section of the configuration
pub fn create_platforms(config: &Config) -> crate::Result<PlatformRegistry> {
    let mut registry = PlatformRegistry::new();

    for (name, platform_config) in &config.platforms {
        match platform_config {
            PlatformConfig::Mastodon {
                instance,
                rate_limit_endpoint,
            } => {
                let platform = mastodon::MastodonPlatform::new(name, instance)
                    .with_rate_limit_endpoint(rate_limit_endpoint.clone());
                registry.register(platform);
            }
            PlatformConfig::Webhook {
                endpoint,
                rate_limit_endpoint,
            } => {
                let platform = webhook::WebhookPlatform::new(name, endpoint)?
                    .with_rate_limit_endpoint(rate_limit_endpoint.clone());
                registry.register(platform);
            }
        }
        tracing::debug!(platform = %name, "Registered platform adapter");
    }

    Ok(registry)
}

/// Classify an HTTP status code returned by a provider
///
/// Shared by the HTTP-based adapters so that every provider maps the same
/// status to the same kind.
pub fn classify_http_status(status: u16) -> PublishErrorKind {
    match status {
        401 | 403 => PublishErrorKind::AuthExpired,
        429 => PublishErrorKind::RateLimited,
        413 | 415 => PublishErrorKind::UnsupportedMedia,
        408 | 500..=599 => PublishErrorKind::TransientNetwork,
        _ => PublishErrorKind::ContentRejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockPlatform;
    use std::collections::HashMap;

    #[test]
    fn test_registry_lookup_by_name() {
        let mut registry = PlatformRegistry::new();
        assert!(registry.is_empty());

        registry.register(MockPlatform::success("x"));
        registry.register(MockPlatform::success("mastodon"));

        assert!(registry.get("x").is_some());
        assert!(registry.get("linkedin").is_none());
        assert_eq!(registry.names(), vec!["mastodon", "x"]);
    }

    #[test]
    fn test_default_validation() {
        let platform = MockPlatform::with_limit("x", 10);

        let ok = PublishContent::text("p", "i", ContentType::Content, "short");
        assert!(platform.validate_content(&ok).is_ok());

        let long = PublishContent::text("p", "i", ContentType::Content, "way too long for this");
        let err = platform.validate_content(&long).unwrap_err();
        assert_eq!(err.kind, PublishErrorKind::ContentRejected);
        assert!(err.message.contains("character limit"));

        let blank = PublishContent::text("p", "i", ContentType::Content, "   ");
        assert!(platform.validate_content(&blank).is_err());
    }

    #[test]
    fn test_classify_http_status() {
        assert_eq!(classify_http_status(401), PublishErrorKind::AuthExpired);
        assert_eq!(classify_http_status(403), PublishErrorKind::AuthExpired);
        assert_eq!(classify_http_status(429), PublishErrorKind::RateLimited);
        assert_eq!(classify_http_status(415), PublishErrorKind::UnsupportedMedia);
        assert_eq!(classify_http_status(422), PublishErrorKind::ContentRejected);
        assert_eq!(classify_http_status(400), PublishErrorKind::ContentRejected);
        assert_eq!(classify_http_status(503), PublishErrorKind::TransientNetwork);
        assert_eq!(classify_http_status(408), PublishErrorKind::TransientNetwork);
    }

    #[test]
    fn test_create_platforms_from_config() {
        let mut config = Config::default_config();
        let mut platforms = HashMap::new();
        platforms.insert(
            "mastodon".to_string(),
            PlatformConfig::Mastodon {
                instance: "mastodon.social".to_string(),
                rate_limit_endpoint: None,
            },
        );
        platforms.insert(
            "x".to_string(),
            PlatformConfig::Webhook {
                endpoint: "https://publisher.example/x".to_string(),
                rate_limit_endpoint: Some("tweets".to_string()),
            },
        );
        config.platforms = platforms;

        let registry = create_platforms(&config).unwrap();
        assert_eq!(registry.names(), vec!["mastodon", "x"]);
        assert_eq!(registry.get("x").unwrap().rate_limit_endpoint(), "tweets");
        assert_eq!(
            registry.get("mastodon").unwrap().rate_limit_endpoint(),
            DEFAULT_ENDPOINT
        );
    }
}
