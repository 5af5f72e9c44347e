//! Mastodon platform adapter
//!
//! Publishes statuses to Mastodon-compatible instances through megalodon.
//! Each publish builds a client for the calling credential, since every
//! connected account brings its own token.

use async_trait::async_trait;
use megalodon::{Megalodon, SNS};
use secrecy::ExposeSecret;

use crate::error::{PublishError, PublishErrorKind};
use crate::platforms::{classify_http_status, Platform, PublishContent, PublishReceipt};
use crate::rate_limiter::DEFAULT_ENDPOINT;
use crate::types::Credential;

/// Default status length on stock Mastodon instances
pub const DEFAULT_CHARACTER_LIMIT: usize = 500;

pub struct MastodonPlatform {
    name: String,
    /// Normalized instance URL (e.g., "https://mastodon.social")
    instance_url: String,
    rate_limit_endpoint: Option<String>,
    character_limit: usize,
}

impl MastodonPlatform {
    /// Create an adapter registered under `name` for `instance`
    ///
    /// A bare host such as "mastodon.social" is given an `https://` prefix.
    pub fn new(name: &str, instance: &str) -> Self {
        Self {
            name: name.to_string(),
            instance_url: normalize_instance_url(instance),
            rate_limit_endpoint: None,
            character_limit: DEFAULT_CHARACTER_LIMIT,
        }
    }

    pub fn with_rate_limit_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.rate_limit_endpoint = endpoint;
        self
    }

    pub fn with_character_limit(mut self, limit: usize) -> Self {
        self.character_limit = limit;
        self
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    fn client(&self, credential: &Credential) -> Result<Box<dyn Megalodon + Send + Sync>, PublishError> {
        megalodon::generator(
            SNS::Mastodon,
            self.instance_url.clone(),
            Some(credential.access_token.expose_secret().to_string()),
            None,
        )
        .map_err(|e| {
            PublishError::transient_network(format!("Failed to create Mastodon client: {:?}", e))
        })
    }
}

#[async_trait]
impl Platform for MastodonPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limit_endpoint(&self) -> &str {
        self.rate_limit_endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    fn character_limit(&self) -> Option<usize> {
        Some(self.character_limit)
    }

    async fn publish(
        &self,
        credential: &Credential,
        content: &PublishContent,
    ) -> Result<PublishReceipt, PublishError> {
        let status = status_text(content);
        self.validate_content(&PublishContent {
            text: status.clone(),
            ..content.clone()
        })?;

        let client = self.client(credential)?;
        let response = client
            .post_status(status, None)
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let provider_post_id = match response.json {
            megalodon::megalodon::PostStatusOutput::Status(status) => status.id,
            megalodon::megalodon::PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };

        Ok(PublishReceipt {
            provider_post_id,
            rate_limit: None,
        })
    }
}

/// Media is linked rather than uploaded; the instance renders a preview card
fn status_text(content: &PublishContent) -> String {
    match &content.media_url {
        Some(url) if !content.text.contains(url.as_str()) => {
            format!("{}\n\n{}", content.text.trim_end(), url)
        }
        _ => content.text.clone(),
    }
}

fn normalize_instance_url(instance: &str) -> String {
    let instance = instance.trim().trim_end_matches('/');
    if instance.starts_with("http://") || instance.starts_with("https://") {
        instance.to_string()
    } else {
        format!("https://{}", instance)
    }
}

/// Map megalodon errors to a classified `PublishError`
///
/// megalodon does not expose structured status codes, so the status is
/// recovered from the error text when present and keywords decide otherwise.
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PublishError {
    let error_str = error.to_string();
    let kind = classify_error_message(&error_str);
    PublishError::new(kind, format!("Mastodon {} failed: {}", context, error_str))
}

fn classify_error_message(error_str: &str) -> PublishErrorKind {
    if let Some(status) = extract_http_status(error_str) {
        return classify_http_status(status);
    }

    let lower = error_str.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if mentions(&["unauthorized", "forbidden", "authentication", "token"]) {
        PublishErrorKind::AuthExpired
    } else if mentions(&["rate limit", "too many requests"]) {
        PublishErrorKind::RateLimited
    } else if mentions(&["validation", "unprocessable"]) {
        PublishErrorKind::ContentRejected
    } else if mentions(&["media", "unsupported"]) {
        PublishErrorKind::UnsupportedMedia
    } else {
        PublishErrorKind::TransientNetwork
    }
}

/// Extract an HTTP status code from an error message
///
/// Only explicit markers count: "HTTP 401", "status 403", "code: 429" and
/// "status_code: 422". Bare numbers are ignored since they are as likely to
/// be a port or a byte count.
fn extract_http_status(error_str: &str) -> Option<u16> {
    ["HTTP ", "status ", "code: ", "status_code: "]
        .iter()
        .filter_map(|prefix| {
            let pos = error_str.find(prefix)?;
            let rest = &error_str[pos + prefix.len()..];
            let digits = rest.get(0..3)?;
            let terminated = rest[3..].chars().next().map_or(true, |c| !c.is_ascii_digit());
            digits
                .parse::<u16>()
                .ok()
                .filter(|code| terminated && (100..=599).contains(code))
        })
        .next()
}
