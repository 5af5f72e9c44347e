//! Generic JSON-over-HTTP publish adapter
//!
//! Posts a JSON document to a provider endpoint with the account's bearer
//! token. Providers fronted by this adapter answer with `{"id": "..."}` on
//! success and report limits through `X-RateLimit-Limit`,
//! `X-RateLimit-Remaining` and `X-RateLimit-Reset` (Unix seconds).

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, PublishError, PublishErrorKind};
use crate::platforms::{classify_http_status, Platform, PublishContent, PublishReceipt};
use crate::rate_limiter::DEFAULT_ENDPOINT;
use crate::types::{ContentType, Credential, RateLimitInfo};

const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    account: &'a str,
    post_id: &'a str,
    item_id: &'a str,
    content_type: ContentType,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    id: String,
}

pub struct WebhookPlatform {
    name: String,
    endpoint: String,
    rate_limit_endpoint: Option<String>,
    http: Client,
}

impl WebhookPlatform {
    pub fn new(name: &str, endpoint: &str) -> crate::Result<Self> {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: format!("platforms.{}.endpoint", name),
                reason: "must be an http(s) URL".to_string(),
            }
            .into());
        }

        // Dispatch applies its own per-attempt bound; this only caps a stuck connect.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: format!("platforms.{}", name),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            rate_limit_endpoint: None,
            http,
        })
    }

    pub fn with_rate_limit_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.rate_limit_endpoint = endpoint;
        self
    }
}

#[async_trait]
impl Platform for WebhookPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limit_endpoint(&self) -> &str {
        self.rate_limit_endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    async fn publish(
        &self,
        credential: &Credential,
        content: &PublishContent,
    ) -> Result<PublishReceipt, PublishError> {
        self.validate_content(content)?;

        let body = PublishRequest {
            account: &credential.account_identifier,
            post_id: &content.post_id,
            item_id: &content.item_id,
            content_type: content.content_type,
            text: &content.text,
            media_url: content.media_url.as_deref(),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(credential.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                PublishError::transient_network(format!("{} request failed: {}", self.name, e))
            })?;

        let status = resp.status();
        let rate_limit = parse_rate_limit_headers(resp.headers());

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let kind = classify_http_status(status.as_u16());
            return Err(PublishError::new(
                kind,
                format!("{} returned HTTP {}: {}", self.name, status.as_u16(), text.trim()),
            )
            .with_rate_limit(rate_limit));
        }

        let parsed: PublishResponse = resp.json().await.map_err(|e| {
            // The post may exist; a retry could duplicate it.
            PublishError::new(
                PublishErrorKind::ContentRejected,
                format!("{} returned an unreadable response: {}", self.name, e),
            )
            .with_rate_limit(rate_limit)
        })?;

        Ok(PublishReceipt {
            provider_post_id: parsed.id,
            rate_limit,
        })
    }
}

/// Read rate-limit headers; all three must be present and numeric
pub fn parse_rate_limit_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let number = |name: &str| -> Option<i64> {
        headers
            .get(name)?
            .to_str()
            .ok()?
            .trim()
            .parse::<i64>()
            .ok()
    };

    let limit_max = u32::try_from(number(HEADER_LIMIT)?).ok()?;
    let remaining = u32::try_from(number(HEADER_REMAINING)?).ok()?;
    let reset_at = number(HEADER_RESET)?;

    Some(RateLimitInfo {
        limit_max,
        remaining: remaining.min(limit_max),
        reset_at,
    })
}
