//! Mock platform implementation for testing
//!
//! A scriptable adapter that can succeed, fail with any [`PublishErrorKind`]
//! per account, report rate-limit metadata and simulate latency. Clones share
//! their call counters, so a test can keep one handle while the registry owns
//! another.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{PublishError, PublishErrorKind};
use crate::platforms::{Platform, PublishContent, PublishReceipt};
use crate::rate_limiter::DEFAULT_ENDPOINT;
use crate::types::{Credential, RateLimitInfo};

/// What a publish call against one account returns
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    Success,
    Fail(PublishErrorKind, String),
}

/// Record of a publish call that reached the provider
#[derive(Debug, Clone, PartialEq)]
pub struct MockPublish {
    pub account_identifier: String,
    pub post_id: String,
    pub text: String,
    pub media_url: Option<String>,
}

/// Configuration for mock platform behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Platform name (e.g., "x", "mastodon")
    pub name: String,

    /// Outcome for accounts without a specific entry
    pub default_outcome: MockOutcome,

    /// Outcomes keyed by account identifier
    pub account_outcomes: HashMap<String, MockOutcome>,

    /// Rate-limit info attached to every response
    pub rate_limit: Option<RateLimitInfo>,

    pub rate_limit_endpoint: String,

    /// Delay before completing a publish call (simulates network latency)
    pub delay: Duration,

    /// Character limit for validation
    pub character_limit: Option<usize>,

    /// Number of times publish has been called
    pub publish_call_count: Arc<Mutex<usize>>,

    /// Successful publishes, in call order
    pub published: Arc<Mutex<Vec<MockPublish>>>,

    /// Calls currently in flight per account, and the highest value seen
    pub in_flight: Arc<Mutex<HashMap<String, (usize, usize)>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            default_outcome: MockOutcome::Success,
            account_outcomes: HashMap::new(),
            rate_limit: None,
            rate_limit_endpoint: DEFAULT_ENDPOINT.to_string(),
            delay: Duration::from_millis(0),
            character_limit: None,
            publish_call_count: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Mock platform for testing
#[derive(Debug, Clone)]
pub struct MockPlatform {
    config: MockConfig,
}

impl MockPlatform {
    /// Create a new mock platform with the given configuration
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Create a mock platform that always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Create a mock platform that fails every call with `kind`
    pub fn failure(name: &str, kind: PublishErrorKind, message: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            default_outcome: MockOutcome::Fail(kind, message.to_string()),
            ..Default::default()
        })
    }

    /// Create a mock platform with a delay
    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    /// Create a mock platform with a character limit
    pub fn with_limit(name: &str, limit: usize) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            character_limit: Some(limit),
            ..Default::default()
        })
    }

    /// Script the outcome for one account
    pub fn account_outcome(mut self, account_identifier: &str, outcome: MockOutcome) -> Self {
        self.config
            .account_outcomes
            .insert(account_identifier.to_string(), outcome);
        self
    }

    pub fn rate_limit(mut self, info: RateLimitInfo) -> Self {
        self.config.rate_limit = Some(info);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    /// Get the number of times publish was called
    pub fn publish_call_count(&self) -> usize {
        *lock(&self.config.publish_call_count)
    }

    /// Get all successful publishes
    pub fn published(&self) -> Vec<MockPublish> {
        lock(&self.config.published).clone()
    }

    /// Highest number of simultaneous calls observed against a single account
    pub fn max_concurrent_per_account(&self) -> usize {
        lock(&self.config.in_flight)
            .values()
            .map(|(_, max)| *max)
            .max()
            .unwrap_or(0)
    }

    fn enter(&self, account: &str) {
        let mut in_flight = lock(&self.config.in_flight);
        let entry = in_flight.entry(account.to_string()).or_insert((0, 0));
        entry.0 += 1;
        entry.1 = entry.1.max(entry.0);
    }

    fn leave(&self, account: &str) {
        if let Some(entry) = lock(&self.config.in_flight).get_mut(account) {
            entry.0 = entry.0.saturating_sub(1);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Platform for MockPlatform {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn rate_limit_endpoint(&self) -> &str {
        &self.config.rate_limit_endpoint
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }

    async fn publish(
        &self,
        credential: &Credential,
        content: &PublishContent,
    ) -> Result<PublishReceipt, PublishError> {
        *lock(&self.config.publish_call_count) += 1;

        let account = credential.account_identifier.as_str();
        self.enter(account);

        // Simulate delay
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        let outcome = self
            .config
            .account_outcomes
            .get(account)
            .unwrap_or(&self.config.default_outcome)
            .clone();

        let result = match outcome {
            MockOutcome::Success => self.validate_content(content).map(|()| {
                lock(&self.config.published).push(MockPublish {
                    account_identifier: account.to_string(),
                    post_id: content.post_id.clone(),
                    text: content.text.clone(),
                    media_url: content.media_url.clone(),
                });

                PublishReceipt {
                    provider_post_id: format!("{}:mock-{}", self.config.name, uuid::Uuid::new_v4()),
                    rate_limit: self.config.rate_limit,
                }
            }),
            MockOutcome::Fail(kind, message) => {
                Err(PublishError::new(kind, message).with_rate_limit(self.config.rate_limit))
            }
        };

        self.leave(account);
        result
    }
}
