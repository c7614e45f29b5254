//! Mock platform implementation for testing
//!
//! A configurable adapter that can succeed, fail with a chosen error, fail a
//! set number of times before succeeding, or stall. Dispatcher tests use it
//! to exercise retry, timeout and recording paths without HTTP.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::PlatformError;
use crate::platforms::{Platform, PublishContext, PublishRequest};

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub name: String,

    /// Errors returned by successive calls before the first success
    pub failures: VecDeque<PlatformError>,

    /// Error returned by every call once `failures` is drained; `None` means success
    pub persistent_error: Option<PlatformError>,

    /// Id returned on success; defaults to `{name}-{post id}`
    pub published_id: Option<String>,

    /// Delay before completing (simulates a slow platform)
    pub delay: Duration,

    pub publish_call_count: Arc<Mutex<usize>>,

    /// Post ids in the order they were published
    pub published_posts: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            failures: VecDeque::new(),
            persistent_error: None,
            published_id: None,
            delay: Duration::from_millis(0),
            publish_call_count: Arc::new(Mutex::new(0)),
            published_posts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

pub struct MockPlatform {
    config: MockConfig,
    failures: Mutex<VecDeque<PlatformError>>,
}

impl MockPlatform {
    pub fn new(config: MockConfig) -> Self {
        let failures = Mutex::new(config.failures.clone());
        Self { config, failures }
    }

    /// A platform that always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// A platform that always fails with `error`
    pub fn failure(name: &str, error: PlatformError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            persistent_error: Some(error),
            ..Default::default()
        })
    }

    /// Fails with each of `errors` in turn, then succeeds
    pub fn flaky(name: &str, errors: Vec<PlatformError>) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            failures: errors.into(),
            ..Default::default()
        })
    }

    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    pub fn publish_call_count(&self) -> usize {
        *self
            .config
            .publish_call_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn published_posts(&self) -> Vec<String> {
        self.config
            .published_posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn publish(
        &self,
        _ctx: &PublishContext,
        request: &PublishRequest<'_>,
    ) -> Result<String, PlatformError> {
        *self
            .config
            .publish_call_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = scripted.or_else(|| self.config.persistent_error.clone()) {
            return Err(error);
        }

        self.config
            .published_posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.post.id.clone());

        Ok(self
            .config
            .published_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.config.name, request.post.id)))
    }
}
