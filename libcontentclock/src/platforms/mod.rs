//! Platform abstraction and implementations
//!
//! Each adapter turns one scheduled post into the request sequence its
//! platform expects and returns the platform's id for the created post.
//! Adapters never touch the store: the dispatcher hands every result to the
//! outcome recorder, so no exit path can leave a post in `sending`.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libcontentclock::config::Config;
//! use libcontentclock::http::ReqwestClient;
//! use libcontentclock::media::MediaResolver;
//! use libcontentclock::platforms::{PlatformRegistry, PublishContext, PublishRequest};
//! use libcontentclock::types::{Connection, ScheduledPost};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let http = Arc::new(ReqwestClient::new(config.dispatch.request_timeout())?);
//! let media = MediaResolver::from_config(&config.media);
//! let ctx = PublishContext::new(http, media, config.platforms);
//!
//! let registry = PlatformRegistry::with_defaults();
//! let connection = Connection::new("discord", "123456789", "bot-token");
//! let post = ScheduledPost::new("Release day!", &connection.id, 0);
//!
//! if let Some(platform) = registry.get(&connection.platform) {
//!     let request = PublishRequest { post: &post, images: &[], connection: &connection };
//!     let id = platform.publish(&ctx, &request).await?;
//!     println!("Posted: {}", id);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PlatformsConfig;
use crate::error::PlatformError;
use crate::http::{HttpClient, HttpResponse};
use crate::media::MediaResolver;
use crate::types::{Connection, ScheduledPost};

pub mod discord;
pub mod facebook;
pub mod instagram;
pub mod linkedin;
pub mod mastodon;
pub mod pinterest;
pub mod reddit;
pub mod threads;
pub mod twitter;

// Available in all builds so integration tests can register it
pub mod mock;

/// Collaborators every adapter call needs.
#[derive(Clone)]
pub struct PublishContext {
    pub http: Arc<dyn HttpClient>,
    pub media: MediaResolver,
    pub config: Arc<PlatformsConfig>,
}

impl PublishContext {
    pub fn new(http: Arc<dyn HttpClient>, media: MediaResolver, config: PlatformsConfig) -> Self {
        Self {
            http,
            media,
            config: Arc::new(config),
        }
    }
}

/// One delivery: the post, its decoded image references and the target account.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub post: &'a ScheduledPost,
    /// Stored image references in posting order.
    pub images: &'a [String],
    pub connection: &'a Connection,
}

/// Platform trait for publishing a scheduled post
#[async_trait]
pub trait Platform: Send + Sync {
    /// Tag stored in `connections.platform` that routes posts here
    fn name(&self) -> &str;

    /// Publish the post and return the platform-side post id
    ///
    /// # Errors
    ///
    /// - `Validation` for local input the platform would reject (media
    ///   count, missing credentials or addressing); no request is sent
    /// - `Network` for transport failures
    /// - `Posting` with the platform's own message when it reports an error
    /// - `UnexpectedResponse` when the reply carries neither an id nor an
    ///   error envelope
    /// - `Authentication` for HTTP 401, or a 403 without a platform message
    /// - `RateLimit` for HTTP 429
    async fn publish(
        &self,
        ctx: &PublishContext,
        request: &PublishRequest<'_>,
    ) -> Result<String, PlatformError>;
}

/// Name → adapter routing table.
#[derive(Default)]
pub struct PlatformRegistry {
    platforms: HashMap<String, Arc<dyn Platform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(facebook::FacebookPlatform));
        registry.register(Arc::new(instagram::InstagramPlatform));
        registry.register(Arc::new(linkedin::LinkedinPlatform));
        registry.register(Arc::new(twitter::TwitterPlatform));
        registry.register(Arc::new(pinterest::PinterestPlatform));
        registry.register(Arc::new(mastodon::MastodonPlatform));
        registry.register(Arc::new(threads::ThreadsPlatform));
        registry.register(Arc::new(reddit::RedditPlatform));
        registry.register(Arc::new(discord::DiscordPlatform));
        registry
    }

    /// Add or replace the adapter for `platform.name()`
    pub fn register(&mut self, platform: Arc<dyn Platform>) {
        self.platforms
            .insert(platform.name().to_ascii_lowercase(), platform);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Platform>> {
        self.platforms.get(&name.trim().to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.platforms.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Map a non-2xx response to an error, preferring the platform's message.
///
/// A 403 that carries a platform message is a content rejection (Twitter
/// answers duplicate tweets this way) and keeps the message verbatim.
pub(crate) fn error_for_status(
    platform: &str,
    response: &HttpResponse,
    message: Option<String>,
) -> PlatformError {
    let fallback = || format!("HTTP {}: {}", response.status, response.snippet());

    match (response.status, message) {
        (401, message) | (403, message @ None) => PlatformError::Authentication(format!(
            "{}: {}",
            platform,
            message.unwrap_or_else(fallback)
        )),
        (429, message) => PlatformError::RateLimit(format!(
            "{}: {}",
            platform,
            message.unwrap_or_else(fallback)
        )),
        (_, message) => PlatformError::Posting(message.unwrap_or_else(fallback)),
    }
}

/// A reply with neither the expected field nor an error envelope.
///
/// The raw body is logged for diagnosis; the recorded message stays generic.
pub(crate) fn unexpected(platform: &str, step: &str, response: &HttpResponse) -> PlatformError {
    tracing::warn!(
        platform = %platform,
        step = %step,
        status = response.status,
        body = %response.snippet(),
        "Unexpected response shape"
    );
    PlatformError::UnexpectedResponse(format!("{} {} response had no id", platform, step))
}

/// Read an id that platforms send either as a string or as a number.
pub(crate) fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a Graph API style reply (Facebook, Instagram, Threads).
///
/// An `error` object means failure with `error.message`, whatever the HTTP
/// status; otherwise the reply must carry an `id`.
pub(crate) fn graph_id(
    platform: &str,
    step: &str,
    response: &HttpResponse,
) -> Result<String, PlatformError> {
    let body = match response.json() {
        Ok(body) => body,
        Err(_) if !response.is_success() => {
            return Err(error_for_status(platform, response, None))
        }
        Err(e) => return Err(e),
    };

    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(match response.status {
            429 => PlatformError::RateLimit(format!("{}: {}", platform, message)),
            _ => PlatformError::Posting(message),
        });
    }

    id_field(&body, "id").ok_or_else(|| unexpected(platform, step, response))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::mock::MockHttpClient;

    pub const PUBLIC_HOST: &str = "https://files.test";

    /// Context backed by a mock client, with default API bases and no LinkedIn poll delay.
    pub fn context(http: Arc<MockHttpClient>) -> PublishContext {
        let mut config = PlatformsConfig::default();
        config.linkedin.asset_poll_interval_ms = 0;
        config.twitter.consumer_key = "consumer-key".to_string();
        config.twitter.consumer_secret = "consumer-secret".to_string();
        PublishContext::new(
            http,
            MediaResolver::new(PUBLIC_HOST, std::env::temp_dir().join("contentclock-tests")),
            config,
        )
    }

    pub fn images(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }
}
