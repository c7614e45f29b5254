//! Configuration management for Content Clock

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/contentclock/posts.db".to_string(),
        }
    }
}

/// Timing of the dispatch loop and of each adapter call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub poll_interval_secs: u64,
    /// Delay before the first tick, so the rest of the process settles.
    pub startup_delay_secs: u64,
    /// Attempts per post, counting the first. Only transport failures retry.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Deadline applied to every outbound HTTP call.
    pub request_timeout_secs: u64,
    /// Deadline for one whole adapter attempt; expiry counts as a network error.
    pub attempt_timeout_secs: u64,
    /// Posts left in `sending` longer than this are failed by the sweep.
    pub stuck_after_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            startup_delay_secs: 5,
            max_attempts: 3,
            retry_base_delay_ms: 1_000,
            request_timeout_secs: 30,
            attempt_timeout_secs: 120,
            stuck_after_secs: 900,
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_after_secs)
    }

    /// Longest a single post can stay in `sending`: every attempt running to
    /// its deadline plus the backoff sleeps between them.
    pub fn max_delivery_time(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let backoff = (1..attempts).fold(Duration::ZERO, |total, attempt| {
            total.saturating_add(
                self.retry_base_delay()
                    .saturating_mul(2u32.saturating_pow(attempt - 1)),
            )
        });
        self.attempt_timeout()
            .saturating_mul(attempts)
            .saturating_add(backoff)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Public origin serving `/api/files/posts/{post}/{file}`.
    pub public_host: String,
    /// Where downloads for multipart uploads are staged.
    pub scratch_dir: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            public_host: "http://localhost:8090".to_string(),
            scratch_dir: std::env::temp_dir()
                .join("contentclock-uploads")
                .to_string_lossy()
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub facebook: GraphConfig,
    pub instagram: GraphConfig,
    pub threads: ThreadsConfig,
    pub linkedin: LinkedinConfig,
    pub twitter: TwitterConfig,
    pub pinterest: PinterestConfig,
    pub mastodon: MastodonConfig,
    pub discord: DiscordConfig,
    pub reddit: RedditConfig,
}

/// Facebook and Instagram both talk to the Graph API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub api_base: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            api_base: "https://graph.facebook.com/v19.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadsConfig {
    pub api_base: String,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            api_base: "https://graph.threads.net/v1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkedinConfig {
    pub api_base: String,
    /// How many times to check the uploaded asset before creating the post.
    pub asset_poll_attempts: u32,
    pub asset_poll_interval_ms: u64,
}

impl Default for LinkedinConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.linkedin.com/v2".to_string(),
            asset_poll_attempts: 5,
            asset_poll_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitterConfig {
    pub api_base: String,
    pub upload_base: String,
    pub consumer_key: String,
    pub consumer_secret: String,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.twitter.com/2".to_string(),
            upload_base: "https://upload.twitter.com/1.1".to_string(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinterestConfig {
    pub api_base: String,
}

impl Default for PinterestConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.pinterest.com/v5".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MastodonConfig {
    /// Instance used when a connection does not name its own.
    pub instance_url: String,
}

impl Default for MastodonConfig {
    fn default() -> Self {
        Self {
            instance_url: "https://mastodon.social".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub api_base: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: "https://discord.com/api/v10".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub api_base: String,
    /// Reddit rejects requests without a descriptive User-Agent.
    pub user_agent: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            api_base: "https://oauth.reddit.com".to_string(),
            user_agent: format!("contentclock/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Load configuration from the default location, then apply env overrides
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = Self::load_from_path(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Overlay the environment variables deployments commonly set.
    pub fn apply_env_overrides(&mut self) {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(host) = read("CONTENTCLOCK_API_HOST") {
            self.media.public_host = host;
        }
        if let Some(path) = read("CONTENTCLOCK_DATABASE") {
            self.database.path = path;
        }
        if let Some(key) = read("CONTENTCLOCK_TWITTER_KEY") {
            self.platforms.twitter.consumer_key = key;
        }
        if let Some(secret) = read("CONTENTCLOCK_TWITTER_SECRET") {
            self.platforms.twitter.consumer_secret = secret;
        }
        if let Some(instance) = read("CONTENTCLOCK_MASTODON_BASE_URL") {
            self.platforms.mastodon.instance_url = instance;
        }
    }

    /// Reject settings the dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.poll_interval_secs == 0 {
            return Err(invalid(
                "dispatch.poll_interval_secs",
                "must be greater than zero",
            ));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(invalid("dispatch.max_attempts", "must be at least 1"));
        }
        if self.dispatch.request_timeout_secs == 0 {
            return Err(invalid(
                "dispatch.request_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.dispatch.attempt_timeout_secs < self.dispatch.request_timeout_secs {
            return Err(invalid(
                "dispatch.attempt_timeout_secs",
                "must be at least dispatch.request_timeout_secs",
            ));
        }
        if self.dispatch.stuck_after() <= self.dispatch.max_delivery_time() {
            return Err(invalid(
                "dispatch.stuck_after_secs",
                &format!(
                    "must exceed the longest delivery ({}s for {} attempts)",
                    self.dispatch.max_delivery_time().as_secs_f64(),
                    self.dispatch.max_attempts
                ),
            ));
        }
        if self.media.public_host.trim().is_empty() {
            return Err(ConfigError::MissingField("media.public_host".to_string()).into());
        }
        if !(self.media.public_host.starts_with("http://")
            || self.media.public_host.starts_with("https://"))
        {
            return Err(invalid(
                "media.public_host",
                "must start with http:// or https://",
            ));
        }
        Ok(())
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> String {
        shellexpand::tilde(&self.database.path).to_string()
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::ClockError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CONTENTCLOCK_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("contentclock").join("config.toml"))
}
