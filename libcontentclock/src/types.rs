//! Core types for Content Clock

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PlatformError;

/// Delivery state of a scheduled post.
///
/// Only `Scheduled -> Sending -> {Published, Failed}` is ever written by the
/// dispatcher and the outcome recorder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Scheduled,
    Sending,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Sending => "sending",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    /// Whether the post has reached a state the dispatcher never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Published | PostStatus::Failed)
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(PostStatus::Scheduled),
            "sending" => Ok(PostStatus::Sending),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            other => Err(format!("unknown post status '{}'", other)),
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of content awaiting delivery to one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub title: String,
    pub content: String,
    pub link: Option<String>,
    /// Image references as stored: a JSON array of file names.
    pub images: String,
    pub connection_id: String,
    /// Target community for Reddit; ignored by every other platform.
    pub subreddit: Option<String>,
    /// Unix timestamp at which the post becomes due.
    pub publish_at: i64,
    pub status: PostStatus,
    pub published_post_id: Option<String>,
    pub logs: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl ScheduledPost {
    pub fn new(
        content: impl Into<String>,
        connection_id: impl Into<String>,
        publish_at: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            title: String::new(),
            content: content.into(),
            link: None,
            images: "[]".to_string(),
            connection_id: connection_id.into(),
            subreddit: None,
            publish_at,
            status: PostStatus::Scheduled,
            published_post_id: None,
            logs: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_subreddit(mut self, subreddit: impl Into<String>) -> Self {
        self.subreddit = Some(subreddit.into());
        self
    }

    pub fn with_images(mut self, images: &[&str]) -> Self {
        self.images = serde_json::to_string(images).unwrap_or_else(|_| "[]".to_string());
        self
    }

    /// Decode the stored image list.
    ///
    /// An empty column means no images. Anything that is not a JSON array of
    /// non-empty strings is rejected.
    pub fn image_refs(&self) -> std::result::Result<Vec<String>, PlatformError> {
        let raw = self.images.trim();
        if raw.is_empty() || raw == "null" {
            return Ok(Vec::new());
        }

        let refs: Vec<String> = serde_json::from_str(raw).map_err(|e| {
            PlatformError::Validation(format!("image list is not a JSON array of strings: {}", e))
        })?;

        if refs.iter().any(|r| r.trim().is_empty()) {
            return Err(PlatformError::Validation(
                "image list contains an empty reference".to_string(),
            ));
        }

        Ok(refs)
    }

    /// The link, if one was given and is not blank.
    pub fn link(&self) -> Option<&str> {
        self.link.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// Credentials and identity for one linked platform account.
///
/// The access token is opaque here; each adapter decides how to read it.
#[derive(Debug)]
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub username: String,
    /// Adapter tag, e.g. "facebook" or "threads".
    pub platform: String,
    /// Platform-side id the adapter addresses (page, user, board, channel).
    pub account_id: String,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Free-form JSON object.
    pub metadata: Option<String>,
    pub profile_image: Option<String>,
    pub timezone: Option<String>,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

impl Connection {
    pub fn new(
        platform: impl Into<String>,
        account_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: String::new(),
            name: String::new(),
            username: String::new(),
            platform: platform.into(),
            account_id: account_id.into(),
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            metadata: None,
            profile_image: None,
            timezone: None,
            created_at: chrono::Utc::now().timestamp(),
            deleted_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata.to_string());
        self
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    /// Look up a string field in the metadata blob.
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        let raw = self.metadata.as_deref()?;
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    }
}

/// Result of one adapter call, as handed to the outcome recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Published { published_id: String },
    Failed { error: PlatformError },
}

impl DeliveryOutcome {
    /// Build an outcome from an adapter result.
    ///
    /// A blank published id cannot satisfy "published iff id present", so it
    /// is downgraded to a failure.
    pub fn from_result(result: std::result::Result<String, PlatformError>) -> Self {
        match result {
            Ok(id) if !id.trim().is_empty() => DeliveryOutcome::Published { published_id: id },
            Ok(_) => DeliveryOutcome::Failed {
                error: PlatformError::UnexpectedResponse(
                    "platform returned an empty post id".to_string(),
                ),
            },
            Err(error) => DeliveryOutcome::Failed { error },
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, DeliveryOutcome::Published { .. })
    }
}

/// Supported image MIME types for uploads
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageMimeType {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageMimeType {
    /// Detect MIME type from file extension (with or without the leading dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }
}

impl std::fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
