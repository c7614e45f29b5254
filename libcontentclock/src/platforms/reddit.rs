//! Reddit submissions through `/api/submit`
//!
//! The subreddit comes from the post, or from the connection's
//! `default_subreddit` metadata. A post with a link (or, failing that, an
//! image) becomes a link submission; anything else is a self post.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PlatformError;
use crate::http::HttpRequest;
use crate::platforms::{error_for_status, unexpected, Platform, PublishContext, PublishRequest};

pub const MAX_TITLE_CHARS: usize = 300;

pub struct RedditPlatform;

/// Collect messages from Reddit's `json.errors` triples: `[code, message, field]`.
fn submit_errors(body: &Value) -> Vec<String> {
    body.pointer("/json/errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|error| match error {
                    Value::Array(parts) => parts
                        .iter()
                        .filter_map(Value::as_str)
                        .take(2)
                        .collect::<Vec<_>>()
                        .join(": "),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Platform for RedditPlatform {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn publish(
        &self,
        ctx: &PublishContext,
        request: &PublishRequest<'_>,
    ) -> Result<String, PlatformError> {
        let post = request.post;

        let subreddit = post
            .subreddit
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_start_matches("r/").to_string())
            .or_else(|| request.connection.metadata_str("default_subreddit"))
            .ok_or_else(|| {
                PlatformError::Validation(
                    "Reddit posts need a subreddit on the post or the connection".to_string(),
                )
            })?;

        let title = post.title.trim();
        if title.is_empty() {
            return Err(PlatformError::Validation("Reddit posts need a title".to_string()));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(PlatformError::Validation(format!(
                "Reddit titles are limited to {} characters",
                MAX_TITLE_CHARS
            )));
        }

        let link = post
            .link()
            .map(str::to_string)
            .or_else(|| request.images.first().map(|image| ctx.media.public_url(&post.id, image)));

        let mut fields = vec![
            ("sr".to_string(), subreddit),
            ("title".to_string(), title.to_string()),
            ("api_type".to_string(), "json".to_string()),
        ];
        match link {
            Some(url) => {
                fields.push(("kind".to_string(), "link".to_string()));
                fields.push(("url".to_string(), url));
                fields.push(("resubmit".to_string(), "true".to_string()));
            }
            None => {
                fields.push(("kind".to_string(), "self".to_string()));
                fields.push(("text".to_string(), post.content.clone()));
            }
        }

        let submit = HttpRequest::post(format!(
            "{}/api/submit",
            ctx.config.reddit.api_base.trim_end_matches('/')
        ))
        .header(
            "Authorization",
            format!("bearer {}", request.connection.access_token()),
        )
        .header("User-Agent", ctx.config.reddit.user_agent.as_str())
        .form(fields);

        let response = ctx.http.execute(submit).await?;
        if !response.is_success() {
            let message = response
                .json()
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string));
            return Err(error_for_status(self.name(), &response, message));
        }

        let body = response
            .json()
            .map_err(|_| unexpected(self.name(), "submit", &response))?;

        let errors = submit_errors(&body);
        if !errors.is_empty() {
            return Err(PlatformError::Posting(errors.join("; ")));
        }

        body.pointer("/json/data/name")
            .or_else(|| body.pointer("/json/data/id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| unexpected(self.name(), "submit", &response))
    }
}
