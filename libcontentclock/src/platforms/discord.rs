//! Discord channel messages through a bot token
//!
//! The token is checked against `/users/@me` before posting, so a revoked
//! bot surfaces as an authentication failure rather than a missing channel.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::PlatformError;
use crate::http::{HttpRequest, HttpResponse};
use crate::platforms::{
    error_for_status, id_field, unexpected, Platform, PublishContext, PublishRequest,
};

/// Discord rejects message content longer than this.
pub const MAX_CONTENT_CHARS: usize = 2000;

pub struct DiscordPlatform;

impl DiscordPlatform {
    /// Discord error bodies carry `{"message": .., "code": ..}`.
    fn failure(&self, response: &HttpResponse) -> PlatformError {
        let message = response
            .json()
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string));
        error_for_status(self.name(), response, message)
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    fn name(&self) -> &str {
        "discord"
    }

    async fn publish(
        &self,
        ctx: &PublishContext,
        request: &PublishRequest<'_>,
    ) -> Result<String, PlatformError> {
        let post = request.post;
        if post.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(PlatformError::Validation(format!(
                "Discord messages are limited to {} characters",
                MAX_CONTENT_CHARS
            )));
        }

        let base = ctx.config.discord.api_base.trim_end_matches('/');
        let authorization = format!("Bot {}", request.connection.access_token());

        let whoami = HttpRequest::get(format!("{}/users/@me", base))
            .header("Authorization", authorization.as_str());
        let response = ctx.http.execute(whoami).await?;
        if !response.is_success() {
            return Err(self.failure(&response));
        }

        let mut message = json!({ "content": post.content });
        if request.images.len() > 1 {
            tracing::debug!(
                post_id = %post.id,
                images = request.images.len(),
                "Discord embeds only the first image"
            );
        }
        if let Some(image) = request.images.first() {
            let url = ctx.media.public_url(&post.id, image);
            message["embeds"] = json!([{ "image": { "url": url } }]);
        }

        let send = HttpRequest::post(format!(
            "{}/channels/{}/messages",
            base, request.connection.account_id
        ))
        .header("Authorization", authorization.as_str())
        .json(message);

        let response = ctx.http.execute(send).await?;
        if !response.is_success() {
            return Err(self.failure(&response));
        }

        response
            .json()
            .ok()
            .and_then(|v| id_field(&v, "id"))
            .ok_or_else(|| unexpected(self.name(), "message", &response))
    }
}
