//! Pinterest pin creation (API v5)
//!
//! A pin is exactly one image, fetched by Pinterest from its public URL, on
//! the board named by the connection's account id.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::PlatformError;
use crate::http::HttpRequest;
use crate::platforms::{
    error_for_status, id_field, unexpected, Platform, PublishContext, PublishRequest,
};

/// The API rejects longer titles.
const MAX_TITLE_CHARS: usize = 100;

pub struct PinterestPlatform;

#[async_trait]
impl Platform for PinterestPlatform {
    fn name(&self) -> &str {
        "pinterest"
    }

    async fn publish(
        &self,
        ctx: &PublishContext,
        request: &PublishRequest<'_>,
    ) -> Result<String, PlatformError> {
        let image = match request.images {
            [image] => image,
            [] => {
                return Err(PlatformError::Validation(
                    "Pinterest pins require an image".to_string(),
                ))
            }
            many => {
                return Err(PlatformError::Validation(format!(
                    "Pinterest pins take exactly one image, got {}",
                    many.len()
                )))
            }
        };

        let post = request.post;
        if post.title.chars().count() > MAX_TITLE_CHARS {
            return Err(PlatformError::Validation(format!(
                "Pinterest titles are limited to {} characters",
                MAX_TITLE_CHARS
            )));
        }

        let mut body = json!({
            "board_id": request.connection.account_id,
            "description": post.content,
            "media_source": {
                "source_type": "image_url",
                "url": ctx.media.public_url(&post.id, image),
            }
        });
        if !post.title.trim().is_empty() {
            body["title"] = json!(post.title);
        }
        if let Some(link) = post.link() {
            body["link"] = json!(link);
        }

        let create = HttpRequest::post(format!(
            "{}/pins",
            ctx.config.pinterest.api_base.trim_end_matches('/')
        ))
        .bearer(request.connection.access_token())
        .json(body);

        let response = ctx.http.execute(create).await?;
        let value = response.json().ok();

        if !response.is_success() {
            let message = value
                .as_ref()
                .and_then(|v| v.get("message").and_then(Value::as_str))
                .map(str::to_string);
            return Err(error_for_status(self.name(), &response, message));
        }

        value
            .as_ref()
            .and_then(|v| id_field(v, "id"))
            .ok_or_else(|| unexpected(self.name(), "pin", &response))
    }
}
