//! Mastodon publishing over the REST API
//!
//! The instance comes from the connection's `instance` metadata, falling
//! back to the configured default. Images are uploaded to `/api/v1/media`
//! and referenced by id from the status.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::PlatformError;
use crate::http::{HttpRequest, HttpResponse, MultipartPart};
use crate::platforms::{
    error_for_status, id_field, unexpected, Platform, PublishContext, PublishRequest,
};

pub const MAX_IMAGES: usize = 4;

pub struct MastodonPlatform;

impl MastodonPlatform {
    fn failure(&self, response: &HttpResponse) -> PlatformError {
        let message = response
            .json()
            .ok()
            .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string));
        error_for_status(self.name(), response, message)
    }
}

#[async_trait]
impl Platform for MastodonPlatform {
    fn name(&self) -> &str {
        "mastodon"
    }

    async fn publish(
        &self,
        ctx: &PublishContext,
        request: &PublishRequest<'_>,
    ) -> Result<String, PlatformError> {
        if request.images.len() > MAX_IMAGES {
            return Err(PlatformError::Validation(format!(
                "Mastodon statuses allow at most {} images, got {}",
                MAX_IMAGES,
                request.images.len()
            )));
        }

        let instance = request
            .connection
            .metadata_str("instance")
            .unwrap_or_else(|| ctx.config.mastodon.instance_url.clone());
        let instance = instance.trim_end_matches('/');
        let token = request.connection.access_token();
        let post = request.post;

        let mut media_ids = Vec::with_capacity(request.images.len());
        for image in request.images {
            let staged = ctx.media.fetch(ctx.http.as_ref(), &post.id, image).await?;
            let mut parts = vec![MultipartPart::file(
                "file",
                staged.file_name(),
                staged.content_type(),
                staged.read().await?,
            )];
            if !post.title.trim().is_empty() {
                parts.push(MultipartPart::text("description", post.title.clone()));
            }

            let upload = HttpRequest::post(format!("{}/api/v1/media", instance))
                .bearer(token)
                .multipart(parts);
            let response = ctx.http.execute(upload).await?;
            if !response.is_success() {
                return Err(self.failure(&response));
            }
            let body = response
                .json()
                .map_err(|_| unexpected(self.name(), "media", &response))?;
            media_ids.push(
                id_field(&body, "id").ok_or_else(|| unexpected(self.name(), "media", &response))?,
            );
        }

        let mut status = post.content.clone();
        if let Some(link) = post.link() {
            if !status.contains(link) {
                status = format!("{}\n\n{}", status, link);
            }
        }

        let create = HttpRequest::post(format!("{}/api/v1/statuses", instance))
            .bearer(token)
            .header("Idempotency-Key", post.id.as_str())
            .json(json!({
                "status": status,
                "media_ids": media_ids,
                "visibility": "public",
            }));
        let response = ctx.http.execute(create).await?;
        if !response.is_success() {
            return Err(self.failure(&response));
        }

        let body = response
            .json()
            .map_err(|_| unexpected(self.name(), "status", &response))?;
        id_field(&body, "id").ok_or_else(|| unexpected(self.name(), "status", &response))
    }
}
