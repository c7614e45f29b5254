//! Twitter/X publishing with OAuth 1.0a user context
//!
//! The connection's access token holds the user's token and secret joined by
//! a space; the consumer key and secret come from configuration. Each image
//! is uploaded through the v1.1 media endpoint, then one v2 tweet attaches
//! the returned media ids.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::PlatformError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, MultipartPart};
use crate::oauth1::{OAuth1Signer, TwitterToken};
use crate::platforms::{
    error_for_status, id_field, unexpected, Platform, PublishContext, PublishRequest,
};

pub const MAX_IMAGES: usize = 4;

pub struct TwitterPlatform;

impl TwitterPlatform {
    fn signed(
        &self,
        signer: &OAuth1Signer,
        request: HttpRequest,
    ) -> Result<HttpRequest, PlatformError> {
        let header = signer.authorization(request.method, &request.url, &request.query)?;
        Ok(request.header("Authorization", header))
    }

    fn failure(&self, response: &HttpResponse) -> PlatformError {
        error_for_status(self.name(), response, error_message(response))
    }
}

/// Pull a human message out of either the v1.1 or the v2 error envelope.
fn error_message(response: &HttpResponse) -> Option<String> {
    let body = response.json().ok()?;

    if let Some(detail) = body.get("detail").and_then(Value::as_str) {
        return Some(detail.to_string());
    }
    if let Some(message) = body.pointer("/errors/0/message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    if let Some(error) = body.get("error").and_then(Value::as_str) {
        return Some(error.to_string());
    }
    body.get("title").and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl Platform for TwitterPlatform {
    fn name(&self) -> &str {
        "twitter"
    }

    async fn publish(
        &self,
        ctx: &PublishContext,
        request: &PublishRequest<'_>,
    ) -> Result<String, PlatformError> {
        let token = TwitterToken::parse(request.connection.access_token())?;

        let settings = &ctx.config.twitter;
        if settings.consumer_key.is_empty() || settings.consumer_secret.is_empty() {
            return Err(PlatformError::Authentication(
                "twitter consumer key and secret are not configured".to_string(),
            ));
        }
        if request.images.len() > MAX_IMAGES {
            return Err(PlatformError::Validation(format!(
                "tweets allow at most {} images, got {}",
                MAX_IMAGES,
                request.images.len()
            )));
        }

        let signer = OAuth1Signer::new(&settings.consumer_key, &settings.consumer_secret, &token);
        let upload_url = format!(
            "{}/media/upload.json",
            settings.upload_base.trim_end_matches('/')
        );

        let mut media_ids = Vec::with_capacity(request.images.len());
        for image in request.images {
            let staged = ctx.media.fetch(ctx.http.as_ref(), &request.post.id, image).await?;
            let part = MultipartPart::file(
                "media",
                staged.file_name(),
                staged.content_type(),
                staged.read().await?,
            );

            let upload = HttpRequest::new(HttpMethod::Post, upload_url.as_str())
                .query("media_category", "tweet_image")
                .multipart(vec![part]);
            let response = ctx.http.execute(self.signed(&signer, upload)?).await?;
            if !response.is_success() {
                return Err(self.failure(&response));
            }

            let body = response
                .json()
                .map_err(|_| unexpected(self.name(), "media upload", &response))?;
            let media_id = id_field(&body, "media_id_string")
                .or_else(|| id_field(&body, "media_id"))
                .ok_or_else(|| unexpected(self.name(), "media upload", &response))?;
            media_ids.push(media_id);
        }

        let mut tweet = json!({ "text": request.post.content });
        if !media_ids.is_empty() {
            tweet["media"] = json!({ "media_ids": media_ids });
        }

        let tweets_url = format!("{}/tweets", settings.api_base.trim_end_matches('/'));
        let create = HttpRequest::post(tweets_url).json(tweet);
        let response = ctx.http.execute(self.signed(&signer, create)?).await?;
        if !response.is_success() {
            return Err(self.failure(&response));
        }

        let body = response
            .json()
            .map_err(|_| unexpected(self.name(), "tweet", &response))?;
        body.get("data")
            .and_then(|data| id_field(data, "id"))
            .ok_or_else(|| unexpected(self.name(), "tweet", &response))
    }
}
