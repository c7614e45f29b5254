//! LinkedIn member shares through the UGC Posts API
//!
//! An image share is four steps: register an upload, PUT the bytes to the
//! returned URL, wait for the asset to become `AVAILABLE`, then create the
//! post referencing the asset URN. Text and link shares are a single call.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::PlatformError;
use crate::http::{HttpRequest, HttpResponse};
use crate::platforms::{
    error_for_status, id_field, unexpected, Platform, PublishContext, PublishRequest,
};

const UPLOAD_MECHANISM: &str = "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest";

pub struct LinkedinPlatform;

impl LinkedinPlatform {
    fn request(&self, request: HttpRequest, token: &str) -> HttpRequest {
        request
            .bearer(token)
            .header("X-Restli-Protocol-Version", "2.0.0")
    }

    fn check(&self, step: &str, response: &HttpResponse) -> Result<Value, PlatformError> {
        if !response.is_success() {
            let message = response
                .json()
                .ok()
                .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string));
            return Err(error_for_status(self.name(), response, message));
        }
        response.json().map_err(|_| unexpected(self.name(), step, response))
    }

    /// Returns `(upload_url, asset_urn)`.
    async fn register_upload(
        &self,
        ctx: &PublishContext,
        base: &str,
        owner: &str,
        token: &str,
    ) -> Result<(String, String), PlatformError> {
        let body = json!({
            "registerUploadRequest": {
                "recipes": ["urn:li:digitalmediaRecipe:feedshare-image"],
                "owner": owner,
                "serviceRelationships": [{
                    "relationshipType": "OWNER",
                    "identifier": "urn:li:userGeneratedContent"
                }]
            }
        });
        let register = self
            .request(HttpRequest::post(format!("{}/assets", base)), token)
            .query("action", "registerUpload")
            .json(body);

        let response = ctx.http.execute(register).await?;
        let value = self.check("registerUpload", &response)?;

        let upload_url = value
            .pointer(&format!("/value/uploadMechanism/{}/uploadUrl", UPLOAD_MECHANISM))
            .and_then(Value::as_str);
        let asset = value.pointer("/value/asset").and_then(Value::as_str);

        match (upload_url, asset) {
            (Some(url), Some(asset)) => Ok((url.to_string(), asset.to_string())),
            _ => Err(unexpected(self.name(), "registerUpload", &response)),
        }
    }

    /// Poll the asset until LinkedIn reports it processed.
    ///
    /// Gives up quietly after the configured number of checks and lets the
    /// post creation surface any remaining problem.
    async fn wait_for_asset(
        &self,
        ctx: &PublishContext,
        base: &str,
        asset: &str,
        token: &str,
    ) -> Result<(), PlatformError> {
        let settings = &ctx.config.linkedin;
        let asset_id = asset.rsplit(':').next().unwrap_or(asset);
        let interval = Duration::from_millis(settings.asset_poll_interval_ms);

        for attempt in 1..=settings.asset_poll_attempts {
            let url = format!("{}/assets/{}", base, asset_id);
            let status = self.request(HttpRequest::get(url), token);
            let response = ctx.http.execute(status).await?;
            let value = self.check("asset status", &response)?;

            match value.pointer("/recipes/0/status").and_then(Value::as_str) {
                Some("AVAILABLE") => return Ok(()),
                Some("CLIENT_ERROR") | Some("FAILED") => {
                    return Err(PlatformError::Posting(format!(
                        "LinkedIn could not process uploaded image {}",
                        asset
                    )))
                }
                other => {
                    tracing::debug!(
                        asset = %asset,
                        attempt,
                        status = ?other,
                        "Waiting for LinkedIn asset"
                    );
                }
            }

            if attempt < settings.asset_poll_attempts && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        tracing::warn!(
            asset = %asset,
            "LinkedIn asset not reported AVAILABLE, creating post anyway"
        );
        Ok(())
    }
}

#[async_trait]
impl Platform for LinkedinPlatform {
    fn name(&self) -> &str {
        "linkedin"
    }

    async fn publish(
        &self,
        ctx: &PublishContext,
        request: &PublishRequest<'_>,
    ) -> Result<String, PlatformError> {
        if request.images.len() > 1 {
            return Err(PlatformError::Validation(format!(
                "LinkedIn shares support at most one image, got {}",
                request.images.len()
            )));
        }

        let base = ctx.config.linkedin.api_base.trim_end_matches('/');
        let token = request.connection.access_token();
        let author = format!("urn:li:person:{}", request.connection.account_id);
        let post = request.post;

        let (category, media) = if let Some(image) = request.images.first() {
            let (upload_url, asset) = self.register_upload(ctx, base, &author, token).await?;

            let staged = ctx.media.fetch(ctx.http.as_ref(), &post.id, image).await?;
            let bytes = staged.read().await?;
            let upload = self
                .request(HttpRequest::put(upload_url), token)
                .bytes(staged.content_type(), bytes);
            let response = ctx.http.execute(upload).await?;
            if !response.is_success() {
                return Err(error_for_status(self.name(), &response, None));
            }
            drop(staged);

            self.wait_for_asset(ctx, base, &asset, token).await?;

            let mut entry = json!({ "status": "READY", "media": asset });
            if !post.title.trim().is_empty() {
                entry["title"] = json!({ "text": post.title });
            }
            ("IMAGE", vec![entry])
        } else if let Some(link) = post.link() {
            let mut entry = json!({ "status": "READY", "originalUrl": link });
            if !post.title.trim().is_empty() {
                entry["title"] = json!({ "text": post.title });
            }
            ("ARTICLE", vec![entry])
        } else {
            ("NONE", Vec::new())
        };

        let mut share = json!({
            "shareCommentary": { "text": post.content },
            "shareMediaCategory": category,
        });
        if !media.is_empty() {
            share["media"] = Value::Array(media);
        }

        let body = json!({
            "author": author,
            "lifecycleState": "PUBLISHED",
            "specificContent": { "com.linkedin.ugc.ShareContent": share },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" }
        });

        let create = self
            .request(HttpRequest::post(format!("{}/ugcPosts", base)), token)
            .json(body);
        let response = ctx.http.execute(create).await?;
        let value = self.check("ugcPosts", &response)?;

        id_field(&value, "id").ok_or_else(|| unexpected(self.name(), "ugcPosts", &response))
    }
}
