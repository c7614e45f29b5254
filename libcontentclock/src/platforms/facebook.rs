//! Facebook Page publishing via the Graph API
//!
//! Images are uploaded unpublished to `/{page}/photos`, then attached to a
//! single `/{page}/feed` post as `attached_media[i]`.

use async_trait::async_trait;
use serde_json::json;

use crate::error::PlatformError;
use crate::http::HttpRequest;
use crate::platforms::{graph_id, Platform, PublishContext, PublishRequest};

pub struct FacebookPlatform;

#[async_trait]
impl Platform for FacebookPlatform {
    fn name(&self) -> &str {
        "facebook"
    }

    async fn publish(
        &self,
        ctx: &PublishContext,
        request: &PublishRequest<'_>,
    ) -> Result<String, PlatformError> {
        let base = ctx.config.facebook.api_base.trim_end_matches('/');
        let page_id = &request.connection.account_id;
        let token = request.connection.access_token();

        let mut media_ids = Vec::with_capacity(request.images.len());
        for url in ctx.media.public_urls(&request.post.id, request.images) {
            let upload = HttpRequest::post(format!("{}/{}/photos", base, page_id)).form(vec![
                ("url".to_string(), url),
                ("published".to_string(), "false".to_string()),
                ("access_token".to_string(), token.to_string()),
            ]);
            let response = ctx.http.execute(upload).await?;
            media_ids.push(graph_id(self.name(), "photo upload", &response)?);
        }

        let mut fields = vec![
            ("message".to_string(), request.post.content.clone()),
            ("access_token".to_string(), token.to_string()),
            ("published".to_string(), "true".to_string()),
        ];
        if let Some(link) = request.post.link() {
            fields.push(("link".to_string(), link.to_string()));
        }
        for (i, media_id) in media_ids.iter().enumerate() {
            fields.push((
                format!("attached_media[{}]", i),
                json!({ "media_fbid": media_id }).to_string(),
            ));
        }

        let feed = HttpRequest::post(format!("{}/{}/feed", base, page_id)).form(fields);
        let response = ctx.http.execute(feed).await?;
        graph_id(self.name(), "feed", &response)
    }
}
