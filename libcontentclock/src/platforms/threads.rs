//! Threads publishing
//!
//! Mirrors Instagram's container flow with a text-only tier: every shape
//! creates a container under `/{user}/threads` and publishes it through
//! `/{user}/threads_publish`. Parameters travel in the query string.

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::http::HttpRequest;
use crate::platforms::{graph_id, Platform, PublishContext, PublishRequest};

pub const MAX_CAROUSEL_ITEMS: usize = 20;

pub struct ThreadsPlatform;

impl ThreadsPlatform {
    async fn create_container(
        &self,
        ctx: &PublishContext,
        endpoint: &str,
        token: &str,
        params: &[(&str, &str)],
    ) -> Result<String, PlatformError> {
        let mut request = HttpRequest::post(endpoint);
        for (name, value) in params {
            request = request.query(*name, *value);
        }
        let response = ctx
            .http
            .execute(request.query("access_token", token))
            .await?;
        graph_id(self.name(), "container", &response)
    }
}

#[async_trait]
impl Platform for ThreadsPlatform {
    fn name(&self) -> &str {
        "threads"
    }

    async fn publish(
        &self,
        ctx: &PublishContext,
        request: &PublishRequest<'_>,
    ) -> Result<String, PlatformError> {
        if request.images.len() > MAX_CAROUSEL_ITEMS {
            return Err(PlatformError::Validation(format!(
                "Threads carousels allow at most {} images, got {}",
                MAX_CAROUSEL_ITEMS,
                request.images.len()
            )));
        }

        let base = ctx.config.threads.api_base.trim_end_matches('/');
        let user_id = &request.connection.account_id;
        let token = request.connection.access_token();
        let endpoint = format!("{}/{}/threads", base, user_id);
        let text = request.post.content.as_str();
        let urls = ctx.media.public_urls(&request.post.id, request.images);

        let creation_id = match urls.len() {
            0 => {
                self.create_container(
                    ctx,
                    &endpoint,
                    token,
                    &[("media_type", "TEXT"), ("text", text)],
                )
                .await?
            }
            1 => {
                self.create_container(
                    ctx,
                    &endpoint,
                    token,
                    &[("media_type", "IMAGE"), ("image_url", urls[0].as_str()), ("text", text)],
                )
                .await?
            }
            _ => {
                let mut children = Vec::with_capacity(urls.len());
                for url in &urls {
                    let child = self
                        .create_container(
                            ctx,
                            &endpoint,
                            token,
                            &[
                                ("media_type", "IMAGE"),
                                ("image_url", url.as_str()),
                                ("is_carousel_item", "true"),
                            ],
                        )
                        .await?;
                    children.push(child);
                }
                let children = children.join(",");
                self.create_container(
                    ctx,
                    &endpoint,
                    token,
                    &[("media_type", "CAROUSEL"), ("children", children.as_str()), ("text", text)],
                )
                .await?
            }
        };

        let publish = HttpRequest::post(format!("{}/{}/threads_publish", base, user_id))
            .query("creation_id", creation_id)
            .query("access_token", token);
        let response = ctx.http.execute(publish).await?;
        graph_id(self.name(), "threads_publish", &response)
    }
}
