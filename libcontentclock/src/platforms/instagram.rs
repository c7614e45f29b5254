//! Instagram Graph API publishing
//!
//! Instagram requires media. One image is a container create followed by a
//! publish; two to ten images become carousel items, a carousel container
//! and a publish.

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::http::HttpRequest;
use crate::platforms::{graph_id, Platform, PublishContext, PublishRequest};

pub const MAX_CAROUSEL_ITEMS: usize = 10;

pub struct InstagramPlatform;

impl InstagramPlatform {
    async fn create_container(
        &self,
        ctx: &PublishContext,
        endpoint: &str,
        token: &str,
        mut fields: Vec<(String, String)>,
    ) -> Result<String, PlatformError> {
        fields.push(("access_token".to_string(), token.to_string()));
        let response = ctx
            .http
            .execute(HttpRequest::post(endpoint).form(fields))
            .await?;
        graph_id(self.name(), "container", &response)
    }
}

#[async_trait]
impl Platform for InstagramPlatform {
    fn name(&self) -> &str {
        "instagram"
    }

    async fn publish(
        &self,
        ctx: &PublishContext,
        request: &PublishRequest<'_>,
    ) -> Result<String, PlatformError> {
        let count = request.images.len();
        if count == 0 {
            return Err(PlatformError::Validation(
                "Instagram posts require at least one image".to_string(),
            ));
        }
        if count > MAX_CAROUSEL_ITEMS {
            return Err(PlatformError::Validation(format!(
                "Instagram carousels allow at most {} images, got {}",
                MAX_CAROUSEL_ITEMS, count
            )));
        }

        let base = ctx.config.instagram.api_base.trim_end_matches('/');
        let user_id = &request.connection.account_id;
        let token = request.connection.access_token();
        let media_endpoint = format!("{}/{}/media", base, user_id);
        let caption = request.post.content.clone();
        let urls = ctx.media.public_urls(&request.post.id, request.images);

        let creation_id = if urls.len() == 1 {
            self.create_container(
                ctx,
                &media_endpoint,
                token,
                vec![
                    ("image_url".to_string(), urls[0].clone()),
                    ("caption".to_string(), caption),
                ],
            )
            .await?
        } else {
            let mut children = Vec::with_capacity(urls.len());
            for url in urls {
                let child = self
                    .create_container(
                        ctx,
                        &media_endpoint,
                        token,
                        vec![
                            ("image_url".to_string(), url),
                            ("is_carousel_item".to_string(), "true".to_string()),
                        ],
                    )
                    .await?;
                children.push(child);
            }

            self.create_container(
                ctx,
                &media_endpoint,
                token,
                vec![
                    ("media_type".to_string(), "CAROUSEL".to_string()),
                    ("caption".to_string(), caption),
                    ("children".to_string(), children.join(",")),
                ],
            )
            .await?
        };

        let publish = HttpRequest::post(format!("{}/{}/media_publish", base, user_id)).form(vec![
            ("creation_id".to_string(), creation_id),
            ("access_token".to_string(), token.to_string()),
        ]);
        let response = ctx.http.execute(publish).await?;
        graph_id(self.name(), "media_publish", &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::mock::MockHttpClient;
    use crate::platforms::test_support::context;
    use crate::types::{Connection, ScheduledPost};
    use serde_json::json;
    use std::sync::Arc;

    const MEDIA: &str = "https://graph.facebook.com/v19.0/ig1/media";
    const PUBLISH: &str = "https://graph.facebook.com/v19.0/ig1/media_publish";

    fn scripted() -> Arc<MockHttpClient> {
        let http = Arc::new(MockHttpClient::new());
        http.respond(HttpMethod::Post, MEDIA, 200, json!({"id": "container"}))
            .respond(HttpMethod::Post, PUBLISH, 200, json!({"id": "ig_post_1"}));
        http
    }

    async fn publish_with(
        http: Arc<MockHttpClient>,
        count: usize,
    ) -> Result<String, PlatformError> {
        let ctx = context(http);
        let conn = Connection::new("instagram", "ig1", "tok");
        let post = ScheduledPost::new("caption", &conn.id, 0);
        let names: Vec<String> = (0..count).map(|i| format!("img{}.jpg", i)).collect();
        let request = PublishRequest {
            post: &post,
            images: &names,
            connection: &conn,
        };
        InstagramPlatform.publish(&ctx, &request).await
    }

    #[tokio::test]
    async fn test_zero_images_fails_without_calls() {
        let http = scripted();
        let err = publish_with(http.clone(), 0).await.unwrap_err();
        assert!(matches!(err, PlatformError::Validation(_)));
        assert_eq!(http.request_count(), 0);
    }

    #[tokio::test]
    async fn test_one_image_makes_two_calls() {
        let http = scripted();
        let id = publish_with(http.clone(), 1).await.unwrap();
        assert_eq!(id, "ig_post_1");

        let sent = http.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].form_value("caption"), Some("caption"));
        assert_eq!(sent[0].form_value("is_carousel_item"), None);
        assert_eq!(sent[1].url, PUBLISH);
        assert_eq!(sent[1].form_value("creation_id"), Some("container"));
    }

    #[tokio::test]
    async fn test_carousel_makes_n_plus_two_calls() {
        for n in [2usize, 5, 10] {
            let http = scripted();
            publish_with(http.clone(), n).await.unwrap();
            assert_eq!(http.request_count(), n + 2, "for {} images", n);
        }
    }

    #[tokio::test]
    async fn test_carousel_container_lists_children() {
        let http = Arc::new(MockHttpClient::new());
        http.respond(HttpMethod::Post, MEDIA, 200, json!({"id": "c1"}))
            .respond(HttpMethod::Post, MEDIA, 200, json!({"id": "c2"}))
            .respond(HttpMethod::Post, MEDIA, 200, json!({"id": "carousel"}))
            .respond(HttpMethod::Post, PUBLISH, 200, json!({"id": "published"}));

        let id = publish_with(http.clone(), 2).await.unwrap();
        assert_eq!(id, "published");

        let sent = http.requests();
        assert_eq!(sent[0].form_value("is_carousel_item"), Some("true"));
        assert_eq!(sent[2].form_value("media_type"), Some("CAROUSEL"));
        assert_eq!(sent[2].form_value("children"), Some("c1,c2"));
        assert_eq!(sent[3].form_value("creation_id"), Some("carousel"));
    }

    #[tokio::test]
    async fn test_eleven_images_fails_without_calls() {
        let http = scripted();
        let err = publish_with(http.clone(), 11).await.unwrap_err();
        assert!(matches!(err, PlatformError::Validation(_)));
        assert_eq!(http.request_count(), 0);
    }

    #[tokio::test]
    async fn test_container_error_is_reported() {
        let http = Arc::new(MockHttpClient::new());
        http.respond(
            HttpMethod::Post,
            MEDIA,
            400,
            json!({"error": {"message": "Only photo or video can be accepted as media type."}}),
        );
        let err = publish_with(http.clone(), 1).await.unwrap_err();
        assert_eq!(
            err,
            PlatformError::Posting("Only photo or video can be accepted as media type.".to_string())
        );
        assert_eq!(http.request_count(), 1);
    }
}
