//! End-to-end dispatch against in-memory SQLite and scripted platform replies

use libcontentclock::config::PlatformsConfig;
use libcontentclock::dispatch::DispatchSettings;
use libcontentclock::http::HttpMethod;
use libcontentclock::media::MediaResolver;
use libcontentclock::mock::MockHttpClient;
use libcontentclock::{
    Connection, Database, Dispatcher, PlatformError, PlatformRegistry, PostStatus, PublishContext,
    ScheduledPost,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const NOW: i64 = 1_750_000_000;
const PHOTOS: &str = "https://graph.facebook.com/v19.0/page-1/photos";
const FEED: &str = "https://graph.facebook.com/v19.0/page-1/feed";
const STATUSES: &str = "https://mastodon.social/api/v1/statuses";
const INSTAGRAM: &str = "https://graph.facebook.com/v19.0/ig-1/";
const FILES: &str = "https://api.example.test/api/files/posts/";

struct Setup {
    db: Arc<Database>,
    http: Arc<MockHttpClient>,
    dispatcher: Dispatcher,
}

async fn setup() -> anyhow::Result<Setup> {
    let db = Arc::new(Database::in_memory().await?);
    let http = Arc::new(MockHttpClient::new());
    let ctx = PublishContext::new(
        http.clone(),
        MediaResolver::new("https://api.example.test", std::env::temp_dir()),
        PlatformsConfig::default(),
    );
    let settings = DispatchSettings {
        max_attempts: 3,
        retry_base_delay: Duration::from_millis(1),
        attempt_timeout: Duration::from_secs(10),
        stuck_after: Duration::from_secs(900),
    };
    let dispatcher =
        Dispatcher::with_settings(db.clone(), PlatformRegistry::with_defaults(), ctx, settings);

    Ok(Setup { db, http, dispatcher })
}

async fn connect(db: &Database, platform: &str, account_id: &str) -> anyhow::Result<Connection> {
    let conn = Connection::new(platform, account_id, format!("{}-token", platform));
    db.create_connection(&conn).await?;
    Ok(conn)
}

#[tokio::test]
async fn test_facebook_post_with_image_end_to_end() -> anyhow::Result<()> {
    let s = setup().await?;
    s.http
        .respond(HttpMethod::Post, PHOTOS, 200, json!({"id": "media-1"}))
        .respond(HttpMethod::Post, FEED, 200, json!({"id": "page-1_42"}));

    let conn = connect(&s.db, "facebook", "page-1").await?;
    let post = ScheduledPost::new("Hello", &conn.id, NOW - 30).with_images(&["hero.png"]);
    s.db.create_post(&post).await?;

    let summary = s.dispatcher.run_once(NOW).await?;
    assert_eq!(summary.published, 1);

    assert_eq!(s.http.requests_to(PHOTOS).len(), 1);
    assert_eq!(s.http.requests_to(FEED).len(), 1);

    let photo = &s.http.requests_to(PHOTOS)[0];
    assert_eq!(
        photo.form_value("url").map(str::to_string),
        Some(format!(
            "https://api.example.test/api/files/posts/{}/hero.png",
            post.id
        ))
    );
    assert_eq!(photo.form_value("access_token"), Some("facebook-token"));

    let feed = &s.http.requests_to(FEED)[0];
    assert_eq!(feed.form_value("message"), Some("Hello"));
    assert_eq!(feed.form_value("attached_media[0]"), Some(r#"{"media_fbid":"media-1"}"#));

    let stored = s.db.get_post(&post.id).await?.expect("post exists");
    assert_eq!(stored.status, PostStatus::Published);
    assert_eq!(stored.published_post_id.as_deref(), Some("page-1_42"));
    assert!(stored.logs.is_none());
    Ok(())
}

#[tokio::test]
async fn test_mixed_batch_leaves_nothing_in_sending() -> anyhow::Result<()> {
    let s = setup().await?;
    s.http
        .respond(HttpMethod::Post, FEED, 200, json!({"id": "page-1_1"}))
        .respond(
            HttpMethod::Post,
            INSTAGRAM,
            400,
            json!({"error": {"message": "Only photo or video can be accepted as media type."}}),
        )
        .fail(
            HttpMethod::Post,
            STATUSES,
            PlatformError::Network("connection reset".to_string()),
        );

    let facebook = connect(&s.db, "facebook", "page-1").await?;
    let pinterest = connect(&s.db, "pinterest", "board-1").await?;
    let instagram = connect(&s.db, "instagram", "ig-1").await?;
    let mastodon = connect(&s.db, "mastodon", "acct").await?;

    let posts = vec![
        ScheduledPost::new("fb text", &facebook.id, NOW - 300),
        ScheduledPost::new("pin without image", &pinterest.id, NOW - 200),
        ScheduledPost::new("ig photo", &instagram.id, NOW - 100).with_images(&["a.gif"]),
        ScheduledPost::new("toot", &mastodon.id, NOW - 50),
    ];
    for post in &posts {
        s.db.create_post(post).await?;
    }

    let summary = s.dispatcher.run_once(NOW).await?;
    assert_eq!(summary.due, 4);
    assert_eq!(summary.claimed, 4);
    assert_eq!(summary.published, 1);
    assert_eq!(summary.failed, 3);

    assert!(s.db.list_posts_by_status(PostStatus::Sending).await?.is_empty());

    for post in &posts {
        let stored = s.db.get_post(&post.id).await?.expect("post exists");
        assert!(stored.status.is_terminal());
        assert_eq!(
            stored.published_post_id.is_some(),
            stored.status == PostStatus::Published
        );
        assert_eq!(stored.logs.is_some(), stored.status == PostStatus::Failed);
    }

    let pin = s.db.get_post(&posts[1].id).await?.expect("post exists");
    assert!(pin.logs.unwrap().starts_with("Validation failed"));

    let ig = s.db.get_post(&posts[2].id).await?.expect("post exists");
    assert_eq!(
        ig.logs.as_deref(),
        Some("Posting failed: Only photo or video can be accepted as media type.")
    );

    // Transport failures are retried up to the attempt limit
    assert_eq!(s.http.requests_to(STATUSES).len(), 3);
    let toot = s.db.get_post(&posts[3].id).await?.expect("post exists");
    assert_eq!(toot.logs.as_deref(), Some("Network error: connection reset"));
    Ok(())
}

#[tokio::test]
async fn test_missing_image_is_downloaded_once() -> anyhow::Result<()> {
    let s = setup().await?;
    s.http.respond_raw(HttpMethod::Get, FILES, 404, "Not Found");

    let conn = connect(&s.db, "mastodon", "acct").await?;
    let post = ScheduledPost::new("toot", &conn.id, NOW - 5).with_images(&["gone.png"]);
    s.db.create_post(&post).await?;

    let summary = s.dispatcher.run_once(NOW).await?;
    assert_eq!(summary.failed, 1);

    assert_eq!(s.http.requests_to(FILES).len(), 1);
    assert!(s.http.requests_to(STATUSES).is_empty());

    let stored = s.db.get_post(&post.id).await?.expect("post exists");
    assert_eq!(stored.status, PostStatus::Failed);
    assert_eq!(
        stored.logs,
        Some(format!(
            "Validation failed: image {}{}/gone.png not found (HTTP 404)",
            FILES, post.id
        ))
    );
    Ok(())
}

#[tokio::test]
async fn test_second_tick_does_not_republish() -> anyhow::Result<()> {
    let s = setup().await?;
    s.http.respond(HttpMethod::Post, FEED, 200, json!({"id": "page-1_7"}));

    let conn = connect(&s.db, "facebook", "page-1").await?;
    s.db.create_post(&ScheduledPost::new("once", &conn.id, NOW - 1)).await?;

    s.dispatcher.run_once(NOW).await?;
    let second = s.dispatcher.run_once(NOW + 60).await?;

    assert_eq!(second.due, 0);
    assert_eq!(s.http.requests_to(FEED).len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_deleted_and_future_posts_make_no_calls() -> anyhow::Result<()> {
    let s = setup().await?;
    let conn = connect(&s.db, "facebook", "page-1").await?;

    let future = ScheduledPost::new("tomorrow", &conn.id, NOW + 86_400);
    let deleted = ScheduledPost::new("withdrawn", &conn.id, NOW - 10);
    s.db.create_post(&future).await?;
    s.db.create_post(&deleted).await?;
    s.db.soft_delete_post(&deleted.id, NOW - 5).await?;

    let summary = s.dispatcher.run_once(NOW).await?;

    assert_eq!(summary.due, 0);
    assert_eq!(s.http.request_count(), 0);
    let stored = s.db.get_post(&deleted.id).await?.expect("post exists");
    assert_eq!(stored.status, PostStatus::Scheduled);
    Ok(())
}

#[tokio::test]
async fn test_platform_tags_route_case_insensitively() -> anyhow::Result<()> {
    let s = setup().await?;
    s.http.respond(HttpMethod::Post, FEED, 200, json!({"id": "page-1_8"}));

    let conn = connect(&s.db, "Facebook", "page-1").await?;
    let post = ScheduledPost::new("caps", &conn.id, NOW - 1);
    s.db.create_post(&post).await?;

    s.dispatcher.run_once(NOW).await?;

    let stored = s.db.get_post(&post.id).await?.expect("post exists");
    assert_eq!(stored.status, PostStatus::Published);
    Ok(())
}
