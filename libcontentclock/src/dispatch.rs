//! Due-post dispatch
//!
//! One tick selects every due post, claims it, resolves its connection and
//! adapter, and hands the adapter's result to the outcome recorder. Posts are
//! processed one at a time. Every claimed post leaves the tick `published`
//! or `failed`, unless the final store write itself fails; those are caught
//! by the stuck-post sweep on a later tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::{PlatformError, Result};
use crate::platforms::{Platform, PlatformRegistry, PublishContext, PublishRequest};
use crate::recorder::OutcomeRecorder;
use crate::store::PostStore;
use crate::types::{Connection, DeliveryOutcome, ScheduledPost};

/// Platform label used in logs before a post's connection is known
const UNRESOLVED_PLATFORM: &str = "unresolved";

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub attempt_timeout: Duration,
    pub stuck_after: Duration,
}

impl From<&DispatchConfig> for DispatchSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_base_delay: config.retry_base_delay(),
            attempt_timeout: config.attempt_timeout(),
            stuck_after: config.stuck_after(),
        }
    }
}

/// Counters for one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// Posts returned by the due query
    pub due: usize,
    /// Posts this tick moved to `sending`
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
    /// Due posts that could not be claimed
    pub skipped: usize,
    /// Posts failed by the stuck-post sweep
    pub reconciled: usize,
}

/// Clock for one tick.
///
/// Due posts are selected as of `now`; store writes are stamped with `now`
/// plus the time the tick has been running, so a post claimed late in a long
/// tick does not look older than it is to the stuck-post sweep.
#[derive(Debug, Clone, Copy)]
struct TickClock {
    now: i64,
    started: Instant,
}

impl TickClock {
    fn start(now: i64) -> Self {
        Self {
            now,
            started: Instant::now(),
        }
    }

    fn stamp(&self) -> i64 {
        self.now + self.started.elapsed().as_secs() as i64
    }
}

enum PostResult {
    Skipped,
    Recorded(DeliveryOutcome),
}

pub struct Dispatcher {
    store: Arc<dyn PostStore>,
    registry: PlatformRegistry,
    ctx: PublishContext,
    recorder: OutcomeRecorder,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn PostStore>,
        registry: PlatformRegistry,
        ctx: PublishContext,
        config: &DispatchConfig,
    ) -> Self {
        Self::with_settings(store, registry, ctx, DispatchSettings::from(config))
    }

    pub fn with_settings(
        store: Arc<dyn PostStore>,
        registry: PlatformRegistry,
        ctx: PublishContext,
        settings: DispatchSettings,
    ) -> Self {
        let recorder = OutcomeRecorder::new(store.clone());
        Self {
            store,
            registry,
            ctx,
            recorder,
            settings,
        }
    }

    /// Run one dispatch pass at `now` (unix seconds).
    ///
    /// Fails only if the due-post query fails; per-post problems are
    /// recorded on the post.
    pub async fn run_once(&self, now: i64) -> Result<TickSummary> {
        let clock = TickClock::start(now);
        let mut summary = TickSummary {
            reconciled: self.reconcile(&clock).await,
            ..Default::default()
        };

        let due = self.store.due_posts(now).await?;
        summary.due = due.len();
        if !due.is_empty() {
            debug!(count = due.len(), "Found due posts");
        }

        for post in &due {
            match self.process(post, &clock).await {
                PostResult::Skipped => summary.skipped += 1,
                PostResult::Recorded(outcome) => {
                    summary.claimed += 1;
                    if outcome.is_published() {
                        summary.published += 1;
                    } else {
                        summary.failed += 1;
                    }
                }
            }
        }

        if summary.due > 0 || summary.reconciled > 0 {
            info!(
                due = summary.due,
                published = summary.published,
                failed = summary.failed,
                skipped = summary.skipped,
                reconciled = summary.reconciled,
                "Dispatch tick complete"
            );
        }

        Ok(summary)
    }

    async fn process(&self, post: &ScheduledPost, clock: &TickClock) -> PostResult {
        match self.store.claim_post(&post.id, clock.stamp()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(post_id = %post.id, "Post already claimed, skipping");
                return PostResult::Skipped;
            }
            Err(e) => {
                warn!(post_id = %post.id, error = %e, "Failed to claim post, will retry next tick");
                return PostResult::Skipped;
            }
        }

        let images = match post.image_refs() {
            Ok(images) => images,
            Err(error) => return self.fail(UNRESOLVED_PLATFORM, post, error, clock).await,
        };

        let connection = match self.store.get_connection(&post.connection_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                let error = PlatformError::Validation(format!(
                    "connection {} not found",
                    post.connection_id
                ));
                return self.fail(UNRESOLVED_PLATFORM, post, error, clock).await;
            }
            Err(e) => {
                let error = PlatformError::Validation(format!(
                    "could not load connection {}: {}",
                    post.connection_id, e
                ));
                return self.fail(UNRESOLVED_PLATFORM, post, error, clock).await;
            }
        };

        let Some(platform) = self.registry.get(&connection.platform) else {
            let error = PlatformError::Validation(format!(
                "no adapter for platform '{}'",
                connection.platform
            ));
            return self.fail(&connection.platform, post, error, clock).await;
        };

        let outcome = self.deliver(platform.as_ref(), post, &images, &connection).await;
        self.recorder
            .record(platform.name(), &post.id, &outcome, clock.stamp())
            .await;
        PostResult::Recorded(outcome)
    }

    async fn fail(
        &self,
        platform: &str,
        post: &ScheduledPost,
        error: PlatformError,
        clock: &TickClock,
    ) -> PostResult {
        let outcome = DeliveryOutcome::Failed { error };
        self.recorder
            .record(platform, &post.id, &outcome, clock.stamp())
            .await;
        PostResult::Recorded(outcome)
    }

    /// Call the adapter, retrying transport failures with exponential backoff.
    async fn deliver(
        &self,
        platform: &dyn Platform,
        post: &ScheduledPost,
        images: &[String],
        connection: &Connection,
    ) -> DeliveryOutcome {
        let request = PublishRequest {
            post,
            images,
            connection,
        };
        let max_attempts = self.settings.max_attempts;

        for attempt in 1..=max_attempts {
            let result = match timeout(
                self.settings.attempt_timeout,
                platform.publish(&self.ctx, &request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(PlatformError::Network(format!(
                    "{} did not finish within {}s",
                    platform.name(),
                    self.settings.attempt_timeout.as_secs_f64()
                ))),
            };

            match result {
                Ok(published_id) => {
                    if attempt > 1 {
                        info!(
                            platform = %platform.name(),
                            post_id = %post.id,
                            attempt,
                            "Published after retry"
                        );
                    }
                    return DeliveryOutcome::from_result(Ok(published_id));
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self
                        .settings
                        .retry_base_delay
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        platform = %platform.name(),
                        post_id = %post.id,
                        attempt,
                        max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Transient error, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return DeliveryOutcome::from_result(Err(e)),
            }
        }

        DeliveryOutcome::Failed {
            error: PlatformError::Network(format!(
                "{} failed after {} attempts",
                platform.name(),
                max_attempts
            )),
        }
    }

    /// Fail posts left in `sending` longer than the configured threshold.
    async fn reconcile(&self, clock: &TickClock) -> usize {
        let threshold = clock.now - self.settings.stuck_after.as_secs() as i64;
        let stuck = match self.store.stuck_posts(threshold).await {
            Ok(stuck) => stuck,
            Err(e) => {
                warn!(error = %e, "Failed to query stuck posts");
                return 0;
            }
        };

        for post in &stuck {
            let platform = match self.store.get_connection(&post.connection_id).await {
                Ok(Some(connection)) => connection.platform,
                _ => UNRESOLVED_PLATFORM.to_string(),
            };
            let outcome = DeliveryOutcome::Failed {
                error: PlatformError::Network(format!(
                    "delivery interrupted: post stayed in sending for more than {}s",
                    self.settings.stuck_after.as_secs()
                )),
            };
            self.recorder
                .record(&platform, &post.id, &outcome, clock.stamp())
                .await;
        }

        stuck.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformsConfig;
    use crate::db::Database;
    use crate::media::MediaResolver;
    use crate::mock::MockHttpClient;
    use crate::platforms::mock::MockPlatform;
    use crate::types::PostStatus;
    use async_trait::async_trait;

    const NOW: i64 = 1_700_000_000;

    fn settings() -> DispatchSettings {
        DispatchSettings {
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(5),
            stuck_after: Duration::from_secs(900),
        }
    }

    fn ctx() -> PublishContext {
        PublishContext::new(
            Arc::new(MockHttpClient::new()),
            MediaResolver::new("https://files.test", std::env::temp_dir()),
            PlatformsConfig::default(),
        )
    }

    struct Harness {
        db: Arc<Database>,
        platform: Arc<MockPlatform>,
        dispatcher: Dispatcher,
    }

    async fn harness(platform: MockPlatform, settings: DispatchSettings) -> Harness {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let platform = Arc::new(platform);
        let mut registry = PlatformRegistry::new();
        registry.register(platform.clone());
        let dispatcher = Dispatcher::with_settings(db.clone(), registry, ctx(), settings);
        Harness { db, platform, dispatcher }
    }

    async fn due_post(db: &Database, platform: &str) -> ScheduledPost {
        let conn = Connection::new(platform, "acct", "tok");
        db.create_connection(&conn).await.unwrap();
        let post = ScheduledPost::new("hello", &conn.id, NOW - 60);
        db.create_post(&post).await.unwrap();
        post
    }

    #[tokio::test]
    async fn test_due_post_is_published() {
        let h = harness(MockPlatform::success("mock"), settings()).await;
        let post = due_post(&h.db, "mock").await;

        let summary = h.dispatcher.run_once(NOW).await.unwrap();
        assert_eq!(
            summary,
            TickSummary {
                due: 1,
                claimed: 1,
                published: 1,
                ..Default::default()
            }
        );

        let stored = h.db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Published);
        assert_eq!(stored.published_post_id, Some(format!("mock-{}", post.id)));
    }

    #[tokio::test]
    async fn test_published_post_is_not_selected_again() {
        let h = harness(MockPlatform::success("mock"), settings()).await;
        due_post(&h.db, "mock").await;

        h.dispatcher.run_once(NOW).await.unwrap();
        let second = h.dispatcher.run_once(NOW + 60).await.unwrap();

        assert_eq!(second.due, 0);
        assert_eq!(h.platform.publish_call_count(), 1);
    }

    #[tokio::test]
    async fn test_future_and_non_scheduled_posts_are_ignored() {
        let h = harness(MockPlatform::success("mock"), settings()).await;
        let conn = Connection::new("mock", "acct", "tok");
        h.db.create_connection(&conn).await.unwrap();

        let future = ScheduledPost::new("later", &conn.id, NOW + 1);
        let mut failed = ScheduledPost::new("old failure", &conn.id, NOW - 1);
        failed.status = PostStatus::Failed;
        let mut deleted = ScheduledPost::new("deleted", &conn.id, NOW - 1);
        deleted.deleted_at = Some(NOW - 2);
        for post in [&future, &failed, &deleted] {
            h.db.create_post(post).await.unwrap();
        }

        let summary = h.dispatcher.run_once(NOW).await.unwrap();
        assert_eq!(summary.due, 0);
        assert_eq!(h.platform.publish_call_count(), 0);
        assert_eq!(
            h.db.get_post(&future.id).await.unwrap().unwrap().status,
            PostStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn test_missing_connection_is_recorded_failed() {
        let h = harness(MockPlatform::success("mock"), settings()).await;
        let post = ScheduledPost::new("orphan", "no-such-connection", NOW - 1);
        h.db.create_post(&post).await.unwrap();

        let summary = h.dispatcher.run_once(NOW).await.unwrap();
        assert_eq!(summary.failed, 1);

        let stored = h.db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert!(stored.logs.unwrap().contains("connection no-such-connection not found"));
    }

    #[tokio::test]
    async fn test_unknown_platform_is_recorded_failed() {
        let h = harness(MockPlatform::success("mock"), settings()).await;
        let post = due_post(&h.db, "myspace").await;

        h.dispatcher.run_once(NOW).await.unwrap();

        let stored = h.db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert!(stored.logs.unwrap().contains("no adapter for platform 'myspace'"));
    }

    #[tokio::test]
    async fn test_bad_image_list_is_recorded_failed() {
        let h = harness(MockPlatform::success("mock"), settings()).await;
        let conn = Connection::new("mock", "acct", "tok");
        h.db.create_connection(&conn).await.unwrap();
        let mut post = ScheduledPost::new("x", &conn.id, NOW - 1);
        post.images = "not json".to_string();
        h.db.create_post(&post).await.unwrap();

        h.dispatcher.run_once(NOW).await.unwrap();

        let stored = h.db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert!(stored.logs.unwrap().starts_with("Validation failed"));
        assert_eq!(h.platform.publish_call_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let platform = MockPlatform::flaky(
            "mock",
            vec![
                PlatformError::Network("reset".to_string()),
                PlatformError::Network("reset".to_string()),
            ],
        );
        let h = harness(platform, settings()).await;
        let post = due_post(&h.db, "mock").await;

        h.dispatcher.run_once(NOW).await.unwrap();

        assert_eq!(h.platform.publish_call_count(), 3);
        let stored = h.db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Published);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let platform =
            MockPlatform::failure("mock", PlatformError::Network("unreachable".to_string()));
        let h = harness(platform, settings()).await;
        let post = due_post(&h.db, "mock").await;

        h.dispatcher.run_once(NOW).await.unwrap();

        assert_eq!(h.platform.publish_call_count(), 3);
        let stored = h.db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(stored.logs.as_deref(), Some("Network error: unreachable"));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let platform =
            MockPlatform::failure("mock", PlatformError::Posting("duplicate".to_string()));
        let h = harness(platform, settings()).await;
        due_post(&h.db, "mock").await;

        let summary = h.dispatcher.run_once(NOW).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(h.platform.publish_call_count(), 1);
    }

    #[tokio::test]
    async fn test_attempt_deadline_counts_as_network_error() {
        let mut quick = settings();
        quick.max_attempts = 1;
        quick.attempt_timeout = Duration::from_millis(50);
        let h = harness(
            MockPlatform::with_delay("mock", Duration::from_secs(5)),
            quick,
        )
        .await;
        let post = due_post(&h.db, "mock").await;

        h.dispatcher.run_once(NOW).await.unwrap();

        let stored = h.db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert!(stored.logs.unwrap().starts_with("Network error: mock did not finish"));
    }

    #[tokio::test]
    async fn test_writes_are_stamped_with_elapsed_tick_time() {
        let h = harness(
            MockPlatform::with_delay("mock", Duration::from_millis(1_100)),
            settings(),
        )
        .await;
        let first = due_post(&h.db, "mock").await;
        let second = due_post(&h.db, "mock").await;

        h.dispatcher.run_once(NOW).await.unwrap();

        let mut stamps = Vec::new();
        for post in [&first, &second] {
            let stored = h.db.get_post(&post.id).await.unwrap().unwrap();
            assert_eq!(stored.status, PostStatus::Published);
            stamps.push(stored.updated_at);
        }
        stamps.sort();
        assert!(stamps[0] >= NOW + 1);
        assert!(stamps[1] >= NOW + 2);
    }

    #[tokio::test]
    async fn test_stuck_sending_posts_are_failed() {
        let h = harness(MockPlatform::success("mock"), settings()).await;
        let post = due_post(&h.db, "mock").await;
        h.db.claim_post(&post.id, NOW - 1_000).await.unwrap();

        let summary = h.dispatcher.run_once(NOW).await.unwrap();
        assert_eq!(summary.reconciled, 1);

        let stored = h.db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert!(stored.logs.unwrap().contains("delivery interrupted"));
        assert_eq!(h.platform.publish_call_count(), 0);
    }

    #[tokio::test]
    async fn test_recent_sending_posts_are_left_alone() {
        let h = harness(MockPlatform::success("mock"), settings()).await;
        let post = due_post(&h.db, "mock").await;
        h.db.claim_post(&post.id, NOW - 10).await.unwrap();

        let summary = h.dispatcher.run_once(NOW).await.unwrap();
        assert_eq!(summary.reconciled, 0);
        assert_eq!(
            h.db.get_post(&post.id).await.unwrap().unwrap().status,
            PostStatus::Sending
        );
    }

    /// Simulates another worker claiming every post between selection and claim.
    struct ContendedStore {
        inner: Arc<Database>,
    }

    #[async_trait]
    impl PostStore for ContendedStore {
        async fn due_posts(&self, now: i64) -> Result<Vec<ScheduledPost>> {
            self.inner.due_posts(now).await
        }
        async fn claim_post(&self, post_id: &str, now: i64) -> Result<bool> {
            self.inner.claim_post(post_id, now).await?;
            self.inner.claim_post(post_id, now).await
        }
        async fn get_connection(&self, id: &str) -> Result<Option<Connection>> {
            self.inner.get_connection(id).await
        }
        async fn mark_published(&self, post_id: &str, published_id: &str, now: i64) -> Result<()> {
            self.inner.mark_published(post_id, published_id, now).await
        }
        async fn mark_failed(&self, post_id: &str, logs: &str, now: i64) -> Result<()> {
            self.inner.mark_failed(post_id, logs, now).await
        }
        async fn stuck_posts(&self, updated_before: i64) -> Result<Vec<ScheduledPost>> {
            self.inner.stuck_posts(updated_before).await
        }
    }

    #[tokio::test]
    async fn test_lost_claim_is_skipped() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let platform = Arc::new(MockPlatform::success("mock"));
        let mut registry = PlatformRegistry::new();
        registry.register(platform.clone());
        let store = Arc::new(ContendedStore { inner: db.clone() });
        let dispatcher = Dispatcher::with_settings(store, registry, ctx(), settings());
        let post = due_post(&db, "mock").await;

        let summary = dispatcher.run_once(NOW).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.claimed, 0);
        assert_eq!(platform.publish_call_count(), 0);
        assert_eq!(
            db.get_post(&post.id).await.unwrap().unwrap().status,
            PostStatus::Sending
        );
    }

    #[test]
    fn test_settings_from_config() {
        let config = DispatchConfig {
            max_attempts: 0,
            ..Default::default()
        };
        let settings = DispatchSettings::from(&config);
        assert_eq!(settings.max_attempts, 1);
        assert_eq!(settings.retry_base_delay, Duration::from_millis(1_000));
        assert_eq!(settings.attempt_timeout, Duration::from_secs(120));
    }
}
