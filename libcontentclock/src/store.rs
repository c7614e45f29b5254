//! The record store as seen by the dispatcher

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Connection, ScheduledPost};

/// Persistence operations the dispatch core depends on.
///
/// `Database` is the production implementation. Tests substitute their own
/// to inject store failures.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Posts with status `scheduled`, `publish_at <= now` and no deletion
    /// mark, in insertion order.
    async fn due_posts(&self, now: i64) -> Result<Vec<ScheduledPost>>;

    /// Move a post from `scheduled` to `sending`.
    ///
    /// Returns `false` when the post was no longer `scheduled`, meaning
    /// another tick or process owns it.
    async fn claim_post(&self, post_id: &str, now: i64) -> Result<bool>;

    /// Live connection by id; soft-deleted connections are not returned.
    async fn get_connection(&self, connection_id: &str) -> Result<Option<Connection>>;

    async fn mark_published(&self, post_id: &str, published_id: &str, now: i64) -> Result<()>;

    async fn mark_failed(&self, post_id: &str, logs: &str, now: i64) -> Result<()>;

    /// Posts that have been `sending` since before `updated_before`.
    async fn stuck_posts(&self, updated_before: i64) -> Result<Vec<ScheduledPost>>;
}
