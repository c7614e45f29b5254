//! Delivery outcome recording
//!
//! The only writer of final post state. Store failures are logged and
//! swallowed; the reconciliation sweep in the dispatcher picks up posts a
//! failed write leaves in `sending`.

use std::sync::Arc;

use crate::store::PostStore;
use crate::types::DeliveryOutcome;

#[derive(Clone)]
pub struct OutcomeRecorder {
    store: Arc<dyn PostStore>,
}

impl OutcomeRecorder {
    pub fn new(store: Arc<dyn PostStore>) -> Self {
        Self { store }
    }

    /// Persist an outcome and emit one structured event for it.
    ///
    /// Returns whether the store write succeeded. Writing the same outcome
    /// twice leaves the post unchanged apart from `updated_at`.
    pub async fn record(
        &self,
        platform: &str,
        post_id: &str,
        outcome: &DeliveryOutcome,
        now: i64,
    ) -> bool {
        match outcome {
            DeliveryOutcome::Published { published_id } => {
                tracing::info!(
                    platform = %platform,
                    post_id = %post_id,
                    published_id = %published_id,
                    "Post published"
                );

                match self.store.mark_published(post_id, published_id, now).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(
                            platform = %platform,
                            post_id = %post_id,
                            published_id = %published_id,
                            error = %e,
                            "Failed to record published post"
                        );
                        false
                    }
                }
            }
            DeliveryOutcome::Failed { error } => {
                let logs = error.to_string();
                tracing::warn!(
                    platform = %platform,
                    post_id = %post_id,
                    error = %logs,
                    "Post delivery failed"
                );

                match self.store.mark_failed(post_id, &logs, now).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(
                            platform = %platform,
                            post_id = %post_id,
                            error = %e,
                            delivery_error = %logs,
                            "Failed to record delivery failure"
                        );
                        false
                    }
                }
            }
        }
    }
}
