//! Content Clock - scheduled social media delivery
//!
//! This library selects due posts from the record store, publishes each one
//! through its platform adapter and records the outcome on the post.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod logging;
pub mod media;
pub mod mock;
pub mod oauth1;
pub mod platforms;
pub mod recorder;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use dispatch::{Dispatcher, TickSummary};
pub use error::{ClockError, PlatformError, Result};
pub use platforms::{Platform, PlatformRegistry, PublishContext};
pub use recorder::OutcomeRecorder;
pub use store::PostStore;
pub use types::{Connection, DeliveryOutcome, PostStatus, ScheduledPost};
