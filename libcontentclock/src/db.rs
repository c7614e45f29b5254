//! SQLite record store

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::store::PostStore;
use crate::types::{Connection, PostStatus, ScheduledPost};

const POST_COLUMNS: &str = "id, title, content, link, images, connection_id, subreddit, \
     publish_at, status, published_post_id, logs, created_at, updated_at, deleted_at";

const CONNECTION_COLUMNS: &str = "id, user_id, name, username, platform, account_id, \
     access_token, refresh_token, metadata, profile_image, timezone, created_at, deleted_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        // mode=rwc creates the file on first open
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::migrate(pool).await
    }

    /// A private in-memory database, used by tests and dry runs.
    ///
    /// A single connection keeps every query on the same memory image.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub async fn create_post(&self, post: &ScheduledPost) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, title, content, link, images, connection_id, subreddit,
                               publish_at, status, published_post_id, logs,
                               created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.link)
        .bind(&post.images)
        .bind(&post.connection_id)
        .bind(&post.subreddit)
        .bind(post.publish_at)
        .bind(post.status.as_str())
        .bind(&post.published_post_id)
        .bind(&post.logs)
        .bind(post.created_at)
        .bind(post.updated_at)
        .bind(post.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn create_connection(&self, connection: &Connection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO connections (id, user_id, name, username, platform, account_id,
                                     access_token, refresh_token, metadata, profile_image,
                                     timezone, created_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&connection.id)
        .bind(&connection.user_id)
        .bind(&connection.name)
        .bind(&connection.username)
        .bind(&connection.platform)
        .bind(&connection.account_id)
        .bind(connection.access_token.expose_secret())
        .bind(connection.refresh_token.as_ref().map(|t| t.expose_secret().to_string()))
        .bind(&connection.metadata)
        .bind(&connection.profile_image)
        .bind(&connection.timezone)
        .bind(connection.created_at)
        .bind(connection.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get a post by ID, including soft-deleted ones
    pub async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    pub async fn soft_delete_post(&self, post_id: &str, now: i64) -> Result<()> {
        sqlx::query("UPDATE posts SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn list_posts_by_status(&self, status: PostStatus) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE status = ? ORDER BY rowid",
            POST_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }
}

#[async_trait]
impl PostStore for Database {
    async fn due_posts(&self, now: i64) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM posts
            WHERE status = 'scheduled' AND publish_at <= ? AND deleted_at IS NULL
            ORDER BY rowid
            "#,
            POST_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    async fn claim_post(&self, post_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET status = 'sending', updated_at = ?
            WHERE id = ? AND status = 'scheduled' AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_connection(&self, connection_id: &str) -> Result<Option<Connection>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM connections WHERE id = ? AND deleted_at IS NULL",
            CONNECTION_COLUMNS
        ))
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.as_ref().map(connection_from_row))
    }

    async fn mark_published(&self, post_id: &str, published_id: &str, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET status = 'published', published_post_id = ?, logs = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(published_id)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn mark_failed(&self, post_id: &str, logs: &str, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET status = 'failed', published_post_id = NULL, logs = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(logs)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn stuck_posts(&self, updated_before: i64) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE status = 'sending' AND updated_at < ? ORDER BY rowid",
            POST_COLUMNS
        ))
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }
}

fn post_from_row(r: &SqliteRow) -> Result<ScheduledPost> {
    let status: String = r.get("status");
    let status = status.parse::<PostStatus>().map_err(|reason| DbError::CorruptRow {
        table: "posts",
        reason,
    })?;

    Ok(ScheduledPost {
        id: r.get("id"),
        title: r.get("title"),
        content: r.get("content"),
        link: r.get("link"),
        images: r.get("images"),
        connection_id: r.get("connection_id"),
        subreddit: r.get("subreddit"),
        publish_at: r.get("publish_at"),
        status,
        published_post_id: r.get("published_post_id"),
        logs: r.get("logs"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        deleted_at: r.get("deleted_at"),
    })
}

fn connection_from_row(r: &SqliteRow) -> Connection {
    let access_token: String = r.get("access_token");
    let refresh_token: Option<String> = r.get("refresh_token");

    Connection {
        id: r.get("id"),
        user_id: r.get("user_id"),
        name: r.get("name"),
        username: r.get("username"),
        platform: r.get("platform"),
        account_id: r.get("account_id"),
        access_token: SecretString::from(access_token),
        refresh_token: refresh_token
            .filter(|t| !t.is_empty())
            .map(SecretString::from),
        metadata: r.get("metadata"),
        profile_image: r.get("profile_image"),
        timezone: r.get("timezone"),
        created_at: r.get("created_at"),
        deleted_at: r.get("deleted_at"),
    }
}
