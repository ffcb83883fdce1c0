//! Database operations for Slated
//!
//! Holds the three persisted stores the dispatcher depends on: scheduled
//! items, social connections, and the mirrored user table. All mutation goes
//! through the narrow operation set defined here; no other component touches
//! the pool directly.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result, SlatedError};
use crate::types::{
    ItemStatus, Platform, PostContent, PostedRef, ScheduledItem, SocialConnection, User,
    UserEvent, UserEventKind,
};

/// Default cap for list and find-due queries.
pub const DEFAULT_LIMIT: i64 = 50;

/// Counts of scheduled items per status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: i64,
    pub posted: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Use forward slashes for SQLite URL and mode=rwc so the file is
        // created if it does not exist yet.
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Open an in-memory database with migrations applied.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;
        Ok(Self { pool })
    }

    // ========================================================================
    // Scheduled items
    // ========================================================================

    /// Persist a new scheduled item
    pub async fn create_item(&self, item: &ScheduledItem) -> Result<()> {
        let (kind, body) = encode_content(&item.content)?;
        let posted_ref = encode_posted_ref(item.posted_ref.as_ref())?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_items
                (id, user_id, platform, kind, body, scheduled_at, status,
                 posted_ref, error_message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.user_id)
        .bind(item.platform.as_str())
        .bind(kind)
        .bind(body)
        .bind(item.scheduled_at)
        .bind(item.status.as_str())
        .bind(posted_ref)
        .bind(&item.error_message)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get a scheduled item by ID
    pub async fn get_item(&self, item_id: &str) -> Result<Option<ScheduledItem>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, platform, kind, body, scheduled_at, status,
                   posted_ref, error_message, created_at, updated_at
            FROM scheduled_items WHERE id = ?
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(item_from_row).transpose()
    }

    /// List a user's scheduled items, most imminent first
    pub async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<ScheduledItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, platform, kind, body, scheduled_at, status,
                   posted_ref, error_message, created_at, updated_at
            FROM scheduled_items
            WHERE user_id = ?
            ORDER BY scheduled_at ASC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(item_from_row).collect()
    }

    /// Queued items whose scheduled time has passed, oldest-due first.
    ///
    /// Capped at `limit` per poll to bound batch size.
    pub async fn find_due(&self, now: i64, limit: i64) -> Result<Vec<ScheduledItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, platform, kind, body, scheduled_at, status,
                   posted_ref, error_message, created_at, updated_at
            FROM scheduled_items
            WHERE status = 'queued' AND scheduled_at <= ?
            ORDER BY scheduled_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(item_from_row).collect()
    }

    /// Cancel a queued item owned by `user_id`.
    ///
    /// Returns the number of rows affected (0 or 1). A 0 result is not an
    /// error: the item may already be terminal or owned by someone else, and
    /// callers must tolerate that race.
    pub async fn cancel_item(&self, user_id: &str, item_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_items
            SET status = 'cancelled', updated_at = ?
            WHERE id = ? AND user_id = ? AND status = 'queued'
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    /// Record a successful dispatch.
    ///
    /// Unconditional write performed only by the dispatcher: it may overwrite
    /// a concurrent cancellation (accepted last-write-wins race).
    pub async fn mark_posted(&self, item_id: &str, posted_ref: &PostedRef) -> Result<()> {
        let encoded = serde_json::to_string(posted_ref)
            .map_err(|e| DbError::CorruptRow(format!("posted_ref encode: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE scheduled_items
            SET status = 'posted', posted_ref = ?, error_message = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(encoded)
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Record a failed dispatch. Unconditional, dispatcher-only write.
    pub async fn mark_failed(&self, item_id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_items
            SET status = 'failed', error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error_message)
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Per-status item counts
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM scheduled_items
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            match status.as_str() {
                "queued" => stats.queued = count,
                "posted" => stats.posted = count,
                "failed" => stats.failed = count,
                "cancelled" => stats.cancelled = count,
                _ => {}
            }
        }

        Ok(stats)
    }

    // ========================================================================
    // Social connections
    // ========================================================================

    /// Create or replace the credential for (user, platform).
    ///
    /// Re-linking the same provider account under the same user is an
    /// idempotent replace. Linking a provider account already owned by a
    /// different user fails with a Conflict and leaves the existing
    /// connection untouched.
    pub async fn upsert_connection(&self, conn: &SocialConnection) -> Result<()> {
        conn.validate()?;

        // Cross-user ownership check up front so the caller gets a typed
        // conflict rather than a raw constraint error.
        let existing = sqlx::query(
            r#"
            SELECT user_id FROM social_connections
            WHERE platform = ? AND provider_user_id = ?
            "#,
        )
        .bind(conn.platform.as_str())
        .bind(&conn.provider_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if let Some(row) = existing {
            let owner: String = row.get("user_id");
            if owner != conn.user_id {
                return Err(SlatedError::Conflict(format!(
                    "{} account {} is already linked to another user",
                    conn.platform, conn.provider_user_id
                )));
            }
        }

        let result = sqlx::query(
            r#"
            INSERT INTO social_connections
                (user_id, platform, provider_user_id, access_token, refresh_token,
                 access_token_expires_at, username, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, platform) DO UPDATE SET
                provider_user_id = excluded.provider_user_id,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                access_token_expires_at = excluded.access_token_expires_at,
                username = excluded.username,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&conn.user_id)
        .bind(conn.platform.as_str())
        .bind(&conn.provider_user_id)
        .bind(&conn.access_token)
        .bind(&conn.refresh_token)
        .bind(conn.access_token_expires_at)
        .bind(&conn.username)
        .bind(conn.created_at)
        .bind(conn.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // Race on the provider uniqueness index between the check above
            // and the insert.
            Err(e) if is_unique_violation(&e) => Err(SlatedError::Conflict(format!(
                "{} account {} is already linked to another user",
                conn.platform, conn.provider_user_id
            ))),
            Err(e) => Err(DbError::SqlxError(e).into()),
        }
    }

    /// Get the credential for (user, platform), if any
    pub async fn get_connection(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<SocialConnection>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, platform, provider_user_id, access_token, refresh_token,
                   access_token_expires_at, username, created_at, updated_at
            FROM social_connections
            WHERE user_id = ? AND platform = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(connection_from_row).transpose()
    }

    /// Remove the credential for (user, platform)
    pub async fn delete_connection(&self, user_id: &str, platform: Platform) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM social_connections WHERE user_id = ? AND platform = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(SlatedError::NotFound(format!(
                "No {} connection for user {}",
                platform, user_id
            )));
        }

        Ok(())
    }

    /// Connections on `platform` expiring within the window, excluding ones
    /// that have already expired.
    pub async fn connections_expiring_within(
        &self,
        platform: Platform,
        now: i64,
        window_secs: i64,
    ) -> Result<Vec<SocialConnection>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, platform, provider_user_id, access_token, refresh_token,
                   access_token_expires_at, username, created_at, updated_at
            FROM social_connections
            WHERE platform = ?
              AND access_token_expires_at IS NOT NULL
              AND access_token_expires_at > ?
              AND access_token_expires_at <= ?
            ORDER BY access_token_expires_at ASC
            "#,
        )
        .bind(platform.as_str())
        .bind(now)
        .bind(now + window_secs)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(connection_from_row).collect()
    }

    /// Connections whose access token has already expired.
    ///
    /// These are reported, never auto-deleted: the user must re-authenticate.
    pub async fn expired_connections(&self, now: i64) -> Result<Vec<SocialConnection>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, platform, provider_user_id, access_token, refresh_token,
                   access_token_expires_at, username, created_at, updated_at
            FROM social_connections
            WHERE access_token_expires_at IS NOT NULL
              AND access_token_expires_at <= ?
            ORDER BY access_token_expires_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(connection_from_row).collect()
    }

    // ========================================================================
    // User mirror
    // ========================================================================

    /// Apply a verified identity-provider lifecycle event.
    pub async fn apply_user_event(&self, event: &UserEvent) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        match event.kind {
            UserEventKind::Created | UserEventKind::Updated => {
                sqlx::query(
                    r#"
                    INSERT INTO users (id, email, first_name, last_name, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        email = excluded.email,
                        first_name = excluded.first_name,
                        last_name = excluded.last_name,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&event.data.id)
                .bind(event.data.primary_email())
                .bind(&event.data.first_name)
                .bind(&event.data.last_name)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;
            }
            UserEventKind::Deleted => {
                sqlx::query(r#"DELETE FROM users WHERE id = ?"#)
                    .bind(&event.data.id)
                    .execute(&self.pool)
                    .await
                    .map_err(DbError::SqlxError)?;
            }
        }

        Ok(())
    }

    /// Get a mirrored user by ID
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, first_name, last_name, created_at, updated_at
            FROM users WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| User {
            id: r.get("id"),
            email: r.get("email"),
            first_name: r.get("first_name"),
            last_name: r.get("last_name"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn encode_content(content: &PostContent) -> Result<(&'static str, String)> {
    match content {
        PostContent::Single(text) => Ok(("single", text.clone())),
        PostContent::Thread(texts) => {
            let body = serde_json::to_string(texts)
                .map_err(|e| DbError::CorruptRow(format!("thread encode: {}", e)))?;
            Ok(("thread", body))
        }
    }
}

fn encode_posted_ref(posted_ref: Option<&PostedRef>) -> Result<Option<String>> {
    posted_ref
        .map(|p| {
            serde_json::to_string(p)
                .map_err(|e| DbError::CorruptRow(format!("posted_ref encode: {}", e)).into())
        })
        .transpose()
}

fn item_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ScheduledItem> {
    let platform: String = row.get("platform");
    let platform = platform.parse::<Platform>()?;

    let kind: String = row.get("kind");
    let body: String = row.get("body");
    let content = match kind.as_str() {
        "single" => PostContent::Single(body),
        "thread" => {
            let texts: Vec<String> = serde_json::from_str(&body)
                .map_err(|e| DbError::CorruptRow(format!("thread body: {}", e)))?;
            PostContent::Thread(texts)
        }
        other => {
            return Err(DbError::CorruptRow(format!("unknown item kind '{}'", other)).into());
        }
    };

    let status = match row.get::<String, _>("status").as_str() {
        "posted" => ItemStatus::Posted,
        "failed" => ItemStatus::Failed,
        "cancelled" => ItemStatus::Cancelled,
        _ => ItemStatus::Queued,
    };

    let posted_ref: Option<String> = row.get("posted_ref");
    let posted_ref = posted_ref
        .map(|raw| {
            serde_json::from_str::<PostedRef>(&raw)
                .map_err(|e| DbError::CorruptRow(format!("posted_ref: {}", e)))
        })
        .transpose()?;

    Ok(ScheduledItem {
        id: row.get("id"),
        user_id: row.get("user_id"),
        platform,
        content,
        scheduled_at: row.get("scheduled_at"),
        status,
        posted_ref,
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn connection_from_row(row: sqlx::sqlite::SqliteRow) -> Result<SocialConnection> {
    let platform: String = row.get("platform");
    Ok(SocialConnection {
        user_id: row.get("user_id"),
        platform: platform.parse::<Platform>()?,
        provider_user_id: row.get("provider_user_id"),
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        access_token_expires_at: row.get("access_token_expires_at"),
        username: row.get("username"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
