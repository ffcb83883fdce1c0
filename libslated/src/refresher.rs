//! Proactive token refresh
//!
//! Walks connections whose access token expires within the lookahead window
//! and refreshes them through the platform adapter before the dispatcher
//! would hit an expired credential. Already-expired connections cannot be
//! recovered here; they are counted and logged so the user can reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::platforms::PlatformAdapter;
use crate::types::{Platform, SocialConnection};

const SECS_PER_DAY: i64 = 24 * 3600;

/// Outcome counts for one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
    /// Connections already past expiry, which only a reconnect can fix.
    pub expired: usize,
}

pub struct TokenRefresher {
    db: Database,
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
    lookahead_days: i64,
}

impl TokenRefresher {
    pub fn new(
        db: Database,
        adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
        lookahead_days: i64,
    ) -> Self {
        Self {
            db,
            adapters,
            lookahead_days,
        }
    }

    /// Run one refresh cycle against the clock value `now`.
    ///
    /// A failed refresh is logged and skipped; the connection keeps its
    /// current token and will be retried on the next cycle.
    pub async fn run_once(&self, now: i64) -> Result<RefreshSummary> {
        let mut summary = RefreshSummary::default();
        let window = self.lookahead_days * SECS_PER_DAY;

        for (platform, adapter) in &self.adapters {
            let expiring = self
                .db
                .connections_expiring_within(*platform, now, window)
                .await?;

            if expiring.is_empty() {
                debug!(platform = %platform, "No connections approaching expiry");
                continue;
            }

            for connection in expiring {
                match adapter.refresh_access_token(&connection).await {
                    Ok(grant) => {
                        let updated = apply_grant(&connection, grant, now);
                        self.db.upsert_connection(&updated).await?;
                        summary.refreshed += 1;
                        info!(
                            platform = %platform,
                            user_id = %connection.user_id,
                            "Refreshed access token"
                        );
                    }
                    Err(e) => {
                        summary.failed += 1;
                        warn!(
                            platform = %platform,
                            user_id = %connection.user_id,
                            error = %e,
                            "Token refresh failed, keeping current token"
                        );
                    }
                }
            }
        }

        let expired = self.db.expired_connections(now).await?;
        summary.expired = expired.len();
        for connection in &expired {
            warn!(
                platform = %connection.platform,
                user_id = %connection.user_id,
                "Access token expired; user must reconnect"
            );
        }

        Ok(summary)
    }
}

/// Fold a token grant into an existing connection.
///
/// A grant without a refresh companion keeps the stored refresh token, and a
/// grant without a lifetime clears the expiry rather than inventing one.
pub(crate) fn apply_grant(
    connection: &SocialConnection,
    grant: crate::platforms::TokenGrant,
    now: i64,
) -> SocialConnection {
    SocialConnection {
        access_token: grant.access_token,
        refresh_token: grant.refresh_token.or_else(|| connection.refresh_token.clone()),
        access_token_expires_at: grant.expires_in.map(|secs| now + secs),
        updated_at: now,
        ..connection.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::platforms::{MockAdapter, TokenGrant};

    fn connection(user_id: &str, platform: Platform, expires_at: Option<i64>) -> SocialConnection {
        let now = chrono::Utc::now().timestamp();
        SocialConnection {
            user_id: user_id.to_string(),
            platform,
            provider_user_id: format!("prov-{}", user_id),
            access_token: "old-access".to_string(),
            refresh_token: Some("old-refresh".to_string()),
            access_token_expires_at: expires_at,
            username: Some("handle".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn refresher_with(
        db: &Database,
        adapter: MockAdapter,
        lookahead_days: i64,
    ) -> (TokenRefresher, Arc<MockAdapter>) {
        let platform = adapter.platform();
        let adapter = Arc::new(adapter);
        let mut adapters: HashMap<Platform, Arc<dyn PlatformAdapter>> = HashMap::new();
        adapters.insert(platform, adapter.clone());
        (
            TokenRefresher::new(db.clone(), adapters, lookahead_days),
            adapter,
        )
    }

    #[tokio::test]
    async fn test_refreshes_connections_inside_window() {
        let db = Database::in_memory().await.unwrap();
        let now = chrono::Utc::now().timestamp();

        // Expires in 3 days: inside a 7-day window.
        db.upsert_connection(&connection("alice", Platform::X, Some(now + 3 * SECS_PER_DAY)))
            .await
            .unwrap();
        // Expires in 30 days: outside the window.
        db.upsert_connection(&connection("bob", Platform::X, Some(now + 30 * SECS_PER_DAY)))
            .await
            .unwrap();

        let grant = TokenGrant {
            access_token: "new-access".to_string(),
            refresh_token: Some("new-refresh".to_string()),
            expires_in: Some(7200),
        };
        let (refresher, adapter) =
            refresher_with(&db, MockAdapter::with_grant(Platform::X, grant), 7);

        let summary = refresher.run_once(now).await.unwrap();
        assert_eq!(summary.refreshed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(adapter.refresh_call_count(), 1);

        let alice = db.get_connection("alice", Platform::X).await.unwrap().unwrap();
        assert_eq!(alice.access_token, "new-access");
        assert_eq!(alice.refresh_token.as_deref(), Some("new-refresh"));
        assert_eq!(alice.access_token_expires_at, Some(now + 7200));
        // Identity fields survive the refresh.
        assert_eq!(alice.provider_user_id, "prov-alice");
        assert_eq!(alice.username.as_deref(), Some("handle"));

        let bob = db.get_connection("bob", Platform::X).await.unwrap().unwrap();
        assert_eq!(bob.access_token, "old-access");
    }

    #[tokio::test]
    async fn test_grant_without_refresh_token_keeps_stored_one() {
        let db = Database::in_memory().await.unwrap();
        let now = chrono::Utc::now().timestamp();
        db.upsert_connection(&connection("alice", Platform::Threads, Some(now + SECS_PER_DAY)))
            .await
            .unwrap();

        // Threads-style grant: new access token, no refresh companion.
        let grant = TokenGrant {
            access_token: "new-access".to_string(),
            refresh_token: None,
            expires_in: Some(60 * SECS_PER_DAY),
        };
        let (refresher, _) =
            refresher_with(&db, MockAdapter::with_grant(Platform::Threads, grant), 7);

        refresher.run_once(now).await.unwrap();

        let alice = db
            .get_connection("alice", Platform::Threads)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alice.access_token, "new-access");
        assert_eq!(alice.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[tokio::test]
    async fn test_failed_refresh_skips_and_continues() {
        let db = Database::in_memory().await.unwrap();
        let now = chrono::Utc::now().timestamp();
        db.upsert_connection(&connection("alice", Platform::X, Some(now + SECS_PER_DAY)))
            .await
            .unwrap();
        db.upsert_connection(&connection("bob", Platform::X, Some(now + 2 * SECS_PER_DAY)))
            .await
            .unwrap();

        let (refresher, adapter) = refresher_with(
            &db,
            MockAdapter::refresh_failure(
                Platform::X,
                PlatformError::Auth("revoked".to_string()),
            ),
            7,
        );

        let summary = refresher.run_once(now).await.unwrap();
        assert_eq!(summary.refreshed, 0);
        assert_eq!(summary.failed, 2);
        assert_eq!(adapter.refresh_call_count(), 2);

        // Tokens are untouched on failure.
        let alice = db.get_connection("alice", Platform::X).await.unwrap().unwrap();
        assert_eq!(alice.access_token, "old-access");
    }

    #[tokio::test]
    async fn test_expired_connections_are_counted_not_refreshed() {
        let db = Database::in_memory().await.unwrap();
        let now = chrono::Utc::now().timestamp();
        db.upsert_connection(&connection("alice", Platform::X, Some(now - SECS_PER_DAY)))
            .await
            .unwrap();

        let (refresher, adapter) = refresher_with(&db, MockAdapter::success(Platform::X), 7);

        let summary = refresher.run_once(now).await.unwrap();
        assert_eq!(summary.refreshed, 0);
        assert_eq!(summary.expired, 1);
        assert_eq!(adapter.refresh_call_count(), 0);
    }
}
