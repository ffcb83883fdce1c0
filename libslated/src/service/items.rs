//! Scheduled item operations
//!
//! Validation and ownership checks on top of the raw store. Content
//! validation itself lives on [`PostContent`]; this layer adds the
//! user-existence check and the cancel semantics.

use tracing::info;

use crate::db::{Database, QueueStats, DEFAULT_LIMIT};
use crate::error::{Result, SlatedError};
use crate::types::{Platform, PostContent, ScheduledItem};

pub struct ItemService {
    db: Database,
}

impl ItemService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Queue content for publication at `scheduled_at`.
    ///
    /// The user must already be mirrored locally. A time in the past is
    /// accepted; the item simply becomes due on the next dispatch cycle.
    pub async fn schedule(
        &self,
        user_id: &str,
        platform: Platform,
        content: PostContent,
        scheduled_at: i64,
    ) -> Result<ScheduledItem> {
        if self.db.get_user(user_id).await?.is_none() {
            return Err(SlatedError::NotFound(format!("Unknown user {}", user_id)));
        }

        let item = ScheduledItem::new(user_id, platform, content, scheduled_at);
        self.db.create_item(&item).await?;

        info!(
            item_id = %item.id,
            user_id = %user_id,
            platform = %platform,
            scheduled_at = scheduled_at,
            "Item scheduled"
        );
        Ok(item)
    }

    /// List the user's items, most imminent first.
    pub async fn list(&self, user_id: &str, limit: Option<i64>) -> Result<Vec<ScheduledItem>> {
        self.db
            .list_for_user(user_id, limit.unwrap_or(DEFAULT_LIMIT))
            .await
    }

    /// Cancel a queued item.
    ///
    /// Returns how many items changed state (0 or 1). Cancelling an item
    /// that is already terminal, unknown, or not owned by `user_id` is a
    /// zero-count no-op rather than an error.
    pub async fn cancel(&self, user_id: &str, item_id: &str) -> Result<u64> {
        let cancelled = self.db.cancel_item(user_id, item_id).await?;
        if cancelled > 0 {
            info!(item_id = %item_id, user_id = %user_id, "Item cancelled");
        }
        Ok(cancelled)
    }

    /// Per-status queue counts.
    pub async fn stats(&self) -> Result<QueueStats> {
        self.db.queue_stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemStatus, UserEvent, UserEventData, UserEventKind};

    async fn setup() -> (ItemService, Database) {
        let db = Database::in_memory().await.unwrap();
        let event = UserEvent {
            kind: UserEventKind::Created,
            data: UserEventData {
                id: "alice".to_string(),
                email_addresses: vec![],
                primary_email_address_id: None,
                first_name: None,
                last_name: None,
            },
        };
        db.apply_user_event(&event).await.unwrap();
        (ItemService::new(db.clone()), db)
    }

    #[tokio::test]
    async fn test_schedule_requires_known_user() {
        let (service, _) = setup().await;
        let content = PostContent::single("hi").unwrap();

        let err = service
            .schedule("nobody", Platform::X, content, 1_900_000_000)
            .await
            .unwrap_err();
        assert!(matches!(err, SlatedError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_schedule_and_list() {
        let (service, _) = setup().await;
        let content = PostContent::single("hi").unwrap();

        let item = service
            .schedule("alice", Platform::Threads, content, 1_900_000_000)
            .await
            .unwrap();
        assert_eq!(item.status, ItemStatus::Queued);

        let items = service.list("alice", None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, item.id);
    }

    #[tokio::test]
    async fn test_schedule_in_the_past_is_accepted() {
        let (service, _) = setup().await;
        let content = PostContent::single("late").unwrap();
        let past = chrono::Utc::now().timestamp() - 3600;

        let item = service
            .schedule("alice", Platform::X, content, past)
            .await
            .unwrap();
        assert_eq!(item.scheduled_at, past);
        assert_eq!(item.status, ItemStatus::Queued);
    }

    #[tokio::test]
    async fn test_cancel_counts() {
        let (service, _) = setup().await;
        let content = PostContent::single("hi").unwrap();
        let item = service
            .schedule("alice", Platform::X, content, 1_900_000_000)
            .await
            .unwrap();

        assert_eq!(service.cancel("alice", &item.id).await.unwrap(), 1);
        assert_eq!(service.cancel("alice", &item.id).await.unwrap(), 0);
        assert_eq!(service.cancel("alice", "no-such-item").await.unwrap(), 0);
    }
}
