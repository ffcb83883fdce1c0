//! Due-item dispatch
//!
//! One poll cycle: load queued items whose time has passed, publish each
//! through its platform adapter, and record the terminal outcome. Items are
//! processed sequentially in due order so a failure on one never blocks or
//! fails the rest of the batch.
//!
//! Failures are terminal on first occurrence. There is no retry, including
//! for rate limits: a retried batch would double-post the items that did
//! succeed before the limit hit.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{Result, SlatedError};
use crate::platforms::PlatformAdapter;
use crate::types::{Platform, PostedRef, ScheduledItem};

/// Outcome counts for one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub processed: usize,
    pub posted: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    db: Database,
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
    batch_limit: i64,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
        batch_limit: i64,
    ) -> Self {
        Self {
            db,
            adapters,
            batch_limit,
        }
    }

    /// Run one dispatch cycle against the clock value `now`.
    ///
    /// Returns an error only when the store itself fails; per-item publish
    /// failures are recorded on the item and counted in the summary.
    pub async fn run_once(&self, now: i64) -> Result<DispatchSummary> {
        let due = self.db.find_due(now, self.batch_limit).await?;
        let mut summary = DispatchSummary::default();

        if due.is_empty() {
            debug!("No items due");
            return Ok(summary);
        }

        info!(count = due.len(), "Dispatching due items");

        for item in due {
            summary.processed += 1;

            match self.dispatch_item(&item).await {
                Ok(posted_ref) => {
                    self.db.mark_posted(&item.id, &posted_ref).await?;
                    summary.posted += 1;
                    info!(
                        item_id = %item.id,
                        platform = %item.platform,
                        ids = ?posted_ref.ids,
                        "Item posted"
                    );
                }
                // Store failures abort the cycle; everything else is a
                // terminal failure on this item only.
                Err(SlatedError::Database(e)) => return Err(SlatedError::Database(e)),
                Err(e) => {
                    let message = e.to_string();
                    self.db.mark_failed(&item.id, &message).await?;
                    summary.failed += 1;
                    warn!(
                        item_id = %item.id,
                        platform = %item.platform,
                        error = %message,
                        "Item failed"
                    );
                }
            }
        }

        Ok(summary)
    }

    async fn dispatch_item(&self, item: &ScheduledItem) -> Result<PostedRef> {
        // The owning user may have been deleted since the item was queued.
        if self.db.get_user(&item.user_id).await?.is_none() {
            return Err(SlatedError::NotFound(format!(
                "User {} no longer exists",
                item.user_id
            )));
        }

        let connection = self
            .db
            .get_connection(&item.user_id, item.platform)
            .await?
            .ok_or_else(|| {
                SlatedError::NotFound(format!(
                    "No {} connection for user {}",
                    item.platform, item.user_id
                ))
            })?;

        let adapter = self.adapters.get(&item.platform).ok_or_else(|| {
            SlatedError::Validation(format!("No adapter registered for {}", item.platform))
        })?;

        let posted_ref = adapter.publish(&connection.access_token, &item.content).await?;
        Ok(posted_ref)
    }
}
