//! Core types for Slated

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SlatedError};

/// Supported publishing platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    X,
    Threads,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::X => "x",
            Platform::Threads => "threads",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = SlatedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "x" | "twitter" => Ok(Platform::X),
            "threads" => Ok(Platform::Threads),
            other => Err(SlatedError::Validation(format!(
                "Unknown platform '{}'. Valid options: x, threads",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Content of a scheduled item: a single post or an ordered thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "lowercase")]
pub enum PostContent {
    Single(String),
    Thread(Vec<String>),
}

impl PostContent {
    /// Build single-post content, rejecting blank text.
    pub fn single(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(SlatedError::Validation(
                "Post text cannot be empty".to_string(),
            ));
        }
        Ok(PostContent::Single(text))
    }

    /// Build thread content, rejecting empty threads and blank entries.
    pub fn thread(texts: Vec<String>) -> Result<Self> {
        if texts.is_empty() {
            return Err(SlatedError::Validation(
                "Thread must contain at least one post".to_string(),
            ));
        }
        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                return Err(SlatedError::Validation(format!(
                    "Thread post {} is empty",
                    i + 1
                )));
            }
        }
        Ok(PostContent::Thread(texts))
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            PostContent::Single(_) => ItemKind::Single,
            PostContent::Thread(_) => ItemKind::Thread,
        }
    }

    /// Number of individual posts this content publishes as.
    pub fn len(&self) -> usize {
        match self {
            PostContent::Single(_) => 1,
            PostContent::Thread(texts) => texts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First line of text, for display.
    pub fn preview(&self) -> &str {
        match self {
            PostContent::Single(text) => text,
            PostContent::Thread(texts) => texts.first().map(String::as_str).unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Single,
    Thread,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Single => "single",
            ItemKind::Thread => "thread",
        }
    }
}

/// Lifecycle status of a scheduled item.
///
/// Transitions are forward-only: Queued moves to exactly one of the terminal
/// states and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Queued,
    Posted,
    Failed,
    Cancelled,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Queued => "queued",
            ItemStatus::Posted => "posted",
            ItemStatus::Failed => "failed",
            ItemStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ItemStatus::Queued)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Platform-assigned identifiers of published content.
///
/// A single post has exactly one id; a thread has one id per post in order,
/// plus the platform's thread identifier where the platform assigns one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedRef {
    pub ids: Vec<String>,
    pub thread_id: Option<String>,
}

impl PostedRef {
    pub fn single(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
            thread_id: None,
        }
    }

    pub fn thread(ids: Vec<String>, thread_id: Option<String>) -> Self {
        Self { ids, thread_id }
    }
}

/// A user-authored post or thread awaiting future publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledItem {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub content: PostContent,
    /// Earliest time dispatch is permitted (unix seconds). Immutable after
    /// creation: there is no reschedule, only cancel-and-recreate.
    pub scheduled_at: i64,
    pub status: ItemStatus,
    pub posted_ref: Option<PostedRef>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScheduledItem {
    pub fn new(
        user_id: impl Into<String>,
        platform: Platform,
        content: PostContent,
        scheduled_at: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            platform,
            content,
            scheduled_at,
            status: ItemStatus::Queued,
            posted_ref: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stored OAuth credentials linking a user to one external platform account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialConnection {
    pub user_id: String,
    pub platform: Platform,
    /// The platform's own identifier for the connected account.
    pub provider_user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds; absent means the token does not expire or the expiry
    /// is unknown.
    pub access_token_expires_at: Option<i64>,
    pub username: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SocialConnection {
    /// Validate the fields required for storage.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(SlatedError::Validation("user_id is required".to_string()));
        }
        if self.provider_user_id.trim().is_empty() {
            return Err(SlatedError::Validation(
                "provider_user_id is required".to_string(),
            ));
        }
        if self.access_token.trim().is_empty() {
            return Err(SlatedError::Validation(
                "access_token is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// A user mirrored from the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A verified user-lifecycle event from the identity provider webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEvent {
    #[serde(rename = "type")]
    pub kind: UserEventKind,
    pub data: UserEventData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum UserEventKind {
    #[serde(rename = "user.created")]
    Created,
    #[serde(rename = "user.updated")]
    Updated,
    #[serde(rename = "user.deleted")]
    Deleted,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEventData {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    pub primary_email_address_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAddress {
    pub id: String,
    pub email_address: String,
}

impl UserEventData {
    /// Resolve the primary email address, falling back to the first one.
    pub fn primary_email(&self) -> Option<&str> {
        if let Some(primary_id) = &self.primary_email_address_id {
            if let Some(addr) = self.email_addresses.iter().find(|a| &a.id == primary_id) {
                return Some(&addr.email_address);
            }
        }
        self.email_addresses.first().map(|a| a.email_address.as_str())
    }
}
