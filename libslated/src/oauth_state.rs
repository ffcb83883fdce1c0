//! Short-lived OAuth state tokens
//!
//! The connect flow hands the browser an opaque `state` value and must see
//! the exact same value come back on the callback. Each token is single-use
//! and carries an opaque payload (the user id, and for PKCE flows the code
//! verifier) that the callback needs to finish the exchange.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SlatedError};
use crate::types::Platform;

/// Default lifetime for an issued state token.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// What the callback needs to recover when the state token comes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub user_id: String,
    pub platform: Platform,
    /// PKCE code verifier, for platforms that require one.
    pub pkce_verifier: Option<String>,
}

/// Issues and redeems single-use OAuth state tokens.
pub trait StateStore: Send + Sync {
    /// Issue a fresh unguessable token bound to `payload`.
    fn create(&self, payload: StatePayload) -> Result<String>;

    /// Redeem a token, consuming it. Returns `None` for unknown, expired,
    /// or already-used tokens.
    fn consume(&self, token: &str) -> Result<Option<StatePayload>>;
}

struct Entry {
    payload: StatePayload,
    issued_at: Instant,
}

/// In-process state store backed by a mutex-guarded map.
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_STATE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| SlatedError::Validation("state store lock poisoned".to_string()))
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn create(&self, payload: StatePayload) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        let mut entries = self.lock()?;

        // Opportunistic sweep of expired entries so the map cannot grow
        // without bound on abandoned flows.
        let ttl = self.ttl;
        entries.retain(|_, e| e.issued_at.elapsed() < ttl);

        entries.insert(
            token.clone(),
            Entry {
                payload,
                issued_at: Instant::now(),
            },
        );
        Ok(token)
    }

    fn consume(&self, token: &str) -> Result<Option<StatePayload>> {
        let mut entries = self.lock()?;
        match entries.remove(token) {
            Some(entry) if entry.issued_at.elapsed() < self.ttl => Ok(Some(entry.payload)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> StatePayload {
        StatePayload {
            user_id: "user-1".to_string(),
            platform: Platform::X,
            pkce_verifier: Some("verifier".to_string()),
        }
    }

    #[test]
    fn test_consume_returns_payload_once() {
        let store = MemoryStateStore::new();
        let token = store.create(payload()).unwrap();

        let first = store.consume(&token).unwrap();
        assert_eq!(first, Some(payload()));

        // Second redemption fails: tokens are single-use.
        assert_eq!(store.consume(&token).unwrap(), None);
    }

    #[test]
    fn test_unknown_token_is_none() {
        let store = MemoryStateStore::new();
        assert_eq!(store.consume("nope").unwrap(), None);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let store = MemoryStateStore::with_ttl(Duration::ZERO);
        let token = store.create(payload()).unwrap();
        assert_eq!(store.consume(&token).unwrap(), None);
    }

    #[test]
    fn test_tokens_are_distinct() {
        let store = MemoryStateStore::new();
        let a = store.create(payload()).unwrap();
        let b = store.create(payload()).unwrap();
        assert_ne!(a, b);
    }
}
