//! Account connect flow
//!
//! Drives the OAuth dance for linking a platform account: hand the browser
//! an authorization URL, then turn the callback's code into a stored
//! connection. State tokens are single-use and carry the PKCE verifier for
//! platforms that need one.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::db::Database;
use crate::error::{Result, SlatedError};
use crate::oauth_state::{StatePayload, StateStore};
use crate::platforms::PlatformAdapter;
use crate::refresher::apply_grant;
use crate::types::{Platform, SocialConnection};

pub struct ConnectService {
    db: Database,
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
    states: Arc<dyn StateStore>,
}

impl ConnectService {
    pub fn new(
        db: Database,
        adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
        states: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            db,
            adapters,
            states,
        }
    }

    fn adapter(&self, platform: Platform) -> Result<&Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).ok_or_else(|| {
            SlatedError::Validation(format!("Platform {} is not configured", platform))
        })
    }

    /// Begin the connect flow: returns the authorization URL to send the
    /// user's browser to. `scopes` overrides the platform defaults.
    pub async fn start(
        &self,
        user_id: &str,
        platform: Platform,
        scopes: Option<&str>,
    ) -> Result<String> {
        if self.db.get_user(user_id).await?.is_none() {
            return Err(SlatedError::NotFound(format!("Unknown user {}", user_id)));
        }

        let adapter = self.adapter(platform)?;
        let verifier = adapter.generate_pkce();

        let state = self.states.create(StatePayload {
            user_id: user_id.to_string(),
            platform,
            pkce_verifier: verifier.clone(),
        })?;

        let url = adapter.build_authorization_url(&state, scopes, verifier.as_deref())?;
        info!(user_id = %user_id, platform = %platform, "Connect flow started");
        Ok(url)
    }

    /// Finish the connect flow from the provider callback.
    ///
    /// Consumes the state token, exchanges the code, fetches the account
    /// identity, and stores the connection. An unknown, expired, or reused
    /// state token is rejected before any network traffic.
    pub async fn callback(&self, state: &str, code: &str) -> Result<SocialConnection> {
        let payload = self.states.consume(state)?.ok_or_else(|| {
            SlatedError::Validation("Invalid or expired state token".to_string())
        })?;

        let adapter = self.adapter(payload.platform)?;
        let grant = adapter
            .exchange_code(code, payload.pkce_verifier.as_deref())
            .await?;
        let profile = adapter.get_profile(&grant.access_token).await?;

        let now = chrono::Utc::now().timestamp();
        let connection = SocialConnection {
            user_id: payload.user_id,
            platform: payload.platform,
            provider_user_id: profile.provider_user_id,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            access_token_expires_at: grant.expires_in.map(|secs| now + secs),
            username: profile.username,
            created_at: now,
            updated_at: now,
        };

        self.db.upsert_connection(&connection).await?;
        info!(
            user_id = %connection.user_id,
            platform = %connection.platform,
            "Account connected"
        );
        Ok(connection)
    }

    /// Refresh one connection's access token on demand.
    pub async fn refresh(&self, user_id: &str, platform: Platform) -> Result<SocialConnection> {
        let connection = self
            .db
            .get_connection(user_id, platform)
            .await?
            .ok_or_else(|| {
                SlatedError::NotFound(format!("No {} connection for user {}", platform, user_id))
            })?;

        let adapter = self.adapter(platform)?;
        let grant = adapter.refresh_access_token(&connection).await?;

        let now = chrono::Utc::now().timestamp();
        let updated = apply_grant(&connection, grant, now);
        self.db.upsert_connection(&updated).await?;
        Ok(updated)
    }

    /// Remove a connection. Queued items for the platform are left alone
    /// and will fail at dispatch time if never reconnected.
    pub async fn disconnect(&self, user_id: &str, platform: Platform) -> Result<()> {
        self.db.delete_connection(user_id, platform).await?;
        info!(user_id = %user_id, platform = %platform, "Account disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth_state::MemoryStateStore;
    use crate::platforms::{MockAdapter, Profile};
    use crate::types::{UserEvent, UserEventData, UserEventKind};

    async fn db_with_user(user_id: &str) -> Database {
        let db = Database::in_memory().await.unwrap();
        let event = UserEvent {
            kind: UserEventKind::Created,
            data: UserEventData {
                id: user_id.to_string(),
                email_addresses: vec![],
                primary_email_address_id: None,
                first_name: None,
                last_name: None,
            },
        };
        db.apply_user_event(&event).await.unwrap();
        db
    }

    fn service_with(db: &Database, adapter: MockAdapter) -> ConnectService {
        let platform = adapter.platform();
        let mut adapters: HashMap<Platform, Arc<dyn PlatformAdapter>> = HashMap::new();
        adapters.insert(platform, Arc::new(adapter));
        ConnectService::new(db.clone(), adapters, Arc::new(MemoryStateStore::new()))
    }

    fn state_from_url(url: &str) -> String {
        url.split("state=").nth(1).unwrap().to_string()
    }

    #[tokio::test]
    async fn test_full_connect_flow_stores_connection() {
        let db = db_with_user("alice").await;
        let adapter = MockAdapter::with_profile(
            Platform::X,
            Profile {
                provider_user_id: "x-123".to_string(),
                username: Some("alice_x".to_string()),
            },
        );
        let service = service_with(&db, adapter);

        let url = service.start("alice", Platform::X, None).await.unwrap();
        let state = state_from_url(&url);

        let connection = service.callback(&state, "auth-code").await.unwrap();
        assert_eq!(connection.user_id, "alice");
        assert_eq!(connection.provider_user_id, "x-123");
        assert_eq!(connection.username.as_deref(), Some("alice_x"));

        let stored = db.get_connection("alice", Platform::X).await.unwrap().unwrap();
        assert_eq!(stored.access_token, connection.access_token);
        assert!(stored.access_token_expires_at.is_some());
    }

    #[tokio::test]
    async fn test_start_requires_known_user_and_platform() {
        let db = db_with_user("alice").await;
        let service = service_with(&db, MockAdapter::success(Platform::X));

        let err = service.start("nobody", Platform::X, None).await.unwrap_err();
        assert!(matches!(err, SlatedError::NotFound(_)));

        let err = service.start("alice", Platform::Threads, None).await.unwrap_err();
        assert!(matches!(err, SlatedError::Validation(_)));
    }

    #[tokio::test]
    async fn test_callback_rejects_reused_state() {
        let db = db_with_user("alice").await;
        let service = service_with(&db, MockAdapter::success(Platform::X));

        let url = service.start("alice", Platform::X, None).await.unwrap();
        let state = state_from_url(&url);

        service.callback(&state, "auth-code").await.unwrap();
        let err = service.callback(&state, "auth-code").await.unwrap_err();
        assert!(matches!(err, SlatedError::Validation(_)));
    }

    #[tokio::test]
    async fn test_callback_rejects_unknown_state() {
        let db = db_with_user("alice").await;
        let service = service_with(&db, MockAdapter::success(Platform::X));

        let err = service.callback("made-up", "auth-code").await.unwrap_err();
        assert!(matches!(err, SlatedError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reconnecting_another_users_account_conflicts() {
        let db = db_with_user("alice").await;
        let event = UserEvent {
            kind: UserEventKind::Created,
            data: UserEventData {
                id: "bob".to_string(),
                email_addresses: vec![],
                primary_email_address_id: None,
                first_name: None,
                last_name: None,
            },
        };
        db.apply_user_event(&event).await.unwrap();

        // Both users complete the flow against the same provider account.
        let service = service_with(&db, MockAdapter::success(Platform::Threads));

        let url = service.start("alice", Platform::Threads, None).await.unwrap();
        service.callback(&state_from_url(&url), "code-1").await.unwrap();

        let url = service.start("bob", Platform::Threads, None).await.unwrap();
        let err = service
            .callback(&state_from_url(&url), "code-2")
            .await
            .unwrap_err();
        assert!(matches!(err, SlatedError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_refresh_requires_existing_connection() {
        let db = db_with_user("alice").await;
        let service = service_with(&db, MockAdapter::success(Platform::X));

        let err = service.refresh("alice", Platform::X).await.unwrap_err();
        assert!(matches!(err, SlatedError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_disconnect_removes_connection() {
        let db = db_with_user("alice").await;
        let service = service_with(&db, MockAdapter::success(Platform::X));

        let url = service.start("alice", Platform::X, None).await.unwrap();
        service.callback(&state_from_url(&url), "code").await.unwrap();

        service.disconnect("alice", Platform::X).await.unwrap();
        assert!(db.get_connection("alice", Platform::X).await.unwrap().is_none());

        let err = service.disconnect("alice", Platform::X).await.unwrap_err();
        assert!(matches!(err, SlatedError::NotFound(_)));
    }
}
