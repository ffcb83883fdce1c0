//! Platform adapters
//!
//! Each supported platform implements [`PlatformAdapter`], which covers both
//! halves of the integration: the OAuth lifecycle (authorize, exchange,
//! refresh) and publishing. The dispatcher and connect service only ever see
//! this trait.

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::types::{Platform, PostContent, PostedRef, SocialConnection};

pub mod mock;
pub mod threads;
pub mod x;

pub use mock::MockAdapter;
pub use threads::ThreadsAdapter;
pub use x::XAdapter;

/// Tokens returned by a code exchange or a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Not every grant carries a refresh companion.
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, when the platform reports one.
    pub expires_in: Option<i64>,
}

/// The connected account's identity on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub provider_user_id: String,
    pub username: Option<String>,
}


/// Everything the dispatch and connect flows need from a platform.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Which platform this adapter talks to
    fn platform(&self) -> Platform;

    /// Generate a PKCE code verifier, for platforms whose flow requires one.
    ///
    /// The caller stashes the verifier alongside the state token so the
    /// callback can present it on exchange.
    fn generate_pkce(&self) -> Option<String>;

    /// Build the browser authorization URL for the connect flow.
    ///
    /// Pure URL construction; no network traffic. `state` is the opaque
    /// token the callback must echo back. `scopes` overrides the adapter's
    /// default scope set when given.
    fn build_authorization_url(
        &self,
        state: &str,
        scopes: Option<&str>,
        pkce_verifier: Option<&str>,
    ) -> Result<String, PlatformError>;

    /// Exchange an authorization code for tokens.
    ///
    /// `pkce_verifier` carries the code verifier for platforms whose flow
    /// requires PKCE.
    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<TokenGrant, PlatformError>;

    /// Obtain a fresh access token for an existing connection.
    async fn refresh_access_token(
        &self,
        connection: &SocialConnection,
    ) -> Result<TokenGrant, PlatformError>;

    /// Fetch the authenticated account's identity.
    async fn get_profile(&self, access_token: &str) -> Result<Profile, PlatformError>;

    /// Publish a single post or a thread.
    ///
    /// Thread segments are published in order, each a reply to the previous
    /// one. A mid-thread failure surfaces as an error whose message names the
    /// segments that did go out.
    async fn publish(
        &self,
        access_token: &str,
        content: &PostContent,
    ) -> Result<PostedRef, PlatformError>;

    /// Delete a previously published post.
    ///
    /// Nothing in the dispatch path calls this (partial thread publishes are
    /// recorded, not rolled back); it exists for caller-driven takedowns.
    async fn delete_post(&self, access_token: &str, post_id: &str)
        -> Result<(), PlatformError>;
}
