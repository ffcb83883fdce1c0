//! Threads platform adapter
//!
//! Uses the Threads Graph API. The token lifecycle differs from X in two
//! ways: the code exchange is two-step (a short-lived token is immediately
//! traded for a 60-day long-lived one), and refresh presents the current
//! access token itself rather than a separate refresh credential.
//!
//! Publishing is two-phase: create a media container, then publish it.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::config::ThreadsAppConfig;
use crate::error::PlatformError;
use crate::types::{Platform, PostContent, PostedRef, SocialConnection};

use super::x::{error_from_response, partial_thread_error};
use super::{PlatformAdapter, Profile, TokenGrant};

const AUTHORIZE_URL: &str = "https://threads.net/oauth/authorize";
const SHORT_TOKEN_URL: &str = "https://graph.threads.net/oauth/access_token";
const LONG_TOKEN_URL: &str = "https://graph.threads.net/access_token";
const REFRESH_URL: &str = "https://graph.threads.net/refresh_access_token";
const GRAPH_URL: &str = "https://graph.threads.net/v1.0";

const SCOPES: &str = "threads_basic,threads_content_publish";

/// Assumed lifetime of a short-lived token when the long-lived exchange
/// could not be completed.
const SHORT_TOKEN_LIFETIME_SECS: i64 = 3600;

pub struct ThreadsAdapter {
    client: reqwest::Client,
    app_id: String,
    app_secret: String,
    redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct ShortTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct LongTokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    id: String,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContainerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    id: String,
}

impl ThreadsAdapter {
    pub fn new(config: &ThreadsAppConfig) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        Ok(Self {
            client,
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    /// Trade a short-lived token for a 60-day long-lived one.
    async fn exchange_long_lived(&self, short_token: &str) -> Result<TokenGrant, PlatformError> {
        let response = self
            .client
            .get(LONG_TOKEN_URL)
            .query(&[
                ("grant_type", "th_exchange_token"),
                ("client_secret", self.app_secret.as_str()),
                ("access_token", short_token),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let token: LongTokenResponse = response.json().await?;
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: None,
            expires_in: token.expires_in,
        })
    }

    /// Create a text media container, optionally as a reply.
    async fn create_container(
        &self,
        access_token: &str,
        text: &str,
        reply_to_id: Option<&str>,
    ) -> Result<String, PlatformError> {
        let mut params: Vec<(&str, &str)> = vec![
            ("media_type", "TEXT"),
            ("text", text),
            ("access_token", access_token),
        ];
        if let Some(id) = reply_to_id {
            params.push(("reply_to_id", id));
        }

        let response = self
            .client
            .post(format!("{}/me/threads", GRAPH_URL))
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let container: ContainerResponse = response.json().await?;
        Ok(container.id)
    }

    async fn publish_container(
        &self,
        access_token: &str,
        container_id: &str,
    ) -> Result<String, PlatformError> {
        let response = self
            .client
            .post(format!("{}/me/threads_publish", GRAPH_URL))
            .form(&[
                ("creation_id", container_id),
                ("access_token", access_token),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let published: PublishResponse = response.json().await?;
        Ok(published.id)
    }

    async fn publish_one(
        &self,
        access_token: &str,
        text: &str,
        reply_to_id: Option<&str>,
    ) -> Result<String, PlatformError> {
        let container = self.create_container(access_token, text, reply_to_id).await?;
        self.publish_container(access_token, &container).await
    }
}

#[async_trait]
impl PlatformAdapter for ThreadsAdapter {
    fn platform(&self) -> Platform {
        Platform::Threads
    }

    fn generate_pkce(&self) -> Option<String> {
        None
    }

    fn build_authorization_url(
        &self,
        state: &str,
        scopes: Option<&str>,
        _pkce_verifier: Option<&str>,
    ) -> Result<String, PlatformError> {
        let url = reqwest::Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", self.app_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", scopes.unwrap_or(SCOPES)),
                ("response_type", "code"),
                ("state", state),
            ],
        )
        .map_err(|e| PlatformError::Api {
            status: 0,
            message: format!("Invalid authorize URL: {}", e),
        })?;

        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        _pkce_verifier: Option<&str>,
    ) -> Result<TokenGrant, PlatformError> {
        let response = self
            .client
            .post(SHORT_TOKEN_URL)
            .form(&[
                ("client_id", self.app_id.as_str()),
                ("client_secret", self.app_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("code", code),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let short: ShortTokenResponse = response.json().await?;

        // The short-lived token is usable, so a failed upgrade degrades the
        // connection rather than failing the connect flow.
        match self.exchange_long_lived(&short.access_token).await {
            Ok(grant) => Ok(grant),
            Err(e) => {
                warn!("Long-lived token exchange failed, keeping short-lived token: {}", e);
                Ok(TokenGrant {
                    access_token: short.access_token,
                    refresh_token: None,
                    expires_in: Some(SHORT_TOKEN_LIFETIME_SECS),
                })
            }
        }
    }

    async fn refresh_access_token(
        &self,
        connection: &SocialConnection,
    ) -> Result<TokenGrant, PlatformError> {
        // No separate refresh credential: the unexpired access token itself
        // is presented.
        let response = self
            .client
            .get(REFRESH_URL)
            .query(&[
                ("grant_type", "th_refresh_token"),
                ("access_token", connection.access_token.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let token: LongTokenResponse = response.json().await?;
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: None,
            expires_in: token.expires_in,
        })
    }

    async fn get_profile(&self, access_token: &str) -> Result<Profile, PlatformError> {
        let response = self
            .client
            .get(format!("{}/me", GRAPH_URL))
            .query(&[("fields", "id,username"), ("access_token", access_token)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let me: MeResponse = response.json().await?;
        Ok(Profile {
            provider_user_id: me.id,
            username: me.username,
        })
    }

    async fn publish(
        &self,
        access_token: &str,
        content: &PostContent,
    ) -> Result<PostedRef, PlatformError> {
        match content {
            PostContent::Single(text) => {
                let id = self.publish_one(access_token, text, None).await?;
                Ok(PostedRef::single(id))
            }
            PostContent::Thread(texts) => {
                let mut ids: Vec<String> = Vec::with_capacity(texts.len());
                for text in texts {
                    let reply_to = ids.last().map(String::as_str);
                    match self.publish_one(access_token, text, reply_to).await {
                        Ok(id) => ids.push(id),
                        Err(e) => {
                            return Err(partial_thread_error(e, &ids, texts.len()));
                        }
                    }
                }
                let thread_id = ids.first().cloned();
                Ok(PostedRef::thread(ids, thread_id))
            }
        }
    }

    async fn delete_post(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> Result<(), PlatformError> {
        let response = self
            .client
            .delete(format!("{}/{}", GRAPH_URL, post_id))
            .query(&[("access_token", access_token)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter() -> ThreadsAdapter {
        ThreadsAdapter::new(&ThreadsAppConfig {
            app_id: "app-id".to_string(),
            app_secret: "app-secret".to_string(),
            redirect_uri: "https://app.example.com/callback/threads".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_authorization_url_has_no_pkce() {
        let adapter = test_adapter();
        assert!(adapter.generate_pkce().is_none());

        let url = adapter.build_authorization_url("state-token", None, None).unwrap();
        assert!(url.starts_with(AUTHORIZE_URL));
        assert!(url.contains("client_id=app-id"));
        assert!(url.contains("state=state-token"));
        assert!(url.contains("response_type=code"));
    }

    #[test]
    fn test_platform_identity() {
        assert_eq!(test_adapter().platform(), Platform::Threads);
    }
}
