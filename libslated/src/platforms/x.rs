//! X (Twitter) platform adapter
//!
//! Uses the v2 API: OAuth 2.0 authorization-code flow with PKCE (required by
//! X for user-context tokens) and the `/2/tweets` endpoint for publishing.
//! Threads are published as a chain of replies.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::XAppConfig;
use crate::error::PlatformError;
use crate::types::{Platform, PostContent, PostedRef, SocialConnection};

use super::{PlatformAdapter, Profile, TokenGrant};

const AUTHORIZE_URL: &str = "https://x.com/i/oauth2/authorize";
const TOKEN_URL: &str = "https://api.x.com/2/oauth2/token";
const USERS_ME_URL: &str = "https://api.x.com/2/users/me";
const TWEETS_URL: &str = "https://api.x.com/2/tweets";

/// Scopes needed to read the profile, publish, and receive refresh tokens.
const SCOPES: &str = "tweet.read tweet.write users.read offline.access";

const PKCE_VERIFIER_LEN: usize = 64;

pub struct XAdapter {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UsersMeResponse {
    data: UserData,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
    username: Option<String>,
}

#[derive(Debug, Serialize)]
struct TweetRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<TweetReply<'a>>,
}

#[derive(Debug, Serialize)]
struct TweetReply<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

impl XAdapter {
    pub fn new(config: &XAppConfig) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenGrant, PlatformError> {
        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let token: TokenResponse = response.json().await?;
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }

    async fn publish_one(
        &self,
        access_token: &str,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> Result<String, PlatformError> {
        let body = TweetRequest {
            text,
            reply: in_reply_to.map(|id| TweetReply {
                in_reply_to_tweet_id: id,
            }),
        };

        let response = self
            .client
            .post(TWEETS_URL)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let tweet: TweetResponse = response.json().await?;
        Ok(tweet.data.id)
    }
}

#[async_trait]
impl PlatformAdapter for XAdapter {
    fn platform(&self) -> Platform {
        Platform::X
    }

    fn generate_pkce(&self) -> Option<String> {
        Some(generate_pkce_verifier())
    }

    fn build_authorization_url(
        &self,
        state: &str,
        scopes: Option<&str>,
        pkce_verifier: Option<&str>,
    ) -> Result<String, PlatformError> {
        let verifier = pkce_verifier.ok_or_else(|| {
            PlatformError::Auth("X authorization requires a PKCE verifier".to_string())
        })?;
        let challenge = pkce_challenge(verifier);

        let url = reqwest::Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", scopes.unwrap_or(SCOPES)),
                ("state", state),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
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
        pkce_verifier: Option<&str>,
    ) -> Result<TokenGrant, PlatformError> {
        let verifier = pkce_verifier.ok_or_else(|| {
            PlatformError::Auth("X code exchange requires a PKCE verifier".to_string())
        })?;

        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", verifier),
        ])
        .await
    }

    async fn refresh_access_token(
        &self,
        connection: &SocialConnection,
    ) -> Result<TokenGrant, PlatformError> {
        let refresh_token = connection.refresh_token.as_deref().ok_or_else(|| {
            PlatformError::Auth(format!(
                "No refresh token stored for user {}; reconnect required",
                connection.user_id
            ))
        })?;

        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ])
        .await
    }

    async fn get_profile(&self, access_token: &str) -> Result<Profile, PlatformError> {
        let response = self
            .client
            .get(USERS_ME_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let me: UsersMeResponse = response.json().await?;
        Ok(Profile {
            provider_user_id: me.data.id,
            username: me.data.username,
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
            .delete(format!("{}/{}", TWEETS_URL, post_id))
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(())
    }
}

/// Random URL-safe PKCE code verifier.
pub(crate) fn generate_pkce_verifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PKCE_VERIFIER_LEN)
        .map(char::from)
        .collect()
}

/// S256 code challenge for a verifier.
pub(crate) fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Map a non-success response to a typed platform error.
pub(crate) async fn error_from_response(response: reqwest::Response) -> PlatformError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());
    let message = response.text().await.unwrap_or_default();

    classify_status(status.as_u16(), message, retry_after)
}

pub(crate) fn classify_status(
    status: u16,
    message: String,
    retry_after: Option<u64>,
) -> PlatformError {
    match status {
        401 | 403 => PlatformError::Auth(message),
        429 => PlatformError::RateLimited {
            message,
            retry_after,
        },
        _ => PlatformError::Api { status, message },
    }
}

/// Wrap a mid-thread failure with the ids that did go out, so the stored
/// error message records the partial result.
pub(crate) fn partial_thread_error(
    cause: PlatformError,
    published: &[String],
    total: usize,
) -> PlatformError {
    if published.is_empty() {
        return cause;
    }
    PlatformError::Api {
        status: match &cause {
            PlatformError::Api { status, .. } => *status,
            _ => 0,
        },
        message: format!(
            "Thread partially published ({}/{} segments, ids: {}): {}",
            published.len(),
            total,
            published.join(","),
            cause
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter() -> XAdapter {
        XAdapter::new(&XAppConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "https://app.example.com/callback/x".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_pkce_verifier_shape() {
        let a = generate_pkce_verifier();
        let b = generate_pkce_verifier();
        assert_eq!(a.len(), PKCE_VERIFIER_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_pkce_challenge_is_deterministic_s256() {
        // RFC 7636 appendix B test vector.
        let challenge = pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
        assert_eq!(challenge, pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"));
    }

    #[test]
    fn test_authorization_url_carries_pkce() {
        let adapter = test_adapter();
        let verifier = adapter.generate_pkce().expect("X flow must produce a verifier");
        let url = adapter
            .build_authorization_url("state-token", None, Some(&verifier))
            .unwrap();

        assert!(url.starts_with(AUTHORIZE_URL));
        assert!(url.contains("state=state-token"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains(&format!("code_challenge={}", pkce_challenge(&verifier))));
        assert!(url.contains("client_id=client-id"));
    }

    #[test]
    fn test_authorization_url_scope_override() {
        let adapter = test_adapter();
        let verifier = adapter.generate_pkce().unwrap();
        let url = adapter
            .build_authorization_url("s", Some("tweet.read"), Some(&verifier))
            .unwrap();
        assert!(url.contains("scope=tweet.read"));
        assert!(!url.contains("offline.access"));
    }

    #[test]
    fn test_authorization_url_requires_verifier() {
        let adapter = test_adapter();
        let err = adapter
            .build_authorization_url("state-token", None, None)
            .unwrap_err();
        assert!(matches!(err, PlatformError::Auth(_)));
    }

    #[tokio::test]
    async fn test_exchange_without_verifier_is_auth_error() {
        let adapter = test_adapter();
        let err = adapter.exchange_code("some-code", None).await.unwrap_err();
        assert!(matches!(err, PlatformError::Auth(_)));
    }

    #[tokio::test]
    async fn test_refresh_without_token_is_auth_error() {
        let adapter = test_adapter();
        let now = chrono::Utc::now().timestamp();
        let conn = SocialConnection {
            user_id: "u".to_string(),
            platform: Platform::X,
            provider_user_id: "p".to_string(),
            access_token: "t".to_string(),
            refresh_token: None,
            access_token_expires_at: Some(now + 100),
            username: None,
            created_at: now,
            updated_at: now,
        };
        let err = adapter.refresh_access_token(&conn).await.unwrap_err();
        assert!(matches!(err, PlatformError::Auth(_)));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(401, "bad token".to_string(), None),
            PlatformError::Auth(_)
        ));
        match classify_status(429, "slow down".to_string(), Some(900)) {
            PlatformError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(900));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
        assert!(matches!(
            classify_status(500, "oops".to_string(), None),
            PlatformError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_partial_thread_error_names_published_ids() {
        let cause = PlatformError::Api {
            status: 500,
            message: "server error".to_string(),
        };
        let err = partial_thread_error(cause, &["t1".to_string(), "t2".to_string()], 4);
        let message = err.to_string();
        assert!(message.contains("2/4"));
        assert!(message.contains("t1,t2"));
    }
}
