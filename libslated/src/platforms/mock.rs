//! Mock platform adapter for testing
//!
//! A configurable adapter that can simulate successes, scripted failures,
//! and token refreshes. Used in dispatcher, refresher, and service tests to
//! verify control flow without credentials or network access.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::error::PlatformError;
use crate::types::{Platform, PostContent, PostedRef, SocialConnection};

use super::x::partial_thread_error;
use super::{PlatformAdapter, Profile, TokenGrant};

/// Configuration for mock adapter behavior
#[derive(Clone)]
pub struct MockConfig {
    /// Which platform this mock stands in for
    pub platform: Platform,

    /// Error to return from publish, if any
    pub publish_error: Option<PlatformError>,

    /// Fail only the Nth publish call (1-based); earlier and later calls
    /// succeed. When None, `publish_error` applies to every call.
    pub fail_publish_on: Option<usize>,

    /// Fail the Nth segment (1-based) within a thread publish; earlier
    /// segments count as attempted, later ones are never tried.
    pub fail_segment_on: Option<usize>,

    /// Error to return from refresh, if any
    pub refresh_error: Option<PlatformError>,

    /// Grant returned by successful exchanges and refreshes
    pub grant: TokenGrant,

    /// Profile returned by get_profile
    pub profile: Profile,

    /// Number of times publish has been called
    pub publish_call_count: Arc<Mutex<usize>>,

    /// Number of individual segment publishes attempted
    pub segment_attempt_count: Arc<Mutex<usize>>,

    /// Number of times refresh has been called
    pub refresh_call_count: Arc<Mutex<usize>>,

    /// Content that has been published (for verification)
    pub published_content: Arc<Mutex<Vec<PostContent>>>,

    /// Post IDs that have been deleted (for verification)
    pub deleted_ids: Arc<Mutex<Vec<String>>>,
}

impl MockConfig {
    fn for_platform(platform: Platform) -> Self {
        Self {
            platform,
            publish_error: None,
            fail_publish_on: None,
            fail_segment_on: None,
            refresh_error: None,
            grant: TokenGrant {
                access_token: "mock-access".to_string(),
                refresh_token: Some("mock-refresh".to_string()),
                expires_in: Some(7200),
            },
            profile: Profile {
                provider_user_id: format!("mock-{}-user", platform),
                username: Some("mockuser".to_string()),
            },
            publish_call_count: Arc::new(Mutex::new(0)),
            segment_attempt_count: Arc::new(Mutex::new(0)),
            refresh_call_count: Arc::new(Mutex::new(0)),
            published_content: Arc::new(Mutex::new(Vec::new())),
            deleted_ids: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock adapter for testing
pub struct MockAdapter {
    config: MockConfig,
}

impl MockAdapter {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Create a mock adapter that always succeeds
    pub fn success(platform: Platform) -> Self {
        Self::new(MockConfig::for_platform(platform))
    }

    /// Create a mock adapter whose publish calls all fail
    pub fn publish_failure(platform: Platform, error: PlatformError) -> Self {
        Self::new(MockConfig {
            publish_error: Some(error),
            ..MockConfig::for_platform(platform)
        })
    }

    /// Create a mock adapter that fails only the Nth publish call (1-based)
    pub fn publish_failure_on(platform: Platform, nth: usize, error: PlatformError) -> Self {
        Self::new(MockConfig {
            publish_error: Some(error),
            fail_publish_on: Some(nth),
            ..MockConfig::for_platform(platform)
        })
    }

    /// Create a mock adapter that fails the Nth segment of a thread publish
    pub fn segment_failure_on(platform: Platform, nth: usize, error: PlatformError) -> Self {
        Self::new(MockConfig {
            publish_error: Some(error),
            fail_segment_on: Some(nth),
            ..MockConfig::for_platform(platform)
        })
    }

    /// Create a mock adapter whose refresh calls fail
    pub fn refresh_failure(platform: Platform, error: PlatformError) -> Self {
        Self::new(MockConfig {
            refresh_error: Some(error),
            ..MockConfig::for_platform(platform)
        })
    }

    /// Create a mock adapter returning a specific grant
    pub fn with_grant(platform: Platform, grant: TokenGrant) -> Self {
        Self::new(MockConfig {
            grant,
            ..MockConfig::for_platform(platform)
        })
    }

    /// Create a mock adapter returning a specific profile
    pub fn with_profile(platform: Platform, profile: Profile) -> Self {
        Self::new(MockConfig {
            profile,
            ..MockConfig::for_platform(platform)
        })
    }

    /// Get the number of times publish was called
    pub fn publish_call_count(&self) -> usize {
        *self.config.publish_call_count.lock().unwrap()
    }

    /// Get the number of individual segment publishes attempted
    pub fn segment_attempt_count(&self) -> usize {
        *self.config.segment_attempt_count.lock().unwrap()
    }

    /// Get the number of times refresh was called
    pub fn refresh_call_count(&self) -> usize {
        *self.config.refresh_call_count.lock().unwrap()
    }

    /// Get all content that was published
    pub fn published_content(&self) -> Vec<PostContent> {
        self.config.published_content.lock().unwrap().clone()
    }

    /// Get all post IDs that were deleted
    pub fn deleted_ids(&self) -> Vec<String> {
        self.config.deleted_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.config.platform
    }

    fn generate_pkce(&self) -> Option<String> {
        match self.config.platform {
            Platform::X => Some("mock-pkce-verifier".to_string()),
            Platform::Threads => None,
        }
    }

    fn build_authorization_url(
        &self,
        state: &str,
        _scopes: Option<&str>,
        _pkce_verifier: Option<&str>,
    ) -> Result<String, PlatformError> {
        Ok(format!(
            "https://auth.mock/{}/authorize?state={}",
            self.config.platform, state
        ))
    }

    async fn exchange_code(
        &self,
        _code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<TokenGrant, PlatformError> {
        if self.config.platform == Platform::X && pkce_verifier.is_none() {
            return Err(PlatformError::Auth(
                "Mock X exchange requires a PKCE verifier".to_string(),
            ));
        }
        Ok(self.config.grant.clone())
    }

    async fn refresh_access_token(
        &self,
        _connection: &SocialConnection,
    ) -> Result<TokenGrant, PlatformError> {
        *self.config.refresh_call_count.lock().unwrap() += 1;

        if let Some(error) = &self.config.refresh_error {
            return Err(error.clone());
        }
        Ok(self.config.grant.clone())
    }

    async fn get_profile(&self, _access_token: &str) -> Result<Profile, PlatformError> {
        Ok(self.config.profile.clone())
    }

    async fn publish(
        &self,
        _access_token: &str,
        content: &PostContent,
    ) -> Result<PostedRef, PlatformError> {
        let call_number = {
            let mut count = self.config.publish_call_count.lock().unwrap();
            *count += 1;
            *count
        };

        if let Some(error) = &self.config.publish_error {
            if self.config.fail_segment_on.is_none() {
                let fails = match self.config.fail_publish_on {
                    Some(nth) => call_number == nth,
                    None => true,
                };
                if fails {
                    return Err(error.clone());
                }
            }
        }

        match content {
            PostContent::Single(_) => {
                *self.config.segment_attempt_count.lock().unwrap() += 1;
                self.config
                    .published_content
                    .lock()
                    .unwrap()
                    .push(content.clone());
                Ok(PostedRef::single(format!(
                    "{}:mock-{}",
                    self.config.platform,
                    uuid::Uuid::new_v4()
                )))
            }
            PostContent::Thread(texts) => {
                let mut ids = Vec::with_capacity(texts.len());
                for segment in 1..=texts.len() {
                    *self.config.segment_attempt_count.lock().unwrap() += 1;
                    if self.config.fail_segment_on == Some(segment) {
                        if let Some(error) = &self.config.publish_error {
                            return Err(partial_thread_error(error.clone(), &ids, texts.len()));
                        }
                    }
                    ids.push(format!(
                        "{}:mock-{}",
                        self.config.platform,
                        uuid::Uuid::new_v4()
                    ));
                }
                self.config
                    .published_content
                    .lock()
                    .unwrap()
                    .push(content.clone());
                let thread_id = ids.first().cloned();
                Ok(PostedRef::thread(ids, thread_id))
            }
        }
    }

    async fn delete_post(
        &self,
        _access_token: &str,
        post_id: &str,
    ) -> Result<(), PlatformError> {
        self.config
            .deleted_ids
            .lock()
            .unwrap()
            .push(post_id.to_string());
        Ok(())
    }
}
