//! Slated - scheduled-post dispatch for social platforms
//!
//! This library provides the core of the Slated backend: a store of
//! scheduled items, platform adapters for X and Threads, the dispatch loop
//! that publishes items when their time arrives, and the OAuth token
//! lifecycle for connected accounts.

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod oauth_state;
pub mod platforms;
pub mod refresher;
pub mod scheduling;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, QueueStats};
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use error::{Result, SlatedError};
pub use refresher::{RefreshSummary, TokenRefresher};
pub use types::{ItemStatus, Platform, PostContent, PostedRef, ScheduledItem, SocialConnection};
