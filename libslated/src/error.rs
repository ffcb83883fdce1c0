//! Error types for Slated

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SlatedError>;

#[derive(Error, Debug)]
pub enum SlatedError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl SlatedError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SlatedError::Validation(_) => 3,
            SlatedError::Platform(PlatformError::Auth(_)) => 2,
            SlatedError::Platform(_) => 1,
            SlatedError::Config(_) => 1,
            SlatedError::Database(_) => 1,
            SlatedError::Conflict(_) => 1,
            SlatedError::NotFound(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Seconds to wait, from the Retry-After header when present.
        retry_after: Option<u64>,
    },

    #[error("Platform returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        PlatformError::Network(e.to_string())
    }
}
