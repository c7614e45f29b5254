//! Error types for Content Clock

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClockError>;

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ClockError {
    /// Returns the process exit code the daemon uses for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ClockError::Config(_) => 2,
            ClockError::InvalidInput(_) => 2,
            ClockError::Database(_) => 1,
            ClockError::Platform(_) => 1,
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

    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        field: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow {
        table: &'static str,
        reason: String,
    },
}

/// Failure classes an adapter can produce.
///
/// Every variant ends up as the `logs` text of a failed post, so messages
/// reported by a platform are carried through untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Bad local input; raised before any remote call.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// DNS, connect, timeout or body-read failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The platform answered with its own error envelope.
    #[error("Posting failed: {0}")]
    Posting(String),

    /// The response had neither the expected id nor an error envelope.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

impl PlatformError {
    /// Whether another attempt may succeed without any change on our side.
    ///
    /// Only transport failures qualify; platform-side throttling is reported
    /// but not backed off.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Network(_))
    }
}
