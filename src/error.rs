#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use thiserror::Error;

/// Stable codes printed in the CLI error envelope.
pub mod code {
    pub const NOTFOUND: &str = "NOTFOUND";
    pub const INVALID: &str = "INVALID";
    pub const DEPENDENCY: &str = "DEPENDENCY";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Bridge error: {0}")]
    BridgeError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarvestError {
    /// Returns the protocol error code for this error
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) | Self::InvalidInput(_) | Self::SerializationError(_) => {
                code::INVALID
            }
            Self::DatabaseError(_) | Self::SqlxError(_) | Self::Internal(_) => code::INTERNAL,
            Self::TaskNotFound(_) | Self::CredentialNotFound(_) => code::NOTFOUND,
            Self::BridgeError(_) | Self::HttpError(_) => code::UNAVAILABLE,
            Self::IoError(_) => code::DEPENDENCY,
        }
    }

    /// Returns the exit code for this error
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigError(_) | Self::InvalidInput(_) => 2,
            Self::DatabaseError(_) | Self::SqlxError(_) => 3,
            Self::TaskNotFound(_) | Self::CredentialNotFound(_) => 4,
            Self::BridgeError(_) | Self::HttpError(_) => 5,
            Self::IoError(_) => 7,
            Self::SerializationError(_) => 8,
            Self::Internal(_) => 9,
        }
    }

    /// Store failures are the only errors that abort a task as a whole.
    #[must_use]
    pub const fn is_store_failure(&self) -> bool {
        matches!(self, Self::DatabaseError(_) | Self::SqlxError(_))
    }
}

pub const ERROR_CODES: &[(&str, &str, &str)] = &[
    (
        code::NOTFOUND,
        "Resource was not found",
        "List tasks or credentials and verify identifier",
    ),
    (
        code::INVALID,
        "Invalid request payload",
        "Check locators, limits and configuration keys",
    ),
    (
        code::DEPENDENCY,
        "Missing system dependency",
        "Check the sessions directory exists and is writable",
    ),
    (
        code::UNAVAILABLE,
        "Session bridge unavailable",
        "Check bridge_url and that the session sidecar is running",
    ),
    (
        code::INTERNAL,
        "Unexpected internal failure",
        "Inspect logs and retry command",
    ),
];

/// Get error code details (description and fix) for a given error code
#[must_use]
pub fn get_error_info(error_code: &str) -> Option<(&'static str, &'static str)> {
    ERROR_CODES
        .iter()
        .find(|(code, _, _)| *code == error_code)
        .map(|(_, desc, fix)| (*desc, *fix))
}

pub type Result<T> = std::result::Result<T, HarvestError>;
