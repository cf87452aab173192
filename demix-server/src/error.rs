//! Application-wide error types.

use std::path::PathBuf;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("File too large. Maximum size is {} MB", .max_bytes / (1024 * 1024))]
    PayloadTooLarge { max_bytes: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {path}: {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Sorry, songs are limited to {} minutes. This video is {} minutes {} seconds.",
        .limit_secs / 60,
        .actual_secs / 60,
        .actual_secs % 60
    )]
    SourceTooLong { limit_secs: u64, actual_secs: u64 },

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Separation failed: {0}")]
    Separation(String),

    #[error("Separation finished but expected output files are missing: {}", .0.join(", "))]
    MissingArtifacts(Vec<String>),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("API error: {0}")]
    ApiError(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
