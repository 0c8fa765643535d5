//! Error types for the migration runner
//!
//! Construction-time errors (directory scan, catalog invariants) are fatal to
//! runner creation. Per-migration errors are carried inside a
//! [`MigrationReport`](crate::MigrationReport) next to the partial progress.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::migrations::Direction;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migrations directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("Failed to read migration file {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Duplicate {direction} migration for version {version}")]
    DuplicateVersion { version: String, direction: Direction },

    #[error("Down migration {version} has no matching up migration")]
    OrphanDownMigration { version: String },

    #[error("No down migration found for version {version}")]
    NoDownMigrationFound { version: String },

    #[error("Failed to apply migration {version} ({name}): {reason}")]
    Apply {
        version: String,
        name: String,
        reason: String,
    },

    #[error("Failed to roll back migration {version} ({name}): {reason}")]
    Rollback {
        version: String,
        name: String,
        reason: String,
    },

    #[error("Migration {version} has drifted: recorded checksum {expected}, current checksum {found}")]
    DriftDetected {
        version: String,
        expected: String,
        found: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration lock error: {0}")]
    Lock(String),

    #[error("Migration run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid migration name: {0:?}")]
    InvalidName(String),

    #[error("Migration file already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Whether this error was raised by a cancelled context
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MigrationError::Cancelled)
    }

    /// Version the error refers to, if any
    pub fn version(&self) -> Option<&str> {
        match self {
            MigrationError::DuplicateVersion { version, .. }
            | MigrationError::OrphanDownMigration { version }
            | MigrationError::NoDownMigrationFound { version }
            | MigrationError::Apply { version, .. }
            | MigrationError::Rollback { version, .. }
            | MigrationError::DriftDetected { version, .. } => Some(version),
            _ => None,
        }
    }
}
