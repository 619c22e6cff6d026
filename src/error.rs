//! Error types for the migration engine.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// A version string that could not be parsed.
    #[error("Invalid version '{0}': only numeric components separated by '.' or '_' are allowed")]
    InvalidVersion(String),

    /// A script file name that does not follow the naming convention.
    #[error("Invalid migration name '{name}': {reason}")]
    InvalidMigrationName {
        /// The offending file name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Two different migrations resolved to the same version.
    #[error(
        "Found more than one migration with version {version}\nOffenders:\n-> {first}\n-> {second}"
    )]
    DuplicateVersion {
        /// The shared version.
        version: String,
        /// Script of the first offender.
        first: String,
        /// Script of the second offender.
        second: String,
    },

    /// Two different repeatable migrations resolved to the same description.
    #[error(
        "Found more than one repeatable migration with description '{description}'\nOffenders:\n-> {first}\n-> {second}"
    )]
    DuplicateRepeatable {
        /// The shared description.
        description: String,
        /// Script of the first offender.
        first: String,
        /// Script of the second offender.
        second: String,
    },

    /// Validation found mismatches between resolved and applied migrations.
    #[error("Validation failed:\n{0}")]
    Validation(String),

    /// The schema history already contains failed migrations.
    #[error("Schema history contains failed migrations: {0}")]
    DirtyHistory(String),

    /// A statement inside a migration script failed.
    #[error(
        "Migration of {script} to version {version} failed: statement at line {line} raised: {cause}\nStatement: {sql}"
    )]
    MigrationFailed {
        /// The version the migration would have brought the schema to. For
        /// repeatable migrations this is the description.
        version: String,
        /// Logical script name.
        script: String,
        /// 1-based line number of the failing statement in the original source.
        line: usize,
        /// The failing statement text.
        sql: String,
        /// The backend's failure message.
        cause: String,
    },

    /// Lock acquisition failed after exhausting the retry budget.
    #[error("Failed to acquire migration lock: {0}")]
    LockFailed(String),
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a lock failed error.
    pub fn lock_failed(msg: impl Into<String>) -> Self {
        Self::LockFailed(msg.into())
    }

    /// Create an invalid migration name error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMigrationName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error may resolve itself on a retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockFailed(_))
    }
}
