//! Statement execution backend abstraction.

use thiserror::Error;

use crate::error::MigrateResult;

/// Failure of a single SQL statement, as reported by the backend.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StatementError {
    /// The backend's failure message.
    pub message: String,
}

impl StatementError {
    /// Create a new statement error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The connection the engine executes migration scripts on.
///
/// One implementation wraps one database connection. Transaction calls are
/// only issued when [`supports_ddl_transactions`](Self::supports_ddl_transactions)
/// is `true` and the migration opts in.
#[async_trait::async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> MigrateResult<()>;

    /// Commit the open transaction.
    async fn commit(&self) -> MigrateResult<()>;

    /// Roll back the open transaction.
    async fn rollback(&self) -> MigrateResult<()>;

    /// Execute one statement.
    async fn execute(&self, sql: &str) -> Result<(), StatementError>;

    /// Whether DDL statements participate in transactions on this backend.
    fn supports_ddl_transactions(&self) -> bool;
}
