//! The persisted ledger of applied migrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MigrateResult;
use crate::migration::MigrationKind;
use crate::version::Version;

/// A record of one applied migration, as persisted in the history table.
///
/// Records are append-only: once written they are never mutated except by
/// an out-of-band repair operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    /// Unique, strictly increasing rank assigned by the history store.
    pub installed_rank: i32,
    /// Version, or `None` for repeatable migrations.
    pub version: Option<Version>,
    /// Description of the migration.
    pub description: String,
    /// Kind of migration.
    pub kind: MigrationKind,
    /// Logical script name. Empty for synthetic entries.
    pub script: String,
    /// CRC-32 checksum of the script source at apply time.
    pub checksum: Option<i32>,
    /// When the migration was applied.
    pub installed_on: DateTime<Utc>,
    /// Who applied the migration.
    pub installed_by: String,
    /// How long execution took.
    pub execution_time_ms: i64,
    /// Whether the migration completed successfully.
    pub success: bool,
}

/// The fields of a history record about to be appended. The store assigns
/// the rank and the timestamp.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Version, or `None` for repeatable migrations.
    pub version: Option<Version>,
    /// Description of the migration.
    pub description: String,
    /// Kind of migration.
    pub kind: MigrationKind,
    /// Logical script name.
    pub script: String,
    /// CRC-32 checksum of the script source.
    pub checksum: Option<i32>,
    /// Who applied the migration; `None` lets the store record the
    /// connected database user.
    pub installed_by: Option<String>,
    /// How long execution took.
    pub execution_time_ms: i64,
    /// Whether the migration completed successfully.
    pub success: bool,
}

impl HistoryEntry {
    /// Build a synthetic baseline entry for this version.
    pub fn baseline(version: Version, description: impl Into<String>) -> Self {
        Self {
            version: Some(version),
            description: description.into(),
            kind: MigrationKind::Baseline,
            script: String::new(),
            checksum: None,
            installed_by: None,
            execution_time_ms: 0,
            success: true,
        }
    }
}

/// The abstraction over the persisted migration ledger.
///
/// Implementations own the history table (or equivalent) of one target
/// schema. All writes happen while the caller holds the [`HistoryLock`].
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create the backing table if it does not exist yet.
    async fn initialize(&self) -> MigrateResult<()>;

    /// Read the full ledger, ordered by installed rank.
    async fn read_all(&self) -> MigrateResult<Vec<AppliedMigration>>;

    /// Append a record, assigning the next installed rank, and return it.
    async fn append(&self, entry: HistoryEntry) -> MigrateResult<i32>;

    /// Attempt to take the exclusive advisory lock without blocking.
    ///
    /// Returns `None` when another process holds the lock. The engine owns
    /// the retry schedule.
    async fn try_lock(&self) -> MigrateResult<Option<HistoryLock>>;
}

/// Exclusive advisory lock over a history store, released on drop.
pub struct HistoryLock {
    lock_id: i64,
    release_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl HistoryLock {
    /// Create a new lock guard.
    pub fn new(lock_id: i64, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            lock_id,
            release_fn: Some(Box::new(release)),
        }
    }

    /// Get the lock ID.
    pub fn id(&self) -> i64 {
        self.lock_id
    }
}

impl Drop for HistoryLock {
    fn drop(&mut self) {
        if let Some(release) = self.release_fn.take() {
            release();
        }
    }
}
