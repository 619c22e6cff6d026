//! In-memory test doubles for the history store and execution backend.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tidemark::{
    AppliedMigration, ExecutionBackend, HistoryEntry, HistoryLock, HistoryStore, MigrateResult,
    StatementError,
};

/// History store backed by a vector, with an in-process advisory lock.
#[derive(Default, Clone)]
pub struct MemoryHistory {
    inner: Arc<HistoryInner>,
}

#[derive(Default)]
struct HistoryInner {
    records: Mutex<Vec<AppliedMigration>>,
    locked: AtomicBool,
    lock_acquisitions: AtomicU32,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AppliedMigration> {
        self.inner.records.lock().unwrap().clone()
    }

    /// How many times the lock was successfully acquired.
    pub fn lock_acquisitions(&self) -> u32 {
        self.inner.lock_acquisitions.load(Ordering::SeqCst)
    }

    /// Take the lock from outside the engine, to simulate contention.
    pub fn hold_lock(&self) -> bool {
        self.inner
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn release_lock(&self) {
        self.inner.locked.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistory {
    async fn initialize(&self) -> MigrateResult<()> {
        Ok(())
    }

    async fn read_all(&self) -> MigrateResult<Vec<AppliedMigration>> {
        Ok(self.records())
    }

    async fn append(&self, entry: HistoryEntry) -> MigrateResult<i32> {
        let mut records = self.inner.records.lock().unwrap();
        let rank = records.len() as i32 + 1;
        records.push(AppliedMigration {
            installed_rank: rank,
            version: entry.version,
            description: entry.description,
            kind: entry.kind,
            script: entry.script,
            checksum: entry.checksum,
            installed_on: Utc::now(),
            installed_by: entry.installed_by.unwrap_or_else(|| "memory".to_string()),
            execution_time_ms: entry.execution_time_ms,
            success: entry.success,
        });
        Ok(rank)
    }

    async fn try_lock(&self) -> MigrateResult<Option<HistoryLock>> {
        if self
            .inner
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.inner.lock_acquisitions.fetch_add(1, Ordering::SeqCst);
            let inner = Arc::clone(&self.inner);
            Ok(Some(HistoryLock::new(1, move || {
                inner.locked.store(false, Ordering::SeqCst);
            })))
        } else {
            Ok(None)
        }
    }
}

/// Execution backend recording every statement and transaction event.
#[derive(Clone)]
pub struct MemoryExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    executed: Mutex<Vec<String>>,
    events: Mutex<Vec<&'static str>>,
    fail_on: Mutex<Option<String>>,
    ddl_transactions: bool,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::with_ddl_transactions(true)
    }

    pub fn non_transactional() -> Self {
        Self::with_ddl_transactions(false)
    }

    fn with_ddl_transactions(ddl_transactions: bool) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                executed: Mutex::new(Vec::new()),
                events: Mutex::new(Vec::new()),
                fail_on: Mutex::new(None),
                ddl_transactions,
            }),
        }
    }

    /// Fail any statement containing this marker.
    pub fn fail_on(&self, marker: &str) {
        *self.inner.fail_on.lock().unwrap() = Some(marker.to_string());
    }

    pub fn executed(&self) -> Vec<String> {
        self.inner.executed.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.inner.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for MemoryExecutor {
    async fn begin(&self) -> MigrateResult<()> {
        self.inner.events.lock().unwrap().push("begin");
        Ok(())
    }

    async fn commit(&self) -> MigrateResult<()> {
        self.inner.events.lock().unwrap().push("commit");
        Ok(())
    }

    async fn rollback(&self) -> MigrateResult<()> {
        self.inner.events.lock().unwrap().push("rollback");
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<(), StatementError> {
        let fail_on = self.inner.fail_on.lock().unwrap().clone();
        if let Some(marker) = fail_on {
            if sql.contains(&marker) {
                return Err(StatementError::new(format!(
                    "forced failure on '{marker}'"
                )));
            }
        }
        self.inner.executed.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    fn supports_ddl_transactions(&self) -> bool {
        self.inner.ddl_transactions
    }
}
