//! The migration engine: locking, reconciliation, and the apply loop.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::dialect::{Dialect, GenericDialect};
use crate::error::{MigrateResult, MigrationError};
use crate::executor::ExecutionBackend;
use crate::history::{HistoryEntry, HistoryLock, HistoryStore};
use crate::migration::ResolvedMigration;
use crate::reconcile::{MigrationInfo, MigrationState, ReconcileOptions, Reconciliation};
use crate::resolver::{MigrationResolver, collect_migrations};
use crate::script::{Placeholders, parse_script};
use crate::version::Version;

/// Configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Apply no migration above this version.
    pub target: Option<Version>,
    /// Allow applying migrations with versions below the latest applied one.
    pub out_of_order: bool,
    /// Apply all pending migrations under a single lock acquisition.
    pub group: bool,
    /// Baseline version; resolved migrations at or below it are not applied.
    pub baseline: Option<Version>,
    /// Tolerate applied migrations that are no longer resolvable.
    pub ignore_missing: bool,
    /// Tolerate a failed migration above the latest resolved version.
    pub ignore_future_failures: bool,
    /// Recorded in history as the installer; `None` lets the history store
    /// record the connected database user.
    pub installed_by: Option<String>,
    /// Placeholder tokens substituted into scripts.
    pub placeholders: Placeholders,
    /// How many times to retry acquiring the history lock.
    pub lock_retry_count: u32,
    /// How long to wait between lock retries.
    pub lock_retry_interval: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            target: None,
            out_of_order: false,
            group: false,
            baseline: None,
            ignore_missing: false,
            ignore_future_failures: false,
            installed_by: None,
            placeholders: Placeholders::new(),
            lock_retry_count: 50,
            lock_retry_interval: Duration::from_secs(1),
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target version ceiling.
    pub fn target(mut self, target: Version) -> Self {
        self.target = Some(target);
        self
    }

    /// Allow out-of-order execution.
    pub fn out_of_order(mut self, out_of_order: bool) -> Self {
        self.out_of_order = out_of_order;
        self
    }

    /// Apply all pending migrations under one lock acquisition.
    pub fn group(mut self, group: bool) -> Self {
        self.group = group;
        self
    }

    /// Set the baseline version.
    pub fn baseline(mut self, baseline: Version) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Tolerate applied migrations that are no longer resolvable.
    pub fn ignore_missing(mut self, ignore: bool) -> Self {
        self.ignore_missing = ignore;
        self
    }

    /// Tolerate a failed migration above the latest resolved version.
    pub fn ignore_future_failures(mut self, ignore: bool) -> Self {
        self.ignore_future_failures = ignore;
        self
    }

    /// Record this name as the installer.
    pub fn installed_by(mut self, name: impl Into<String>) -> Self {
        self.installed_by = Some(name.into());
        self
    }

    /// Set the placeholder map.
    pub fn placeholders(mut self, placeholders: Placeholders) -> Self {
        self.placeholders = placeholders;
        self
    }

    /// Set the lock retry budget.
    pub fn lock_retries(mut self, count: u32, interval: Duration) -> Self {
        self.lock_retry_count = count;
        self.lock_retry_interval = interval;
        self
    }
}

/// Result of a completed `migrate()` run.
#[derive(Debug)]
pub struct MigrateSummary {
    /// Number of migrations applied in this run.
    pub applied_count: usize,
    /// Schema version before the run.
    pub initial_version: Version,
    /// Schema version after the run.
    pub final_version: Version,
    /// Total duration of the run.
    pub duration_ms: i64,
    /// Warnings generated during the run.
    pub warnings: Vec<String>,
}

impl MigrateSummary {
    fn new() -> Self {
        Self {
            applied_count: 0,
            initial_version: Version::empty(),
            final_version: Version::empty(),
            duration_ms: 0,
            warnings: Vec::new(),
        }
    }

    /// Whether any migrations were applied.
    pub fn has_changes(&self) -> bool {
        self.applied_count > 0
    }

    /// Get a one-line summary of the run.
    pub fn summary(&self) -> String {
        if self.applied_count == 0 {
            return "Schema is up to date. No migration necessary.".to_string();
        }
        let noun = if self.applied_count == 1 {
            "migration"
        } else {
            "migrations"
        };
        format!(
            "Successfully applied {} {}, now at version {} (execution time {}ms)",
            self.applied_count, noun, self.final_version, self.duration_ms
        )
    }
}

/// The migration engine.
///
/// Drives the reconcile-and-apply loop against a [`HistoryStore`] and an
/// [`ExecutionBackend`], with migrations supplied by one or more
/// [`MigrationResolver`]s and scripts parsed under a [`Dialect`].
pub struct Migrator<H: HistoryStore, E: ExecutionBackend> {
    config: MigrationConfig,
    resolvers: Vec<Box<dyn MigrationResolver>>,
    dialect: Box<dyn Dialect>,
    history: H,
    executor: E,
}

impl<H: HistoryStore, E: ExecutionBackend> Migrator<H, E> {
    /// Create a new migrator.
    pub fn new(config: MigrationConfig, history: H, executor: E) -> Self {
        Self {
            config,
            resolvers: Vec::new(),
            dialect: Box::new(GenericDialect),
            history,
            executor,
        }
    }

    /// Add a source of migrations.
    pub fn with_resolver(mut self, resolver: Box<dyn MigrationResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Set the SQL dialect scripts are parsed under.
    pub fn with_dialect(mut self, dialect: Box<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Initialize the history store.
    pub async fn initialize(&self) -> MigrateResult<()> {
        self.history.initialize().await
    }

    /// Apply all pending migrations.
    ///
    /// Each iteration acquires the history lock, reconciles, applies the
    /// lowest-version pending migration, and releases the lock, until a
    /// reconciliation pass finds nothing pending. The first failure stops
    /// the run.
    pub async fn migrate(&self) -> MigrateResult<MigrateSummary> {
        let started = Instant::now();
        let resolved = self.resolve_all().await?;
        let mut summary = MigrateSummary::new();

        if self.config.group {
            let lock = self.acquire_lock().await?;
            let result = self.migrate_all(&resolved, &mut summary).await;
            drop(lock);
            result?;
        } else {
            loop {
                let lock = self.acquire_lock().await?;
                let first_run = summary.applied_count == 0;
                let outcome = self.migrate_group(&resolved, first_run, &mut summary).await;
                drop(lock);
                let applied_now = outcome?;
                if applied_now == 0 {
                    break;
                }
                summary.applied_count += applied_now;
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as i64;
        info!("{}", summary.summary());
        Ok(summary)
    }

    /// Check the resolved migrations against the history.
    ///
    /// Returns `None` when everything is consistent, or a report listing
    /// every mismatch found.
    pub async fn validate(&self) -> MigrateResult<Option<String>> {
        let reconciliation = self.reconcile().await?;
        let errors = reconciliation.validate();
        if errors.is_empty() {
            Ok(None)
        } else {
            Ok(Some(errors.join("\n")))
        }
    }

    /// The migrations that would be applied by [`migrate`](Self::migrate).
    pub async fn pending(&self) -> MigrateResult<Vec<ResolvedMigration>> {
        let reconciliation = self.reconcile().await?;
        Ok(reconciliation
            .pending()
            .into_iter()
            .filter_map(|info| info.resolved.clone())
            .collect())
    }

    /// The full reconciled view of resolved and applied migrations.
    pub async fn info(&self) -> MigrateResult<Reconciliation> {
        self.reconcile().await
    }

    /// Record a baseline at this version without running any script.
    ///
    /// Fails when the history already contains applied migrations.
    pub async fn baseline(
        &self,
        version: Version,
        description: impl Into<String>,
    ) -> MigrateResult<i32> {
        let description = description.into();
        let lock = self.acquire_lock().await?;
        let result = self.do_baseline(version, description).await;
        drop(lock);
        result
    }

    async fn do_baseline(&self, version: Version, description: String) -> MigrateResult<i32> {
        let applied = self.history.read_all().await?;
        if applied.iter().any(|record| !record.kind.is_synthetic()) {
            return Err(MigrationError::database(
                "unable to baseline: migrations have already been applied",
            ));
        }
        info!("Baselining schema to version {}", version);
        let mut entry = HistoryEntry::baseline(version, description);
        entry.installed_by = self.config.installed_by.clone();
        self.history.append(entry).await
    }

    fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            target: self.config.target.clone(),
            out_of_order: self.config.out_of_order,
            baseline: self.config.baseline.clone(),
            ignore_missing: self.config.ignore_missing,
            ignore_future_failures: self.config.ignore_future_failures,
        }
    }

    async fn reconcile(&self) -> MigrateResult<Reconciliation> {
        let resolved = self.resolve_all().await?;
        let applied = self.history.read_all().await?;
        Ok(Reconciliation::new(
            &resolved,
            &applied,
            &self.reconcile_options(),
        ))
    }

    async fn resolve_all(&self) -> MigrateResult<Vec<ResolvedMigration>> {
        let mut sets = Vec::with_capacity(self.resolvers.len());
        for resolver in &self.resolvers {
            sets.push(resolver.resolve().await?);
        }
        let migrations = collect_migrations(sets)?;
        debug!("Resolved {} migrations", migrations.len());
        Ok(migrations)
    }

    /// Acquire the history lock with bounded timed retries.
    async fn acquire_lock(&self) -> MigrateResult<HistoryLock> {
        let mut attempts: u32 = 0;
        loop {
            if let Some(lock) = self.history.try_lock().await? {
                return Ok(lock);
            }
            if attempts >= self.config.lock_retry_count {
                return Err(MigrationError::lock_failed(format!(
                    "another process holds the history lock; gave up after {} attempts",
                    attempts + 1
                )));
            }
            attempts += 1;
            debug!("History lock busy, retrying (attempt {})", attempts);
            tokio::time::sleep(self.config.lock_retry_interval).await;
        }
    }

    /// Apply groups until nothing is pending. Caller holds the lock.
    async fn migrate_all(
        &self,
        resolved: &[ResolvedMigration],
        summary: &mut MigrateSummary,
    ) -> MigrateResult<()> {
        loop {
            let first_run = summary.applied_count == 0;
            let applied_now = self.migrate_group(resolved, first_run, summary).await?;
            if applied_now == 0 {
                return Ok(());
            }
            summary.applied_count += applied_now;
        }
    }

    /// Reconcile and apply one migration (or, with `group`, all pending
    /// ones). Returns the number applied.
    async fn migrate_group(
        &self,
        resolved: &[ResolvedMigration],
        first_run: bool,
        summary: &mut MigrateSummary,
    ) -> MigrateResult<usize> {
        let applied = self.history.read_all().await?;
        let reconciliation = Reconciliation::new(resolved, &applied, &self.reconcile_options());
        let current = reconciliation.current_version();

        if first_run {
            info!("Current version of schema: {}", current);
            summary.initial_version = current.clone();
            if self.config.out_of_order {
                let warning =
                    "out-of-order mode is active; migration order may not be reproducible";
                warn!("{}", warning);
                summary.warnings.push(warning.to_string());
            }
        }

        if !reconciliation.future().is_empty() {
            warn!(
                "Schema has a version ({}) that is newer than the latest available migration",
                current
            );
        }

        // A dirty history is never extended.
        let failed = reconciliation.failed();
        if !failed.is_empty() {
            let tolerated = failed.len() == 1
                && failed[0].state == MigrationState::FutureFailed
                && self.config.ignore_future_failures;
            if tolerated {
                warn!("Schema contains a failed future migration");
            } else {
                let first = failed[0];
                let message = match first.version() {
                    Some(version) => format!(
                        "failed migration to version {} ({})",
                        version,
                        first.description()
                    ),
                    None => format!("failed repeatable migration '{}'", first.description()),
                };
                return Err(MigrationError::DirtyHistory(message));
            }
        }

        summary.final_version = current.clone();

        let pending = reconciliation.pending();
        if pending.is_empty() {
            return Ok(0);
        }

        let batch: Vec<&MigrationInfo> = if self.config.group {
            pending
        } else {
            pending.into_iter().take(1).collect()
        };

        let mut count = 0;
        for info in &batch {
            let Some(migration) = info.resolved.as_ref() else {
                continue;
            };
            let out_of_order = migration
                .version
                .as_ref()
                .is_some_and(|version| *version < current);
            self.apply_migration(migration, out_of_order).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Execute one migration script and record the outcome.
    async fn apply_migration(
        &self,
        migration: &ResolvedMigration,
        out_of_order: bool,
    ) -> MigrateResult<()> {
        let text = migration_text(migration, out_of_order);
        info!("Migrating {}", text);

        let statements = parse_script(
            &migration.sql,
            &self.config.placeholders,
            self.dialect.as_ref(),
        );
        let use_transaction =
            self.executor.supports_ddl_transactions() && migration.run_in_transaction;
        let started = Instant::now();

        if use_transaction {
            self.executor.begin().await?;
        }

        for statement in &statements {
            debug!("Executing statement at line {}", statement.line_number);
            if let Err(cause) = self.executor.execute(&statement.sql).await {
                let execution_time_ms = started.elapsed().as_millis() as i64;
                if use_transaction {
                    self.executor.rollback().await?;
                    error!("Migration of {} failed; changes rolled back", text);
                } else {
                    error!("Migration of {} failed; manual cleanup may be required", text);
                }

                let entry = self.history_entry(migration, execution_time_ms, false);
                if let Err(history_error) = self.history.append(entry).await {
                    error!("Failed to record migration failure: {}", history_error);
                }

                return Err(MigrationError::MigrationFailed {
                    version: migration
                        .version
                        .as_ref()
                        .map(|version| version.to_string())
                        .unwrap_or_else(|| migration.description.clone()),
                    script: migration.script.clone(),
                    line: statement.line_number,
                    sql: statement.sql.clone(),
                    cause: cause.to_string(),
                });
            }
        }

        let execution_time_ms = started.elapsed().as_millis() as i64;
        let entry = self.history_entry(migration, execution_time_ms, true);
        // Under a transactional backend the success record commits
        // atomically with the migration's own statements.
        self.history.append(entry).await?;
        if use_transaction {
            self.executor.commit().await?;
        }

        info!("Successfully migrated {} in {}ms", text, execution_time_ms);
        Ok(())
    }

    fn history_entry(
        &self,
        migration: &ResolvedMigration,
        execution_time_ms: i64,
        success: bool,
    ) -> HistoryEntry {
        HistoryEntry {
            version: migration.version.clone(),
            description: migration.description.clone(),
            kind: migration.kind,
            script: migration.script.clone(),
            checksum: Some(migration.checksum),
            installed_by: self.config.installed_by.clone(),
            execution_time_ms,
            success,
        }
    }
}

fn migration_text(migration: &ResolvedMigration, out_of_order: bool) -> String {
    match &migration.version {
        Some(version) => format!(
            "schema to version \"{} - {}\"{}",
            version,
            migration.description,
            if out_of_order { " [out of order]" } else { "" }
        ),
        None => format!(
            "schema with repeatable migration \"{}\"",
            migration.description
        ),
    }
}
