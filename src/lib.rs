//! # tidemark
//!
//! A schema migration engine for SQL databases.
//!
//! This crate provides functionality for:
//! - Discovering versioned and repeatable migration scripts on disk
//! - Tracking applied migrations in a schema history ledger
//! - Reconciling the resolved and applied sets into per-migration states
//! - Applying pending migrations exactly once, in version order, under an
//!   exclusive advisory lock with transactional rollback on failure
//! - Parsing dialect-specific SQL scripts into individual statements,
//!   including stored procedure bodies and mid-script delimiter changes
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────┐
//! │ Resolvers    │────▶│ Reconciliation │◀────│ History     │
//! └──────────────┘     └────────────────┘     └─────────────┘
//!                              │                     ▲
//!                              ▼                     │
//!                      ┌────────────────┐     ┌─────────────┐
//!                      │ Apply Loop     │────▶│ Record      │
//!                      └────────────────┘     └─────────────┘
//!                              │
//!                              ▼
//!                      ┌────────────────┐
//!                      │ Script Parser  │──▶ statement execution
//!                      └────────────────┘
//! ```
//!
//! The engine is database-agnostic: connections, the history table, and
//! statement execution live behind the [`HistoryStore`] and
//! [`ExecutionBackend`] traits, and dialect-specific lexical rules behind
//! [`Dialect`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidemark::{MigrationConfig, Migrator, SqlFileResolver};
//!
//! async fn run_migrations() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MigrationConfig::new().installed_by("deploy");
//!
//!     let migrator = Migrator::new(config, history, executor)
//!         .with_resolver(Box::new(SqlFileResolver::new("./migrations")));
//!
//!     migrator.initialize().await?;
//!
//!     if let Some(report) = migrator.validate().await? {
//!         eprintln!("validation failed:\n{report}");
//!     }
//!
//!     let summary = migrator.migrate().await?;
//!     println!("{}", summary.summary());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Migration Files
//!
//! Migration scripts are flat `.sql` files named by convention:
//!
//! ```text
//! migrations/
//! ├── V1__create_users.sql
//! ├── V1_1__add_email_index.sql
//! ├── V2__create_posts.sql
//! └── R__rebuild_reporting_views.sql     # repeatable
//! ```
//!
//! Versioned migrations run exactly once, in version order. Repeatable
//! migrations (no version) run after all versioned ones and re-run whenever
//! their checksum changes.

pub mod dialect;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod migration;
pub mod reconcile;
pub mod resolver;
pub mod script;
pub mod version;

// Re-exports
pub use dialect::{Delimiter, Dialect, GenericDialect, MySqlDialect, PostgresDialect};
pub use engine::{MigrateSummary, MigrationConfig, Migrator};
pub use error::{MigrateResult, MigrationError};
pub use executor::{ExecutionBackend, StatementError};
pub use history::{AppliedMigration, HistoryEntry, HistoryLock, HistoryStore};
pub use migration::{MigrationKind, ResolvedMigration, checksum_of};
pub use reconcile::{MigrationInfo, MigrationState, ReconcileOptions, Reconciliation};
pub use resolver::{
    MigrationResolver, NamingConvention, SqlFileResolver, StaticResolver, collect_migrations,
};
pub use script::{Placeholders, Statement, StatementBuilder, parse_script};
pub use version::Version;
