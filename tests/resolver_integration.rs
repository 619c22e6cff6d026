//! End-to-end tests driving migrations from scripts on disk.

mod common;

use common::{MemoryExecutor, MemoryHistory};
use pretty_assertions::assert_eq;
use tidemark::{MigrationConfig, MigrationError, Migrator, SqlFileResolver, Version};

/// Test migrating scripts discovered on disk
#[tokio::test]
async fn test_migrates_scripts_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("V1__create_users.sql"),
        "CREATE TABLE users (id INT);\nCREATE INDEX users_id ON users (id);\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("V1_1__add_email.sql"),
        "ALTER TABLE users ADD COLUMN email TEXT;\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("R__user_view.sql"),
        "CREATE VIEW active_users AS SELECT * FROM users;\n",
    )
    .unwrap();

    let history = MemoryHistory::new();
    let executor = MemoryExecutor::new();
    let engine = Migrator::new(MigrationConfig::new(), history.clone(), executor.clone())
        .with_resolver(Box::new(SqlFileResolver::new(dir.path())));

    let summary = engine.migrate().await.unwrap();
    assert_eq!(summary.applied_count, 3);
    assert_eq!(summary.final_version, Version::parse("1.1").unwrap());

    let executed = executor.executed();
    assert_eq!(executed.len(), 4);
    assert!(executed[0].contains("CREATE TABLE users"));
    assert!(executed[2].contains("ADD COLUMN email"));
    assert!(executed[3].contains("CREATE VIEW"));

    let records = history.records();
    assert_eq!(records[0].script, "V1__create_users.sql");
    assert_eq!(records[0].description, "create users");
    assert_eq!(records[2].version, None);
}

/// Test that a malformed script name is a resolution error
#[tokio::test]
async fn test_malformed_script_names_fail_resolution() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("V1_missing_separator.sql"), "SELECT 1;").unwrap();

    let history = MemoryHistory::new();
    let executor = MemoryExecutor::new();
    let engine = Migrator::new(MigrationConfig::new(), history.clone(), executor.clone())
        .with_resolver(Box::new(SqlFileResolver::new(dir.path())));

    let err = engine.migrate().await.unwrap_err();
    assert!(matches!(err, MigrationError::InvalidMigrationName { .. }));
    assert!(history.records().is_empty());
}

/// Test that overlapping scan roots do not duplicate migrations
#[tokio::test]
async fn test_overlapping_locations_collapse_identical_scripts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("V1__init.sql"), "CREATE TABLE t (id INT);").unwrap();

    let history = MemoryHistory::new();
    let executor = MemoryExecutor::new();
    let engine = Migrator::new(MigrationConfig::new(), history.clone(), executor.clone())
        .with_resolver(Box::new(SqlFileResolver::new(dir.path())))
        .with_resolver(Box::new(SqlFileResolver::new(dir.path())));

    let summary = engine.migrate().await.unwrap();
    assert_eq!(summary.applied_count, 1);
}
