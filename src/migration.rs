//! Migration descriptors and checksums.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// The kind of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationKind {
    /// A versioned migration, applied exactly once in version order.
    Versioned,
    /// A repeatable migration, re-applied whenever its checksum changes.
    Repeatable,
    /// A synthetic marker establishing a starting version; no script ran.
    Baseline,
}

impl MigrationKind {
    /// Whether this kind marks a synthetic history entry rather than a script.
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Baseline)
    }
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Versioned => "versioned",
            Self::Repeatable => "repeatable",
            Self::Baseline => "baseline",
        };
        f.write_str(name)
    }
}

/// Immutable metadata for one discoverable migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMigration {
    /// Version, or `None` for repeatable migrations.
    pub version: Option<Version>,
    /// Human readable description, extracted from the file name.
    pub description: String,
    /// Logical script name (the file name).
    pub script: String,
    /// CRC-32 checksum of the raw script source.
    pub checksum: i32,
    /// Kind of migration.
    pub kind: MigrationKind,
    /// Raw script source.
    pub sql: String,
    /// Whether the script may run inside a transaction.
    pub run_in_transaction: bool,
}

impl ResolvedMigration {
    /// Create a versioned migration descriptor.
    pub fn versioned(
        version: Version,
        description: impl Into<String>,
        script: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        let sql = sql.into();
        Self {
            version: Some(version),
            description: description.into(),
            script: script.into(),
            checksum: checksum_of(&sql),
            kind: MigrationKind::Versioned,
            sql,
            run_in_transaction: true,
        }
    }

    /// Create a repeatable migration descriptor.
    pub fn repeatable(
        description: impl Into<String>,
        script: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        let sql = sql.into();
        Self {
            version: None,
            description: description.into(),
            script: script.into(),
            checksum: checksum_of(&sql),
            kind: MigrationKind::Repeatable,
            sql,
            run_in_transaction: true,
        }
    }

    /// Opt the script out of transactional execution.
    pub fn no_transaction(mut self) -> Self {
        self.run_in_transaction = false;
        self
    }

    /// Check whether this descriptor's checksum matches an applied one.
    pub fn checksum_matches(&self, applied: Option<i32>) -> bool {
        applied == Some(self.checksum)
    }

    /// Ordering used for resolution: versioned migrations by version, all
    /// repeatable migrations after them in description order.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (&self.version, &other.version) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.description.cmp(&other.description),
        }
    }
}

/// CRC-32 checksum over the raw script bytes.
pub fn checksum_of(source: &str) -> i32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(source.as_bytes());
    hasher.finalize() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_checksum_is_stable() {
        let a = checksum_of("CREATE TABLE users (id INT);");
        let b = checksum_of("CREATE TABLE users (id INT);");
        let c = checksum_of("DROP TABLE users;");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_versioned_before_repeatable() {
        let versioned = ResolvedMigration::versioned(
            Version::parse("9").unwrap(),
            "late",
            "V9__late.sql",
            "SELECT 1;",
        );
        let repeatable =
            ResolvedMigration::repeatable("a view", "R__a_view.sql", "CREATE VIEW v AS SELECT 1;");
        assert_eq!(versioned.compare(&repeatable), Ordering::Less);
        assert_eq!(repeatable.compare(&versioned), Ordering::Greater);
    }

    #[test]
    fn test_repeatables_order_by_description() {
        let a = ResolvedMigration::repeatable("alpha", "R__alpha.sql", "SELECT 1;");
        let b = ResolvedMigration::repeatable("beta", "R__beta.sql", "SELECT 2;");
        assert_eq!(a.compare(&b), Ordering::Less);
    }

    #[test]
    fn test_checksum_matches() {
        let m = ResolvedMigration::versioned(
            Version::parse("1").unwrap(),
            "init",
            "V1__init.sql",
            "SELECT 1;",
        );
        assert!(m.checksum_matches(Some(m.checksum)));
        assert!(!m.checksum_matches(Some(m.checksum.wrapping_add(1))));
        assert!(!m.checksum_matches(None));
    }
}
