//! Discovery of migration scripts in configured locations.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::migration::{MigrationKind, ResolvedMigration, checksum_of};
use crate::version::Version;

/// The file name convention migration scripts follow:
/// `<prefix><version><separator><description><suffix>`, e.g.
/// `V1_2__add_users.sql`, or `<repeatable prefix><separator><description>`
/// for repeatable migrations, e.g. `R__rebuild_views.sql`.
#[derive(Debug, Clone)]
pub struct NamingConvention {
    /// Prefix of versioned migrations.
    pub versioned_prefix: String,
    /// Prefix of repeatable migrations.
    pub repeatable_prefix: String,
    /// Separator between version and description.
    pub separator: String,
    /// File suffix.
    pub suffix: String,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            versioned_prefix: "V".to_string(),
            repeatable_prefix: "R".to_string(),
            separator: "__".to_string(),
            suffix: ".sql".to_string(),
        }
    }
}

impl NamingConvention {
    /// Extract `(version, description)` from a file name.
    ///
    /// Returns `Ok(None)` for files that do not look like migrations at all
    /// (wrong suffix or prefix); those are skipped by the resolver. A file
    /// that matches a prefix but violates the convention is an error.
    pub fn parse(&self, file_name: &str) -> MigrateResult<Option<(Option<Version>, String)>> {
        let Some(stem) = file_name.strip_suffix(&self.suffix) else {
            return Ok(None);
        };

        if let Some(rest) = stem.strip_prefix(&self.repeatable_prefix) {
            if let Some(description) = rest.strip_prefix(&self.separator) {
                if description.is_empty() {
                    return Err(MigrationError::invalid_name(file_name, "missing description"));
                }
                return Ok(Some((None, description.replace('_', " "))));
            }
        }

        if let Some(rest) = stem.strip_prefix(&self.versioned_prefix) {
            let Some((version_part, description)) = rest.split_once(&self.separator) else {
                return Err(MigrationError::invalid_name(
                    file_name,
                    format!(
                        "expected {}<version>{}<description>{}",
                        self.versioned_prefix, self.separator, self.suffix
                    ),
                ));
            };
            if description.is_empty() {
                return Err(MigrationError::invalid_name(file_name, "missing description"));
            }
            let version = Version::parse(version_part)?;
            return Ok(Some((Some(version), description.replace('_', " "))));
        }

        Ok(None)
    }
}

/// A source of migration descriptors.
#[async_trait::async_trait]
pub trait MigrationResolver: Send + Sync {
    /// Produce all migrations this resolver knows about.
    async fn resolve(&self) -> MigrateResult<Vec<ResolvedMigration>>;
}

/// Resolves `.sql` migration scripts from filesystem directories.
pub struct SqlFileResolver {
    locations: Vec<PathBuf>,
    naming: NamingConvention,
}

impl SqlFileResolver {
    /// Create a resolver scanning one directory.
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            locations: vec![location.into()],
            naming: NamingConvention::default(),
        }
    }

    /// Create a resolver scanning several directories.
    pub fn with_locations(locations: Vec<PathBuf>) -> Self {
        Self {
            locations,
            naming: NamingConvention::default(),
        }
    }

    /// Override the naming convention.
    pub fn naming(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }

    async fn scan_location(
        &self,
        location: &Path,
        migrations: &mut Vec<ResolvedMigration>,
    ) -> MigrateResult<()> {
        let mut entries = tokio::fs::read_dir(location).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match self.naming.parse(file_name)? {
                None => {
                    debug!("Skipping non-migration file: {}", file_name);
                }
                Some((version, description)) => {
                    let sql = tokio::fs::read_to_string(&path).await?;
                    let checksum = checksum_of(&sql);
                    let kind = if version.is_some() {
                        MigrationKind::Versioned
                    } else {
                        MigrationKind::Repeatable
                    };
                    migrations.push(ResolvedMigration {
                        version,
                        description,
                        script: file_name.to_string(),
                        checksum,
                        kind,
                        sql,
                        run_in_transaction: true,
                    });
                }
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl MigrationResolver for SqlFileResolver {
    async fn resolve(&self) -> MigrateResult<Vec<ResolvedMigration>> {
        let mut migrations = Vec::new();

        for location in &self.locations {
            if !location.exists() {
                debug!("Migration location does not exist: {:?}", location);
                continue;
            }
            self.scan_location(location, &mut migrations).await?;
        }

        migrations.sort_by(|a, b| a.compare(b));
        Ok(migrations)
    }
}

/// A fixed, in-code set of migrations, for embedding scripts in a binary.
pub struct StaticResolver {
    migrations: Vec<ResolvedMigration>,
}

impl StaticResolver {
    /// Create a resolver over these migrations.
    pub fn new(migrations: Vec<ResolvedMigration>) -> Self {
        Self { migrations }
    }
}

#[async_trait::async_trait]
impl MigrationResolver for StaticResolver {
    async fn resolve(&self) -> MigrateResult<Vec<ResolvedMigration>> {
        Ok(self.migrations.clone())
    }
}

/// Merge the output of several resolvers into one sorted set.
///
/// Byte-identical duplicates from overlapping scan roots collapse to one
/// entry; two different migrations claiming the same version (or, for
/// repeatables, the same description) are a fatal resolution error.
pub fn collect_migrations(
    sets: Vec<Vec<ResolvedMigration>>,
) -> MigrateResult<Vec<ResolvedMigration>> {
    let mut all: Vec<ResolvedMigration> = sets.into_iter().flatten().collect();
    all.sort_by(|a, b| a.compare(b).then_with(|| a.script.cmp(&b.script)));
    all.dedup();

    for pair in all.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);
        if current.compare(next) != std::cmp::Ordering::Equal {
            continue;
        }
        return Err(match &current.version {
            Some(version) => MigrationError::DuplicateVersion {
                version: version.to_string(),
                first: current.script.clone(),
                second: next.script.clone(),
            },
            None => MigrationError::DuplicateRepeatable {
                description: current.description.clone(),
                first: current.script.clone(),
                second: next.script.clone(),
            },
        });
    }

    Ok(all)
}
