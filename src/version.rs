//! Migration version numbers.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// Display text for the version of an empty schema.
const EMPTY_DISPLAY: &str = "<< Empty Schema >>";

/// A migration version: a sequence of non-negative integer components,
/// parsed from strings like `6`, `1.2`, `005` or `20231215120000`.
///
/// Versions are totally ordered by numeric component comparison, with the
/// shorter side padded with zeros. `1` and `1.0` are equal; `1.2` sorts
/// before `1.10`. The distinguished [`Version::empty`] value sorts before
/// every real version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Version {
    /// Numeric components with trailing zero components trimmed.
    parts: Vec<u64>,
    /// The normalized textual form, kept for display.
    display: String,
}

impl Version {
    /// Parse a version string. Underscores are treated as dots.
    pub fn parse(version: &str) -> MigrateResult<Self> {
        let normalized = version.replace('_', ".");
        if normalized.is_empty() {
            return Err(MigrationError::InvalidVersion(version.to_string()));
        }

        let mut parts = Vec::new();
        for component in normalized.split('.') {
            let value: u64 = component
                .parse()
                .map_err(|_| MigrationError::InvalidVersion(version.to_string()))?;
            parts.push(value);
        }

        // Trailing zero components do not affect ordering or identity.
        while parts.len() > 1 && parts.last() == Some(&0) {
            parts.pop();
        }

        Ok(Self {
            parts,
            display: normalized,
        })
    }

    /// The version of an empty schema, sorting before all real versions.
    pub fn empty() -> Self {
        Self {
            parts: Vec::new(),
            display: EMPTY_DISPLAY.to_string(),
        }
    }

    /// Whether this is the empty-schema marker.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn part(&self, index: usize) -> u64 {
        self.parts.get(index).copied().unwrap_or(0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // The empty marker sorts strictly before everything, including "0".
        match (self.is_empty(), other.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            match self.part(i).cmp(&other.part(i)) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.display
    }
}

impl TryFrom<String> for Version {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == EMPTY_DISPLAY {
            return Ok(Self::empty());
        }
        Self::parse(&value)
    }
}
