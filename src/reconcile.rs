//! Reconciliation of resolved migrations against the schema history.
//!
//! Reconciliation is a pure read-side computation: it merges the migrations
//! discoverable in the configured locations with the records of migrations
//! already run, and annotates every entry with a derived [`MigrationState`].
//! Nothing here mutates the history; the apply loop runs this computation on
//! a private snapshot taken after lock acquisition and recomputes it on
//! every pass.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::history::AppliedMigration;
use crate::migration::{MigrationKind, ResolvedMigration};
use crate::version::Version;

/// The state of one migration relative to the target schema.
///
/// Derived, never stored: a pure function of the resolved set, the applied
/// records, the target ceiling, and the out-of-order flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationState {
    /// Resolved and not yet applied.
    Pending,
    /// Resolved, but its version exceeds the target ceiling.
    AboveTarget,
    /// Resolved, but its version is at or below the baseline marker.
    BelowBaseline,
    /// Resolved with a version below the latest applied one, and
    /// out-of-order execution is disabled.
    Ignored,
    /// The synthetic baseline marker.
    Baseline,
    /// Applied successfully.
    Success,
    /// Applied and failed.
    Failed,
    /// Applied successfully, after a higher version had already been applied.
    OutOfOrder,
    /// Applied successfully with a version no resolver knows about.
    FutureSuccess,
    /// Applied unsuccessfully with a version no resolver knows about.
    FutureFailed,
    /// Applied successfully but no longer resolvable.
    MissingSuccess,
    /// Applied unsuccessfully and no longer resolvable.
    MissingFailed,
    /// The latest run of a repeatable migration whose checksum has changed
    /// since; it will be re-applied.
    Outdated,
    /// An older run of a repeatable migration, superseded by a later one.
    Superseded,
}

impl MigrationState {
    /// Whether a history record exists for this entry.
    pub fn is_applied(&self) -> bool {
        !matches!(
            self,
            Self::Pending | Self::AboveTarget | Self::BelowBaseline | Self::Ignored
        )
    }

    /// Whether this entry records a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed | Self::FutureFailed | Self::MissingFailed)
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::AboveTarget => "above target",
            Self::BelowBaseline => "below baseline",
            Self::Ignored => "ignored",
            Self::Baseline => "baseline",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::OutOfOrder => "out of order",
            Self::FutureSuccess => "future (success)",
            Self::FutureFailed => "future (failed)",
            Self::MissingSuccess => "missing (success)",
            Self::MissingFailed => "missing (failed)",
            Self::Outdated => "outdated",
            Self::Superseded => "superseded",
        };
        f.write_str(name)
    }
}

/// Options steering reconciliation and validation.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Apply no migration above this version.
    pub target: Option<Version>,
    /// Allow applying migrations with versions below the latest applied one.
    pub out_of_order: bool,
    /// Baseline version; resolved migrations at or below it are not applied.
    pub baseline: Option<Version>,
    /// Tolerate applied migrations that are no longer resolvable.
    pub ignore_missing: bool,
    /// Tolerate a failed migration above the latest resolved version.
    pub ignore_future_failures: bool,
}

/// One entry of the reconciled view: a resolved migration, an applied
/// record, or both, with the derived state.
#[derive(Debug, Clone)]
pub struct MigrationInfo {
    /// The resolved side, when the migration is discoverable.
    pub resolved: Option<ResolvedMigration>,
    /// The applied side, when a history record exists.
    pub applied: Option<AppliedMigration>,
    /// The derived state.
    pub state: MigrationState,
}

impl MigrationInfo {
    /// Version of the entry, drawn from the applied record when present.
    pub fn version(&self) -> Option<&Version> {
        match &self.applied {
            Some(applied) => applied.version.as_ref(),
            None => self.resolved.as_ref().and_then(|m| m.version.as_ref()),
        }
    }

    /// Description of the entry.
    pub fn description(&self) -> &str {
        match &self.applied {
            Some(applied) => &applied.description,
            None => self.resolved.as_ref().map(|m| m.description.as_str()).unwrap_or(""),
        }
    }

    /// Kind of the entry.
    pub fn kind(&self) -> MigrationKind {
        match &self.applied {
            Some(applied) => applied.kind,
            None => self
                .resolved
                .as_ref()
                .map(|m| m.kind)
                .unwrap_or(MigrationKind::Versioned),
        }
    }

    /// Installed rank, when applied.
    pub fn installed_rank(&self) -> Option<i32> {
        self.applied.as_ref().map(|a| a.installed_rank)
    }
}

struct Context {
    target: Option<Version>,
    out_of_order: bool,
    baseline: Option<Version>,
    /// Highest successfully applied real version.
    last_applied: Version,
    /// Highest resolved version.
    last_resolved: Version,
    /// Highest installed rank per repeatable description.
    latest_repeatable_runs: HashMap<String, i32>,
}

/// The merged, state-annotated view of resolved and applied migrations.
pub struct Reconciliation {
    infos: Vec<MigrationInfo>,
    options: ReconcileOptions,
}

impl Reconciliation {
    /// Merge these resolved migrations and applied records.
    pub fn new(
        resolved: &[ResolvedMigration],
        applied: &[AppliedMigration],
        options: &ReconcileOptions,
    ) -> Self {
        let mut resolved_versioned: BTreeMap<Version, &ResolvedMigration> = BTreeMap::new();
        let mut resolved_repeatable: BTreeMap<String, &ResolvedMigration> = BTreeMap::new();
        let mut last_resolved = Version::empty();
        for migration in resolved {
            match &migration.version {
                Some(version) => {
                    if *version > last_resolved {
                        last_resolved = version.clone();
                    }
                    resolved_versioned.insert(version.clone(), migration);
                }
                None => {
                    resolved_repeatable.insert(migration.description.clone(), migration);
                }
            }
        }

        let mut applied_sorted: Vec<&AppliedMigration> = applied.iter().collect();
        applied_sorted.sort_by_key(|record| record.installed_rank);

        let mut applied_versioned: Vec<(&AppliedMigration, bool)> = Vec::new();
        let mut applied_repeatable: Vec<&AppliedMigration> = Vec::new();
        let mut baseline = options.baseline.clone();
        for record in applied_sorted {
            match &record.version {
                Some(version) => {
                    if record.kind == MigrationKind::Baseline
                        && baseline.as_ref().is_none_or(|current| version > current)
                    {
                        baseline = Some(version.clone());
                    }
                    applied_versioned.push((record, false));
                }
                None => applied_repeatable.push(record),
            }
        }

        // An applied version lower than one already seen was run out of order.
        let mut max_seen = Version::empty();
        let mut last_applied = Version::empty();
        for (record, out_of_order) in applied_versioned.iter_mut() {
            let Some(version) = &record.version else {
                continue;
            };
            if *version > max_seen {
                max_seen = version.clone();
            } else {
                *out_of_order = true;
            }
            if record.success && *version > last_applied {
                last_applied = version.clone();
            }
        }

        let mut latest_repeatable_runs: HashMap<String, i32> = HashMap::new();
        for record in &applied_repeatable {
            let rank = latest_repeatable_runs
                .entry(record.description.clone())
                .or_insert(record.installed_rank);
            if record.installed_rank > *rank {
                *rank = record.installed_rank;
            }
        }

        let context = Context {
            target: options.target.clone(),
            out_of_order: options.out_of_order,
            baseline,
            last_applied,
            last_resolved,
            latest_repeatable_runs,
        };

        let mut infos = Vec::new();

        let mut consumed: HashSet<Version> = HashSet::new();
        for (record, out_of_order) in &applied_versioned {
            let pair = match record.kind {
                MigrationKind::Versioned => record
                    .version
                    .as_ref()
                    .and_then(|version| resolved_versioned.get(version))
                    .copied(),
                _ => None,
            };
            if let Some(pair) = pair {
                if let Some(version) = &pair.version {
                    consumed.insert(version.clone());
                }
            }
            infos.push(make_info(
                pair.cloned(),
                Some((*record).clone()),
                *out_of_order,
                &context,
            ));
        }

        for (version, migration) in &resolved_versioned {
            if consumed.contains(version) {
                continue;
            }
            infos.push(make_info(Some((*migration).clone()), None, false, &context));
        }

        for record in &applied_repeatable {
            let pair = resolved_repeatable.get(&record.description).copied();
            infos.push(make_info(
                pair.cloned(),
                Some((*record).clone()),
                false,
                &context,
            ));
        }

        // A repeatable migration re-runs whenever its checksum no longer
        // matches the latest applied run for its description.
        for (description, migration) in &resolved_repeatable {
            let latest_run = applied_repeatable
                .iter()
                .filter(|record| &record.description == description)
                .max_by_key(|record| record.installed_rank);
            let needs_run = match latest_run {
                None => true,
                Some(record) => !migration.checksum_matches(record.checksum),
            };
            if needs_run {
                infos.push(make_info(Some((*migration).clone()), None, false, &context));
            }
        }

        infos.sort_by(compare_infos);

        Self {
            infos,
            options: options.clone(),
        }
    }

    /// All entries, applied first (by installed rank), then pending in
    /// apply order.
    pub fn all(&self) -> &[MigrationInfo] {
        &self.infos
    }

    /// The entries waiting to be applied, in apply order: versioned
    /// migrations by ascending version, then repeatables by description.
    pub fn pending(&self) -> Vec<&MigrationInfo> {
        self.infos
            .iter()
            .filter(|info| info.state == MigrationState::Pending)
            .collect()
    }

    /// The entries recording a failure.
    pub fn failed(&self) -> Vec<&MigrationInfo> {
        self.infos
            .iter()
            .filter(|info| info.state.is_failed())
            .collect()
    }

    /// The applied entries with versions above everything resolvable.
    pub fn future(&self) -> Vec<&MigrationInfo> {
        self.infos
            .iter()
            .filter(|info| {
                matches!(
                    info.state,
                    MigrationState::FutureSuccess | MigrationState::FutureFailed
                )
            })
            .collect()
    }

    /// The latest successfully applied versioned entry, falling back to the
    /// latest applied repeatable when no versioned migration has run yet.
    pub fn current(&self) -> Option<&MigrationInfo> {
        let mut current: Option<&MigrationInfo> = None;
        for info in &self.infos {
            if info.state.is_applied()
                && !info.state.is_failed()
                && info.version().is_some()
                && current.is_none_or(|c| info.version() > c.version())
            {
                current = Some(info);
            }
        }
        if current.is_some() {
            return current;
        }

        self.infos
            .iter()
            .rev()
            .find(|info| info.state.is_applied() && !info.state.is_failed())
    }

    /// The version the schema is currently at.
    pub fn current_version(&self) -> Version {
        self.current()
            .and_then(|info| info.version().cloned())
            .unwrap_or_else(Version::empty)
    }

    /// Check every entry for inconsistencies between the resolved and
    /// applied sides. Returns one message per problem found, empty when the
    /// history and the resolved migrations agree.
    pub fn validate(&self) -> Vec<String> {
        // A failed future migration is tolerated only when it is the sole
        // failure present.
        let failed = self.failed();
        let tolerate_future_failed = self.options.ignore_future_failures
            && failed.len() == 1
            && failed[0].state == MigrationState::FutureFailed;

        self.infos
            .iter()
            .filter_map(|info| self.validate_info(info, tolerate_future_failed))
            .collect()
    }

    fn validate_info(&self, info: &MigrationInfo, tolerate_future_failed: bool) -> Option<String> {
        use MigrationState::*;

        match info.state {
            AboveTarget | BelowBaseline | Superseded | Baseline => return None,
            _ => {}
        }

        if info.state.is_failed() {
            if info.state == FutureFailed && tolerate_future_failed {
                return None;
            }
            return Some(match info.version() {
                Some(version) => format!(
                    "Detected failed migration to version {} ({}).",
                    version,
                    info.description()
                ),
                None => format!(
                    "Detected failed repeatable migration: {}.",
                    info.description()
                ),
            });
        }

        let Some(resolved) = &info.resolved else {
            if matches!(info.state, MissingSuccess | MissingFailed) && !self.options.ignore_missing
            {
                return Some(match info.version() {
                    Some(version) => {
                        format!("Detected applied migration not resolved locally: {version}.")
                    }
                    None => format!(
                        "Detected applied migration not resolved locally: {}.",
                        info.description()
                    ),
                });
            }
            return None;
        };

        let Some(applied) = &info.applied else {
            return None;
        };
        if applied.kind.is_synthetic() {
            return None;
        }

        let identifier = match &applied.version {
            Some(version) => format!("version {version}"),
            None => applied.script.clone(),
        };

        if resolved.kind != applied.kind {
            return Some(mismatch_message(
                "kind",
                &identifier,
                &applied.kind.to_string(),
                &resolved.kind.to_string(),
            ));
        }

        if applied.version.is_some() {
            if !resolved.checksum_matches(applied.checksum) {
                let applied_checksum = applied
                    .checksum
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string());
                return Some(mismatch_message(
                    "checksum",
                    &identifier,
                    &applied_checksum,
                    &resolved.checksum.to_string(),
                ));
            }
            if resolved.description != applied.description {
                return Some(mismatch_message(
                    "description",
                    &identifier,
                    &applied.description,
                    &resolved.description,
                ));
            }
        }

        None
    }
}

fn mismatch_message(mismatch: &str, identifier: &str, applied: &str, resolved: &str) -> String {
    format!(
        "Migration {mismatch} mismatch for migration {identifier}\n\
         -> Applied to database : {applied}\n\
         -> Resolved locally    : {resolved}"
    )
}

fn make_info(
    resolved: Option<ResolvedMigration>,
    applied: Option<AppliedMigration>,
    out_of_order: bool,
    context: &Context,
) -> MigrationInfo {
    let state = classify(resolved.as_ref(), applied.as_ref(), out_of_order, context);
    MigrationInfo {
        resolved,
        applied,
        state,
    }
}

fn classify(
    resolved: Option<&ResolvedMigration>,
    applied: Option<&AppliedMigration>,
    out_of_order: bool,
    context: &Context,
) -> MigrationState {
    use MigrationState::*;

    let Some(applied) = applied else {
        if let Some(version) = resolved.and_then(|m| m.version.as_ref()) {
            if let Some(baseline) = &context.baseline {
                if version <= baseline {
                    return BelowBaseline;
                }
            }
            if let Some(target) = &context.target {
                if version > target {
                    return AboveTarget;
                }
            }
            if *version < context.last_applied && !context.out_of_order {
                return Ignored;
            }
        }
        return Pending;
    };

    if applied.kind == MigrationKind::Baseline {
        return Baseline;
    }

    if resolved.is_none() && is_repeatable_latest(applied, context) {
        let missing = match &applied.version {
            None => true,
            Some(version) => *version < context.last_resolved,
        };
        return match (missing, applied.success) {
            (true, true) => MissingSuccess,
            (true, false) => MissingFailed,
            (false, true) => FutureSuccess,
            (false, false) => FutureFailed,
        };
    }

    if !applied.success {
        return Failed;
    }

    if applied.version.is_none() {
        let latest = context
            .latest_repeatable_runs
            .get(&applied.description)
            .copied();
        if latest == Some(applied.installed_rank) {
            if let Some(resolved) = resolved {
                if resolved.checksum_matches(applied.checksum) {
                    return Success;
                }
            }
            return Outdated;
        }
        return Superseded;
    }

    if out_of_order {
        return OutOfOrder;
    }
    Success
}

fn is_repeatable_latest(applied: &AppliedMigration, context: &Context) -> bool {
    if applied.version.is_some() {
        return true;
    }
    match context.latest_repeatable_runs.get(&applied.description) {
        None => true,
        Some(rank) => *rank == applied.installed_rank,
    }
}

fn compare_infos(a: &MigrationInfo, b: &MigrationInfo) -> Ordering {
    if let (Some(rank_a), Some(rank_b)) = (a.installed_rank(), b.installed_rank()) {
        return rank_a.cmp(&rank_b);
    }

    // Below-baseline entries come before applied ones.
    if a.state == MigrationState::BelowBaseline && b.state.is_applied() {
        return Ordering::Less;
    }
    if a.state.is_applied() && b.state == MigrationState::BelowBaseline {
        return Ordering::Greater;
    }

    // Installed before pending.
    if a.installed_rank().is_some() {
        return Ordering::Less;
    }
    if b.installed_rank().is_some() {
        return Ordering::Greater;
    }

    match (a.version(), b.version()) {
        (Some(version_a), Some(version_b)) => version_a.cmp(version_b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.description().cmp(b.description()),
    }
}
