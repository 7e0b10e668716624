use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tidemark_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::dialect::Dialect;
use crate::handle::{Database, DbTransaction};
use crate::loader;
use crate::migrations::{
    AppliedRecord, Migration, MigrationStatus, StatusEntry, StatusReport, into_catalog,
};
use crate::state::StateStore;

/// Applies and reverts a catalog of migrations against one database.
///
/// The handle is borrowed for the lifetime of the migrator and is never
/// closed by it. [`Migrator::ensure_schema`] must have run against the
/// database (in this or an earlier process) before anything is applied or
/// rolled back.
pub struct Migrator<'db> {
    db: &'db mut dyn Database,
    state: StateStore,
    catalog: Vec<Migration>,
}

impl<'db> Migrator<'db> {
    pub fn new(db: &'db mut dyn Database, dialect: Dialect) -> Self {
        Self {
            db,
            state: StateStore::new(dialect),
            catalog: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.state.dialect()
    }

    pub fn catalog(&self) -> &[Migration] {
        &self.catalog
    }

    /// The underlying handle, for callers that need to run their own queries.
    pub fn database(&mut self) -> &mut dyn Database {
        &mut *self.db
    }

    /// Create the state table. Safe to call repeatedly.
    pub fn ensure_schema(&mut self) -> Result<()> {
        self.state.ensure_schema(&mut *self.db)
    }

    /// Replace the catalog with the migrations found in `dir`.
    pub fn load_catalog(&mut self, dir: &Path) -> Result<()> {
        self.catalog = loader::load(dir)?;
        Ok(())
    }

    /// Replace the catalog with migrations built in code.
    pub fn set_catalog(&mut self, migrations: Vec<Migration>) -> Result<()> {
        self.catalog = into_catalog(migrations)?;
        Ok(())
    }

    pub fn applied_versions(&mut self) -> Result<BTreeMap<u64, DateTime<Utc>>> {
        self.state.require_schema(&mut *self.db)?;
        self.state.applied(&mut *self.db)
    }

    /// Apply every pending migration in ascending version order, one
    /// transaction per migration. Stops at the first failure; migrations
    /// committed before it stay applied.
    ///
    /// Returns the versions applied by this call.
    pub fn apply_all(&mut self) -> Result<Vec<u64>> {
        let state = self.state;
        state.require_schema(&mut *self.db)?;
        let applied = state.applied(&mut *self.db)?;

        let pending: Vec<&Migration> = self
            .catalog
            .iter()
            .filter(|m| !applied.contains_key(&m.version))
            .collect();

        if pending.is_empty() {
            info!("nothing to apply ({} migration(s) already applied)", applied.len());
            return Ok(Vec::new());
        }
        debug!("{} pending migration(s)", pending.len());

        let mut last_applied_at = applied.values().max().copied();
        let mut done = Vec::with_capacity(pending.len());

        for migration in pending {
            let applied_at = next_applied_at(last_applied_at);
            apply_one(&mut *self.db, &state, migration, applied_at)?;
            info!("applied migration {}: {}", migration.version, migration.name);

            last_applied_at = Some(applied_at);
            done.push(migration.version);
        }

        Ok(done)
    }

    /// Revert the `steps` most recently applied migrations (at least one) in
    /// a single transaction. If any step fails, none of them are reverted.
    ///
    /// Order is by `applied_at`, newest first, not by version. Returns the
    /// versions rolled back, in the order they were reverted.
    pub fn rollback(&mut self, steps: usize) -> Result<Vec<u64>> {
        let steps = steps.max(1);
        let state = self.state;
        state.require_schema(&mut *self.db)?;

        let applied = state.applied(&mut *self.db)?;
        if applied.is_empty() {
            return Err(Error::NothingToRollback);
        }

        let known: BTreeSet<u64> = self.catalog.iter().map(|m| m.version).collect();
        for version in applied.keys().filter(|v| !known.contains(v)) {
            warn!("applied migration {version} has no file in the catalog; skipping it");
        }

        let mut candidates: Vec<(&Migration, DateTime<Utc>)> = self
            .catalog
            .iter()
            .filter_map(|m| applied.get(&m.version).map(|at| (m, *at)))
            .collect();
        if candidates.is_empty() {
            return Err(Error::NothingToRollback);
        }

        candidates.sort_by(|(a, a_at), (b, b_at)| {
            b_at.cmp(a_at).then_with(|| b.version.cmp(&a.version))
        });
        candidates.truncate(steps);

        let mut tx = self.db.begin()?;
        for (migration, _) in &candidates {
            if let Err(e) = revert_one(tx.as_mut(), &state, migration) {
                discard(tx, migration.version);
                return Err(Error::MigrationRollback {
                    version: migration.version,
                    reason: reason(e),
                });
            }
        }
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit rollback: {}", reason(e))))?;

        for (migration, _) in &candidates {
            info!(
                "rolled back migration {}: {}",
                migration.version, migration.name
            );
        }
        Ok(candidates.iter().map(|(m, _)| m.version).collect())
    }

    /// Every catalog entry with its state, plus applied rows that have no
    /// matching catalog entry.
    pub fn status(&mut self) -> Result<StatusReport> {
        self.state.require_schema(&mut *self.db)?;
        let records = self.state.records(&mut *self.db)?;
        let by_version: BTreeMap<u64, &AppliedRecord> =
            records.iter().map(|r| (r.version, r)).collect();

        let migrations = self
            .catalog
            .iter()
            .map(|m| StatusEntry {
                version: m.version,
                name: m.name.clone(),
                status: match by_version.get(&m.version) {
                    Some(record) => MigrationStatus::Applied {
                        applied_at: record.applied_at,
                    },
                    None => MigrationStatus::Pending,
                },
            })
            .collect();

        let known: BTreeSet<u64> = self.catalog.iter().map(|m| m.version).collect();
        let mut orphaned: Vec<AppliedRecord> = records
            .iter()
            .filter(|r| !known.contains(&r.version))
            .cloned()
            .collect();
        orphaned.sort_by_key(|r| r.version);

        Ok(StatusReport {
            migrations,
            orphaned,
        })
    }
}

fn apply_one(
    db: &mut dyn Database,
    state: &StateStore,
    migration: &Migration,
    applied_at: DateTime<Utc>,
) -> Result<()> {
    let version = migration.version;
    let mut tx = db.begin()?;

    if migration.up_sql.trim().is_empty() {
        warn!("migration {version} ({}) has an empty up body", migration.name);
    } else if let Err(e) = tx.execute_batch(&migration.up_sql) {
        discard(tx, version);
        return Err(Error::MigrationApply {
            version,
            reason: reason(e),
        });
    }

    if let Err(e) = state.record_applied(tx.as_mut(), migration, applied_at) {
        discard(tx, version);
        return Err(Error::Database(format!(
            "failed to record migration {version}: {}",
            reason(e)
        )));
    }

    tx.commit().map_err(|e| {
        Error::Database(format!(
            "failed to commit migration {version}: {}",
            reason(e)
        ))
    })
}

fn revert_one(tx: &mut dyn DbTransaction, state: &StateStore, migration: &Migration) -> Result<()> {
    if migration.down_sql.trim().is_empty() {
        warn!(
            "migration {} ({}) has an empty down body",
            migration.version, migration.name
        );
    } else {
        tx.execute_batch(&migration.down_sql)?;
    }
    state.remove_applied(tx, migration.version)
}

/// Roll back a failed transaction, logging rather than masking the original
/// error if the rollback itself fails.
fn discard(tx: Box<dyn DbTransaction + '_>, version: u64) {
    if let Err(e) = tx.rollback() {
        warn!("rollback after failed migration {version} also failed: {e}");
    }
}

/// The driver message without the outer "database error" prefix.
fn reason(e: Error) -> String {
    match e {
        Error::Database(msg) => msg,
        other => other.to_string(),
    }
}

/// Current time at microsecond precision, nudged past `last` so that
/// successive applies always order strictly.
fn next_applied_at(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match last {
        Some(prev) if now <= prev => prev.trunc_subsecs(6) + Duration::microseconds(1),
        _ => now,
    }
}
