use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tidemark_common::{Error, Result};
use tracing::debug;

use crate::dialect::{Dialect, STATE_TABLE};
use crate::handle::{Database, DbTransaction, SqlValue};
use crate::migrations::{AppliedRecord, Migration};

/// Reads and writes the `schema_migrations` table for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct StateStore {
    dialect: Dialect,
}

impl StateStore {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Create the state table if it does not exist yet.
    pub fn ensure_schema(&self, db: &mut dyn Database) -> Result<()> {
        db.execute_batch(&self.dialect.create_state_table_sql())
            .map_err(|e| Error::Database(format!("failed to create {STATE_TABLE}: {e}")))?;
        debug!("ensured {STATE_TABLE} exists ({})", self.dialect);
        Ok(())
    }

    pub fn schema_exists(&self, db: &mut dyn Database) -> Result<bool> {
        let count = db.query_count(
            &self.dialect.state_table_exists_sql(),
            &[SqlValue::Text(STATE_TABLE.to_string())],
        )?;
        Ok(count > 0)
    }

    /// Fail with a readable error when `init` has not been run.
    pub fn require_schema(&self, db: &mut dyn Database) -> Result<()> {
        if self.schema_exists(db)? {
            Ok(())
        } else {
            Err(Error::Database(format!(
                "state table {STATE_TABLE} does not exist; run `init` first"
            )))
        }
    }

    /// Every row of the state table, in no particular order.
    pub fn records(&self, db: &mut dyn Database) -> Result<Vec<AppliedRecord>> {
        db.query_applied(&self.dialect.select_applied_sql())
    }

    /// Applied versions mapped to when they were applied.
    pub fn applied(&self, db: &mut dyn Database) -> Result<BTreeMap<u64, DateTime<Utc>>> {
        Ok(self
            .records(db)?
            .into_iter()
            .map(|r| (r.version, r.applied_at))
            .collect())
    }

    pub fn record_applied(
        &self,
        tx: &mut dyn DbTransaction,
        migration: &Migration,
        applied_at: DateTime<Utc>,
    ) -> Result<()> {
        tx.execute(
            &self.dialect.insert_applied_sql(),
            &[
                version_param(migration.version)?,
                SqlValue::Text(migration.name.clone()),
                SqlValue::Timestamp(applied_at),
            ],
        )?;
        Ok(())
    }

    pub fn remove_applied(&self, tx: &mut dyn DbTransaction, version: u64) -> Result<()> {
        let removed = tx.execute(
            &self.dialect.delete_applied_sql(),
            &[version_param(version)?],
        )?;
        if removed == 0 {
            return Err(Error::Database(format!(
                "no {STATE_TABLE} row for version {version}"
            )));
        }
        Ok(())
    }
}

fn version_param(version: u64) -> Result<SqlValue> {
    i64::try_from(version)
        .map(SqlValue::Integer)
        .map_err(|_| Error::Database(format!("migration version {version} does not fit the version column")))
}
