use chrono::{DateTime, Utc};
use serde::Serialize;
use tidemark_common::{Error, Result};

/// A single versioned schema change with its forward and reverse SQL.
///
/// Migrations are ordered by `version`; within one catalog every version
/// appears once. Either body may be empty when the matching file is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u64,
    pub name: String,
    pub up_sql: String,
    pub down_sql: String,
}

impl Migration {
    pub fn new(
        version: u64,
        name: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            up_sql: up_sql.into(),
            down_sql: down_sql.into(),
        }
    }
}

/// A row of the state table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRecord {
    pub version: u64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Whether a catalog entry has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Applied { applied_at: DateTime<Utc> },
}

/// One catalog entry and its state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub version: u64,
    pub name: String,
    #[serde(flatten)]
    pub status: MigrationStatus,
}

/// Catalog entries in version order plus applied rows with no matching file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub migrations: Vec<StatusEntry>,
    pub orphaned: Vec<AppliedRecord>,
}

impl StatusReport {
    pub fn pending_count(&self) -> usize {
        self.migrations
            .iter()
            .filter(|m| m.status == MigrationStatus::Pending)
            .count()
    }
}

/// Sort a catalog by version, rejecting duplicate versions.
pub fn into_catalog(mut migrations: Vec<Migration>) -> Result<Vec<Migration>> {
    migrations.sort_by_key(|m| m.version);
    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(Error::DuplicateMigration {
            version: pair[0].version,
            first: pair[0].name.clone(),
            second: pair[1].name.clone(),
        });
    }
    Ok(migrations)
}
