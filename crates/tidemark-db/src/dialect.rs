use std::fmt;
use std::str::FromStr;

use tidemark_common::{Error, Result};

/// Name of the table that records applied migrations.
pub const STATE_TABLE: &str = "schema_migrations";

/// SQL syntax differences between the supported database families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Mysql,
    Sqlite,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::Postgres, Dialect::Mysql, Dialect::Sqlite];

    /// Look up a dialect by database-type identifier. Matching ignores case
    /// and accepts the `postgresql` and `sqlite3` aliases.
    pub fn resolve(db_type: &str) -> Result<Self> {
        match db_type.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::Mysql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            _ => Err(Error::UnsupportedDialect(db_type.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Positional parameter token for the 1-based `ordinal`.
    pub fn placeholder(&self, ordinal: usize) -> String {
        match self {
            Dialect::Postgres => format!("${ordinal}"),
            Dialect::Mysql | Dialect::Sqlite => "?".to_string(),
        }
    }

    pub fn create_state_table_sql(&self) -> String {
        let (version, name, applied_at) = match self {
            Dialect::Postgres => (
                "BIGINT",
                "VARCHAR(255)",
                "TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP",
            ),
            Dialect::Mysql => (
                "BIGINT",
                "VARCHAR(255)",
                "TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6)",
            ),
            Dialect::Sqlite => (
                "INTEGER",
                "TEXT",
                "TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            ),
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {STATE_TABLE} (
                version {version} PRIMARY KEY,
                name {name} NOT NULL,
                applied_at {applied_at}
            )"
        )
    }

    /// Counts tables named like the state table; takes the table name as its
    /// only parameter.
    pub fn state_table_exists_sql(&self) -> String {
        let p = self.placeholder(1);
        match self {
            Dialect::Postgres => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = {p}::text"
            ),
            Dialect::Mysql => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = {p}"
            ),
            Dialect::Sqlite => {
                format!("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = {p}")
            }
        }
    }

    /// Inserts `(version, name, applied_at)`.
    pub fn insert_applied_sql(&self) -> String {
        format!(
            "INSERT INTO {STATE_TABLE} (version, name, applied_at) VALUES ({}, {}, {})",
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3)
        )
    }

    /// Deletes the row for one version.
    pub fn delete_applied_sql(&self) -> String {
        format!(
            "DELETE FROM {STATE_TABLE} WHERE version = {}",
            self.placeholder(1)
        )
    }

    pub fn select_applied_sql(&self) -> String {
        format!("SELECT version, name, applied_at FROM {STATE_TABLE}")
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Dialect::resolve(s)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
