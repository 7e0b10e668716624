//! The seam between the migration engine and a database driver.
//!
//! The engine only needs a handful of operations, so instead of depending on
//! one driver it talks to a [`Database`] and the [`DbTransaction`]s it opens.
//! Implementations are provided for `rusqlite::Connection` and, with the
//! `postgres` feature, for `postgres::Client`. Handles are borrowed: the
//! engine never opens or closes a connection itself.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tidemark_common::{Error, Result};

use crate::migrations::AppliedRecord;

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Integer(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// Operations the engine issues outside of a transaction.
pub trait Database {
    /// Run one or more `;`-separated statements.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    /// Run a query whose first column of the single result row is a count.
    fn query_count(&mut self, sql: &str, params: &[SqlValue]) -> Result<i64>;

    /// Run a query yielding `(version, name, applied_at)` rows.
    fn query_applied(&mut self, sql: &str) -> Result<Vec<AppliedRecord>>;

    /// Open a transaction. Dropping it without committing rolls it back.
    fn begin(&mut self) -> Result<Box<dyn DbTransaction + '_>>;
}

/// An open transaction.
pub trait DbTransaction {
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    /// Run a single parameterised statement, returning the affected row count.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

fn db_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(format!("{context}: {e}"))
}

fn version_from_row(raw: i64) -> Result<u64> {
    u64::try_from(raw).map_err(|_| Error::Database(format!("invalid version in state table: {raw}")))
}

// --- SQLite ---------------------------------------------------------------

fn to_sqlite(value: &SqlValue) -> rusqlite::types::Value {
    use rusqlite::types::Value;
    match value {
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Text(s) => Value::Text(s.clone()),
        // Fixed-width UTC text sorts the same way the instants do.
        SqlValue::Timestamp(ts) => Value::Text(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
    }
}

/// Parse a timestamp stored as text by SQLite.
pub(crate) fn parse_sqlite_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // datetime('now') and CURRENT_TIMESTAMP produce "YYYY-MM-DD HH:MM:SS"
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Database(format!("invalid applied_at value {s:?}: {e}")))
}

impl Database for rusqlite::Connection {
    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        rusqlite::Connection::execute_batch(self, sql).map_err(|e| db_error("batch failed", e))
    }

    fn query_count(&mut self, sql: &str, params: &[SqlValue]) -> Result<i64> {
        rusqlite::Connection::query_row(
            self,
            sql,
            rusqlite::params_from_iter(params.iter().map(to_sqlite)),
            |row| row.get(0),
        )
        .map_err(|e| db_error("count query failed", e))
    }

    fn query_applied(&mut self, sql: &str) -> Result<Vec<AppliedRecord>> {
        let mut stmt = self
            .prepare(sql)
            .map_err(|e| db_error("failed to prepare query", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| db_error("failed to query applied migrations", e))?;

        let mut records = Vec::new();
        for row in rows {
            let (version, name, applied_at) =
                row.map_err(|e| db_error("failed to read applied migration row", e))?;
            records.push(AppliedRecord {
                version: version_from_row(version)?,
                name,
                applied_at: parse_sqlite_timestamp(&applied_at)?,
            });
        }
        Ok(records)
    }

    fn begin(&mut self) -> Result<Box<dyn DbTransaction + '_>> {
        let tx = self
            .transaction()
            .map_err(|e| db_error("failed to start transaction", e))?;
        Ok(Box::new(tx))
    }
}

impl DbTransaction for rusqlite::Transaction<'_> {
    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        rusqlite::Connection::execute_batch(self, sql).map_err(|e| db_error("batch failed", e))
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        rusqlite::Connection::execute(
            self,
            sql,
            rusqlite::params_from_iter(params.iter().map(to_sqlite)),
        )
        .map(|n| n as u64)
        .map_err(|e| db_error("statement failed", e))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        rusqlite::Transaction::commit(*self).map_err(|e| db_error("commit failed", e))
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        rusqlite::Transaction::rollback(*self).map_err(|e| db_error("rollback failed", e))
    }
}

// --- Postgres -------------------------------------------------------------

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use postgres::types::ToSql;

    fn to_postgres(params: &[SqlValue]) -> Vec<Box<dyn ToSql + Sync>> {
        params
            .iter()
            .map(|value| -> Box<dyn ToSql + Sync> {
                match value {
                    SqlValue::Integer(i) => Box::new(*i),
                    SqlValue::Text(s) => Box::new(s.clone()),
                    SqlValue::Timestamp(ts) => Box::new(*ts),
                }
            })
            .collect()
    }

    fn as_refs(values: &[Box<dyn ToSql + Sync>]) -> Vec<&(dyn ToSql + Sync)> {
        values.iter().map(|v| v.as_ref()).collect()
    }

    // Tables created by older tools use INTEGER and TIMESTAMP columns.
    fn read_version(row: &postgres::Row) -> Result<i64> {
        match row.try_get::<_, i64>(0) {
            Ok(v) => Ok(v),
            Err(_) => row
                .try_get::<_, i32>(0)
                .map(i64::from)
                .map_err(|e| db_error("failed to read version", e)),
        }
    }

    fn read_applied_at(row: &postgres::Row) -> Result<DateTime<Utc>> {
        match row.try_get::<_, DateTime<Utc>>(2) {
            Ok(at) => Ok(at),
            Err(_) => row
                .try_get::<_, NaiveDateTime>(2)
                .map(|naive| naive.and_utc())
                .map_err(|e| db_error("failed to read applied_at", e)),
        }
    }

    impl Database for postgres::Client {
        fn execute_batch(&mut self, sql: &str) -> Result<()> {
            self.batch_execute(sql)
                .map_err(|e| db_error("batch failed", e))
        }

        fn query_count(&mut self, sql: &str, params: &[SqlValue]) -> Result<i64> {
            let values = to_postgres(params);
            let row = self
                .query_one(sql, &as_refs(&values))
                .map_err(|e| db_error("count query failed", e))?;
            row.try_get(0)
                .map_err(|e| db_error("count query returned no integer", e))
        }

        fn query_applied(&mut self, sql: &str) -> Result<Vec<AppliedRecord>> {
            let rows = self
                .query(sql, &[])
                .map_err(|e| db_error("failed to query applied migrations", e))?;

            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                records.push(AppliedRecord {
                    version: version_from_row(read_version(&row)?)?,
                    name: row
                        .try_get(1)
                        .map_err(|e| db_error("failed to read name", e))?,
                    applied_at: read_applied_at(&row)?,
                });
            }
            Ok(records)
        }

        fn begin(&mut self) -> Result<Box<dyn DbTransaction + '_>> {
            let tx = self
                .transaction()
                .map_err(|e| db_error("failed to start transaction", e))?;
            Ok(Box::new(tx))
        }
    }

    impl DbTransaction for postgres::Transaction<'_> {
        fn execute_batch(&mut self, sql: &str) -> Result<()> {
            postgres::Transaction::batch_execute(self, sql)
                .map_err(|e| db_error("batch failed", e))
        }

        fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
            let values = to_postgres(params);
            postgres::Transaction::execute(self, sql, &as_refs(&values))
                .map_err(|e| db_error("statement failed", e))
        }

        fn commit(self: Box<Self>) -> Result<()> {
            postgres::Transaction::commit(*self).map_err(|e| db_error("commit failed", e))
        }

        fn rollback(self: Box<Self>) -> Result<()> {
            postgres::Transaction::rollback(*self).map_err(|e| db_error("rollback failed", e))
        }
    }
}
