use tidemark_common::{Error, Result};
use tidemark_db::{Database, Dialect};
use tracing::{debug, info};

/// A database URL split into the dialect and what the driver expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUrl {
    pub dialect: Dialect,
    pub target: String,
}

impl DatabaseUrl {
    /// Parse `dbtype://connection`. SQLite and MySQL drivers take the part
    /// after the scheme; Postgres takes the whole URL.
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url.split_once("://").ok_or_else(|| {
            Error::Config("invalid database URL format. Expected: dbtype://connection-url".into())
        })?;

        let dialect = Dialect::resolve(scheme)?;
        let target = match dialect {
            Dialect::Postgres => url.to_string(),
            Dialect::Mysql | Dialect::Sqlite => rest.to_string(),
        };
        if target.is_empty() {
            return Err(Error::Config(format!("database URL has no target: {url}")));
        }

        Ok(Self { dialect, target })
    }
}

/// An open driver connection owned by the CLI.
pub enum Connection {
    Sqlite(rusqlite::Connection),
    #[cfg(feature = "postgres")]
    Postgres(postgres::Client),
}

impl Connection {
    pub fn open(url: &DatabaseUrl) -> Result<Self> {
        match url.dialect {
            Dialect::Sqlite => {
                let conn = if url.target == ":memory:" {
                    rusqlite::Connection::open_in_memory()
                } else {
                    rusqlite::Connection::open(&url.target)
                }
                .map_err(|e| Error::Database(format!("failed to open {}: {e}", url.target)))?;

                conn.execute_batch("PRAGMA foreign_keys=ON;")
                    .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

                info!("opened sqlite database at {}", url.target);
                Ok(Connection::Sqlite(conn))
            }
            #[cfg(feature = "postgres")]
            Dialect::Postgres => {
                let client = postgres::Client::connect(&url.target, postgres::NoTls)
                    .map_err(|e| Error::Database(format!("error connecting to database: {e}")))?;
                info!("connected to postgres");
                Ok(Connection::Postgres(client))
            }
            #[cfg(not(feature = "postgres"))]
            Dialect::Postgres => Err(Error::Config(
                "postgres support was not compiled in (enable the `postgres` feature)".into(),
            )),
            Dialect::Mysql => {
                debug!("mysql URL given: {}", url.target);
                Err(Error::Config(
                    "mysql URLs are recognised but no mysql driver is built into this binary; \
                     use sqlite:// or postgres://"
                        .into(),
                ))
            }
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Connection::Sqlite(_) => Dialect::Sqlite,
            #[cfg(feature = "postgres")]
            Connection::Postgres(_) => Dialect::Postgres,
        }
    }

    pub fn as_database(&mut self) -> &mut dyn Database {
        match self {
            Connection::Sqlite(conn) => conn as &mut dyn Database,
            #[cfg(feature = "postgres")]
            Connection::Postgres(client) => client,
        }
    }
}
