use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported database type: {0}")]
    UnsupportedDialect(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("failed to apply migration {version}: {reason}")]
    MigrationApply { version: u64, reason: String },

    #[error("failed to roll back migration {version}: {reason}")]
    MigrationRollback { version: u64, reason: String },

    #[error("no migrations to roll back")]
    NothingToRollback,

    /// Two sources claim the same migration slot.
    #[error("duplicate migration for version {version}: {first} and {second}")]
    DuplicateMigration {
        version: u64,
        first: String,
        second: String,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The migration version a failure is attributed to, if any.
    pub fn version(&self) -> Option<u64> {
        match self {
            Error::MigrationApply { version, .. }
            | Error::MigrationRollback { version, .. }
            | Error::DuplicateMigration { version, .. } => Some(*version),
            _ => None,
        }
    }
}
