pub mod dialect;
pub mod filename;
pub mod handle;
pub mod loader;
pub mod migrations;
pub mod runner;
pub mod state;

pub use dialect::{Dialect, STATE_TABLE};
pub use filename::{Direction, FilenameError, MigrationFile};
pub use handle::{Database, DbTransaction, SqlValue};
pub use migrations::{AppliedRecord, Migration, MigrationStatus, StatusEntry, StatusReport};
pub use runner::Migrator;
pub use state::StateStore;
