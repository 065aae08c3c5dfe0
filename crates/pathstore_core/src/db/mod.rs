//! SQLite layer under the store: connections, schema, and access paths.
//!
//! # Responsibility
//! - Open the writer connection (WAL, migrations applied) and the read-only
//!   connections the store pools beside it.
//! - Own the schema: versioned migrations and the droppable access-path
//!   indexes used by bulk imports.
//! - Classify SQLite failures, separating lock contention from the rest.
//!
//! # Invariants
//! - Schema version lives in `PRAGMA user_version` and never moves backwards.
//! - Read-only connections are never opened on a file that has not been
//!   bootstrapped by a writer.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod indexes;
pub mod migrations;
mod open;

pub use indexes::{
    drop_access_path_indexes, ensure_access_path_indexes, missing_access_path_indexes,
};
pub use open::{open_db, open_db_in_memory, open_read_only};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl DbError {
    /// Returns whether the failure came from lock contention with another
    /// writer (`SQLITE_BUSY` / `SQLITE_LOCKED`).
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
