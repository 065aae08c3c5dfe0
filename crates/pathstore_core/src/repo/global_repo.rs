//! Global counter repository: the logical clock and named watermarks.
//!
//! # Invariants
//! - The clock lives in the `global` row named [`CLOCK_NAME`].
//! - `tick` and `advance_clock_to` never move the clock backwards.

use crate::model::record::Timestamp;
use crate::repo::item_repo::RepoResult;
use rusqlite::{params, Connection, OptionalExtension};

/// Name of the `global` row holding the logical clock.
pub const CLOCK_NAME: &str = "clock";

/// Repository interface for named store-wide counters.
pub trait GlobalRepository {
    fn get_global(&self, name: &str) -> RepoResult<Option<i64>>;
    fn set_global(&self, name: &str, value: i64) -> RepoResult<()>;
    /// Increments the clock and returns the new value.
    fn tick(&self) -> RepoResult<Timestamp>;
    /// Current clock value; `0` on a fresh store.
    fn current_timestamp(&self) -> RepoResult<Timestamp>;
    /// Raises the clock to `timestamp` if it is behind.
    fn advance_clock_to(&self, timestamp: Timestamp) -> RepoResult<()>;
}

/// SQLite-backed global counter repository.
pub struct SqliteGlobalRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteGlobalRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl GlobalRepository for SqliteGlobalRepository<'_> {
    fn get_global(&self, name: &str) -> RepoResult<Option<i64>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM global WHERE name = ?1;",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_global(&self, name: &str, value: i64) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO global (name, value) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET value = excluded.value;",
            params![name, value],
        )?;
        Ok(())
    }

    fn tick(&self) -> RepoResult<Timestamp> {
        let next = self.conn.query_row(
            "INSERT INTO global (name, value) VALUES (?1, 1)
             ON CONFLICT (name) DO UPDATE SET value = value + 1
             RETURNING value;",
            [CLOCK_NAME],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    fn current_timestamp(&self) -> RepoResult<Timestamp> {
        Ok(self.get_global(CLOCK_NAME)?.unwrap_or(0))
    }

    fn advance_clock_to(&self, timestamp: Timestamp) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO global (name, value) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET value = max(value, excluded.value);",
            params![CLOCK_NAME, timestamp],
        )?;
        Ok(())
    }
}
