//! Store handle: the single entry point shared by every synchronizer.
//!
//! # Responsibility
//! - Own the writer connection and the read pool.
//! - Run every mutation inside one immediate transaction (AutoTransaction for
//!   single calls, [`AttributeStore::write`] for caller-scoped batches).
//! - Route reads to the pool so they never wait on an open write.
//!
//! # Invariants
//! - Migrations are complete before a handle is returned.
//! - A clock tick commits together with the records it stamps, or not at all.
//! - At most one write transaction is open per handle at a time.

use crate::db::{open_db, open_db_in_memory, DbError};
use crate::feed::Feed;
use crate::model::record::{AttributeRecord, Timestamp};
use crate::model::value::{AttrMap, AttrValue};
use crate::query::browse::Browse;
use crate::query::search::{search_paths, SearchQuery};
use crate::repo::global_repo::{GlobalRepository, SqliteGlobalRepository};
use crate::repo::item_repo::{ItemRepository, RepoError, SqliteItemRepository};
use log::{debug, info};
use rusqlite::{Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

mod pool;
mod writer;

use pool::{lock_recovering, ReadPool};
pub use writer::StoreWriter;

const DEFAULT_READ_POOL_SIZE: usize = 4;
const MAX_READ_POOL_SIZE: usize = 16;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PAGE_SIZE: u32 = 256;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-level error surfaced to synchronizers.
///
/// The store never retries; callers decide what to do with a
/// [`StoreError::WriteConflict`].
#[derive(Debug)]
pub enum StoreError {
    /// Another writer holds the database lock past the busy timeout.
    WriteConflict(DbError),
    /// Any other SQLite or bootstrap failure.
    Storage(DbError),
    /// Persisted rows violate the store's own invariants.
    InvalidData(String),
    /// The global name is owned by the store itself.
    ReservedGlobal(String),
    /// The request cannot be run as given, e.g. a search over too many keys.
    InvalidQuery(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WriteConflict(err) => write!(f, "write conflict: {err}"),
            Self::Storage(err) => write!(f, "storage failure: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted item data: {message}"),
            Self::ReservedGlobal(name) => write!(f, "global `{name}` is reserved by the store"),
            Self::InvalidQuery(message) => write!(f, "invalid query: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::WriteConflict(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::InvalidData(_) => None,
            Self::ReservedGlobal(_) => None,
            Self::InvalidQuery(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        if value.is_busy() {
            Self::WriteConflict(value)
        } else {
            Self::Storage(value)
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::from(DbError::Sqlite(value))
    }
}

impl From<RepoError> for StoreError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Db(err) => Self::from(err),
            RepoError::InvalidData(message) => Self::InvalidData(message),
        }
    }
}

/// Tuning knobs for [`AttributeStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Read-only connections for file stores. Clamped to `1..=16`.
    pub read_pool_size: usize,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Paths fetched per page by `browse` and `feed`. At least 1.
    pub page_size: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            read_pool_size: DEFAULT_READ_POOL_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StoreOptions {
    fn normalized(mut self) -> Self {
        self.read_pool_size = self.read_pool_size.clamp(1, MAX_READ_POOL_SIZE);
        self.page_size = self.page_size.max(1);
        self
    }
}

/// Versioned, path-keyed attribute store with an incremental change feed.
///
/// Build once and share across threads (`Arc<AttributeStore>`).
pub struct AttributeStore {
    writer: Mutex<Connection>,
    readers: Option<ReadPool>,
    options: StoreOptions,
}

impl AttributeStore {
    /// Opens (creating if needed) a file-backed store with default options.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_options(path, StoreOptions::default())
    }

    /// Opens a file-backed store.
    ///
    /// # Side effects
    /// - Applies pending migrations and enables WAL before returning.
    /// - Opens `read_pool_size` read-only connections.
    pub fn open_with_options(path: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        let started_at = Instant::now();
        let options = options.normalized();
        let path = path.as_ref();

        let writer = open_db(path)?;
        writer.busy_timeout(options.busy_timeout)?;
        let readers = ReadPool::open(path, options.read_pool_size, options.busy_timeout)?;

        info!(
            "event=store_open module=store status=ok mode=file readers={} duration_ms={}",
            readers.size(),
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers: Some(readers),
            options,
        })
    }

    /// Opens a private in-memory store. Reads share the writer connection.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_in_memory_with_options(StoreOptions::default())
    }

    pub fn open_in_memory_with_options(options: StoreOptions) -> StoreResult<Self> {
        let options = options.normalized();
        let writer = open_db_in_memory()?;
        writer.busy_timeout(options.busy_timeout)?;

        info!("event=store_open module=store status=ok mode=memory readers=0");
        Ok(Self {
            writer: Mutex::new(writer),
            readers: None,
            options,
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Runs `f` inside one immediate write transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err` or
    /// panics. Every mutation performed through the [`StoreWriter`] shares
    /// the transaction. Reads inside `f` must go through the writer too: the
    /// handle's own methods would wait on the lock `f` is holding.
    pub fn write<T>(&self, f: impl FnOnce(&StoreWriter<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let started_at = Instant::now();
        let mut conn = lock_recovering(&self.writer, "writer");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = f(&StoreWriter::new(&tx));
        match outcome {
            Ok(value) => {
                tx.commit()?;
                debug!(
                    "event=store_write module=store status=ok duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(value)
            }
            Err(err) => {
                debug!(
                    "event=store_write module=store status=rolled_back duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Runs a read on a pooled connection (or the writer for in-memory stores).
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        match &self.readers {
            Some(pool) => f(&pool.acquire()),
            None => f(&lock_recovering(&self.writer, "writer")),
        }
    }

    /// Records `data` at `path`; see [`StoreWriter::update`].
    pub fn update(
        &self,
        path: &str,
        data: &AttrMap,
        timestamp: Option<Timestamp>,
    ) -> StoreResult<Option<Timestamp>> {
        self.write(|writer| writer.update(path, data, timestamp))
    }

    /// Records many paths under one stamp; see [`StoreWriter::update_many`].
    pub fn update_many(
        &self,
        pairs: &[(String, AttrMap)],
        timestamp: Option<Timestamp>,
    ) -> StoreResult<Option<Timestamp>> {
        self.write(|writer| writer.update_many(pairs, timestamp))
    }

    /// Soft-deletes keys at `path`; see [`StoreWriter::delete`].
    pub fn delete(
        &self,
        path: &str,
        keys: Option<&[&str]>,
        timestamp: Option<Timestamp>,
    ) -> StoreResult<Option<Timestamp>> {
        self.write(|writer| writer.delete(path, keys, timestamp))
    }

    /// Advances the logical clock and returns the new value.
    pub fn tick(&self) -> StoreResult<Timestamp> {
        self.write(|writer| writer.tick())
    }

    /// Current logical clock value without advancing it.
    pub fn get_timestamp(&self) -> StoreResult<Timestamp> {
        self.read(|conn| Ok(SqliteGlobalRepository::new(conn).current_timestamp()?))
    }

    pub fn get_global(&self, name: &str) -> StoreResult<Option<i64>> {
        self.read(|conn| Ok(SqliteGlobalRepository::new(conn).get_global(name)?))
    }

    /// Stores a named counter such as a consumer watermark.
    ///
    /// # Errors
    /// - [`StoreError::ReservedGlobal`] for the clock's own row.
    pub fn set_global(&self, name: &str, value: i64) -> StoreResult<()> {
        self.write(|writer| writer.set_global(name, value))
    }

    /// Drops the access-path indexes; see [`StoreWriter::drop_indexes`].
    pub fn drop_indexes(&self) -> StoreResult<usize> {
        self.write(|writer| writer.drop_indexes())
    }

    /// Rebuilds missing access-path indexes; see [`StoreWriter::ensure_indexes`].
    pub fn ensure_indexes(&self) -> StoreResult<usize> {
        self.write(|writer| writer.ensure_indexes())
    }

    /// Returns the live value of one attribute.
    pub fn get(&self, path: &str, key: &str) -> StoreResult<Option<AttrValue>> {
        self.read(|conn| Ok(SqliteItemRepository::new(conn).get_value(path, key)?))
    }

    /// Returns live attributes at `path`, all of them or only `keys`.
    pub fn get_many(&self, path: &str, keys: Option<&[&str]>) -> StoreResult<AttrMap> {
        self.read(|conn| Ok(SqliteItemRepository::new(conn).get_values(path, keys)?))
    }

    /// Returns one record including its stamp and tombstone flag.
    pub fn record(&self, path: &str, key: &str) -> StoreResult<Option<AttributeRecord>> {
        self.read(|conn| Ok(SqliteItemRepository::new(conn).get_record(path, key)?))
    }

    /// Lazily lists the distinct immediate child segments under `path`.
    pub fn browse(&self, path: &str) -> Browse<'_> {
        Browse::new(self, path, self.options.page_size)
    }

    /// Returns paths matching every term of `query`, in path order.
    ///
    /// An empty query matches nothing. See [`SearchQuery`] for the term bound.
    pub fn search(&self, query: &SearchQuery) -> StoreResult<Vec<String>> {
        self.read(|conn| search_paths(conn, query))
    }

    /// Lazily lists per-path change events stamped after `since`.
    pub fn feed(&self, since: Timestamp, keys: Option<&[&str]>) -> Feed<'_> {
        Feed::new(self, since, keys, self.options.page_size)
    }
}
