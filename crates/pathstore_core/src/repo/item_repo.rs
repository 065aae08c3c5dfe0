//! Item repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide record-level reads and writes over the `item` relation.
//! - Keep SQL details (prefix ranges, self-joins, keyset paging) inside the
//!   persistence boundary.
//!
//! # Invariants
//! - Writes never remove rows; deletion flips `deleted` to `1`.
//! - Read paths used by `get`, `browse` and `search` only see live rows.
//! - Every paged scan is ordered by `path` so callers can resume with
//!   `path > cursor`.

use crate::db::DbError;
use crate::model::record::{AttributeRecord, ChangeRow, Timestamp};
use crate::model::value::{decode, AttrMap, AttrValue, EncodedValue, ValueKind};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for item and global persistence.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted item data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Current persisted state of one `(path, key)`, as seen by the write path.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredState {
    /// `None` when the stored tag is not recognized.
    pub kind: Option<ValueKind>,
    pub value: Value,
    pub deleted: bool,
}

impl StoredState {
    /// Returns whether the stored value is byte-identical to `encoded`.
    pub fn holds(&self, encoded: &EncodedValue) -> bool {
        self.kind == Some(encoded.kind) && self.value == encoded.value
    }
}

/// One `(key, value)` term of a search; see [`ItemRepository::search_paths`].
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTerm {
    pub key: String,
    pub value: EncodedValue,
}

/// Repository interface for item reads and writes.
pub trait ItemRepository {
    /// Loads the write-path view of one record, deleted or not.
    fn find_state(&self, path: &str, key: &str) -> RepoResult<Option<StoredState>>;
    /// Inserts or replaces one record as live with the given stamp.
    fn upsert(
        &self,
        path: &str,
        key: &str,
        value: &EncodedValue,
        updated_at: Timestamp,
    ) -> RepoResult<()>;
    /// Lists live keys at `path`, optionally restricted to `keys`.
    fn live_keys(&self, path: &str, keys: Option<&[&str]>) -> RepoResult<Vec<String>>;
    /// Tombstones live records at `path` for `keys`; returns rows changed.
    fn mark_deleted(&self, path: &str, keys: &[String], updated_at: Timestamp)
        -> RepoResult<usize>;
    /// Loads one live value.
    fn get_value(&self, path: &str, key: &str) -> RepoResult<Option<AttrValue>>;
    /// Loads live values at `path`, optionally restricted to `keys`.
    fn get_values(&self, path: &str, keys: Option<&[&str]>) -> RepoResult<AttrMap>;
    /// Loads one record including tombstones.
    fn get_record(&self, path: &str, key: &str) -> RepoResult<Option<AttributeRecord>>;
    /// Lists distinct live paths in `[lower, upper)` after `after`, in path order.
    fn paths_in_range(
        &self,
        lower: &str,
        upper: &str,
        after: Option<&str>,
        limit: u32,
    ) -> RepoResult<Vec<String>>;
    /// Lists live paths matching every term, in path order.
    fn search_paths(&self, terms: &[EncodedTerm]) -> RepoResult<Vec<String>>;
    /// Lists change rows for the next `limit` paths after `after` that have at
    /// least one record stamped above `since`.
    fn change_rows(
        &self,
        since: Timestamp,
        keys: Option<&[&str]>,
        after: Option<&str>,
        limit: u32,
    ) -> RepoResult<Vec<ChangeRow>>;
}

/// SQLite-backed item repository.
pub struct SqliteItemRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteItemRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ItemRepository for SqliteItemRepository<'_> {
    fn find_state(&self, path: &str, key: &str) -> RepoResult<Option<StoredState>> {
        let row = self
            .conn
            .query_row(
                "SELECT kind, value, deleted
                 FROM item
                 WHERE path = ?1 AND key = ?2;",
                params![path, key],
                |row| {
                    Ok((
                        row.get::<_, String>("kind")?,
                        row.get::<_, Value>("value")?,
                        row.get::<_, i64>("deleted")?,
                    ))
                },
            )
            .optional()?;

        let Some((kind, value, deleted)) = row else {
            return Ok(None);
        };

        Ok(Some(StoredState {
            kind: ValueKind::parse(&kind),
            value,
            deleted: parse_deleted(deleted)?,
        }))
    }

    fn upsert(
        &self,
        path: &str,
        key: &str,
        value: &EncodedValue,
        updated_at: Timestamp,
    ) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO item (path, key, kind, value, updated_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)
             ON CONFLICT (path, key) DO UPDATE SET
                kind = excluded.kind,
                value = excluded.value,
                updated_at = excluded.updated_at,
                deleted = 0;",
            params![path, key, value.kind.as_db(), &value.value, updated_at],
        )?;
        Ok(())
    }

    fn live_keys(&self, path: &str, keys: Option<&[&str]>) -> RepoResult<Vec<String>> {
        let mut sql = String::from(
            "SELECT key FROM item
             WHERE path = ?1 AND deleted = 0",
        );
        let mut bind_values = vec![Value::Text(path.to_string())];
        sql.push_str(&KeyFilter::bind(&mut bind_values, keys).sql("key"));
        sql.push_str(" ORDER BY key");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut found = Vec::new();
        while let Some(row) = rows.next()? {
            found.push(row.get(0)?);
        }
        Ok(found)
    }

    fn mark_deleted(
        &self,
        path: &str,
        keys: &[String],
        updated_at: Timestamp,
    ) -> RepoResult<usize> {
        let mut stmt = self.conn.prepare(
            "UPDATE item
             SET deleted = 1, updated_at = ?3
             WHERE path = ?1 AND key = ?2 AND deleted = 0;",
        )?;
        let mut changed = 0;
        for key in keys {
            changed += stmt.execute(params![path, key, updated_at])?;
        }
        Ok(changed)
    }

    fn get_value(&self, path: &str, key: &str) -> RepoResult<Option<AttrValue>> {
        let value = self
            .conn
            .query_row(
                "SELECT kind, value
                 FROM item
                 WHERE path = ?1 AND key = ?2 AND deleted = 0;",
                params![path, key],
                |row| {
                    Ok(decode(
                        &row.get::<_, String>("kind")?,
                        row.get::<_, Value>("value")?,
                    ))
                },
            )
            .optional()?;
        Ok(value)
    }

    fn get_values(&self, path: &str, keys: Option<&[&str]>) -> RepoResult<AttrMap> {
        let mut sql = String::from(
            "SELECT key, kind, value FROM item
             WHERE path = ?1 AND deleted = 0",
        );
        let mut bind_values = vec![Value::Text(path.to_string())];
        sql.push_str(&KeyFilter::bind(&mut bind_values, keys).sql("key"));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut values = AttrMap::new();
        while let Some(row) = rows.next()? {
            let kind: String = row.get("kind")?;
            values.insert(row.get("key")?, decode(&kind, row.get("value")?));
        }
        Ok(values)
    }

    fn get_record(&self, path: &str, key: &str) -> RepoResult<Option<AttributeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, key, kind, value, updated_at, deleted
             FROM item
             WHERE path = ?1 AND key = ?2;",
        )?;
        let mut rows = stmt.query(params![path, key])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(row)?));
        }
        Ok(None)
    }

    fn paths_in_range(
        &self,
        lower: &str,
        upper: &str,
        after: Option<&str>,
        limit: u32,
    ) -> RepoResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT path
             FROM item
             WHERE deleted = 0
               AND path >= ?1
               AND path < ?2
               AND (?3 IS NULL OR path > ?3)
             ORDER BY path
             LIMIT ?4;",
        )?;
        let mut rows = stmt.query(params![lower, upper, after, i64::from(limit)])?;
        let mut paths = Vec::new();
        while let Some(row) = rows.next()? {
            paths.push(row.get(0)?);
        }
        Ok(paths)
    }

    fn search_paths(&self, terms: &[EncodedTerm]) -> RepoResult<Vec<String>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from("SELECT t0.path FROM item t0");
        for index in 1..terms.len() {
            sql.push_str(&format!(
                " JOIN item t{index} ON t{index}.path = t0.path"
            ));
        }

        let mut bind_values: Vec<Value> = Vec::with_capacity(terms.len() * 3);
        for (index, term) in terms.iter().enumerate() {
            let base = index * 3;
            sql.push_str(if index == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!(
                "t{index}.key = ?{} AND t{index}.kind = ?{} AND t{index}.value IS ?{} AND t{index}.deleted = 0",
                base + 1,
                base + 2,
                base + 3
            ));
            bind_values.push(Value::Text(term.key.clone()));
            bind_values.push(Value::Text(term.value.kind.as_db().to_string()));
            bind_values.push(term.value.value.clone());
        }
        sql.push_str(" ORDER BY t0.path");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut paths = Vec::new();
        while let Some(row) = rows.next()? {
            paths.push(row.get(0)?);
        }
        Ok(paths)
    }

    fn change_rows(
        &self,
        since: Timestamp,
        keys: Option<&[&str]>,
        after: Option<&str>,
        limit: u32,
    ) -> RepoResult<Vec<ChangeRow>> {
        let mut bind_values = vec![
            Value::Integer(since),
            after.map_or(Value::Null, |path| Value::Text(path.to_string())),
            Value::Integer(i64::from(limit)),
        ];
        let filter = KeyFilter::bind(&mut bind_values, keys);
        let key_filter = filter.sql("key");
        let inner_key_filter = filter.sql("inner_item.key");

        let sql = format!(
            "SELECT path, key, updated_at, deleted
             FROM item
             WHERE updated_at > ?1{key_filter}
               AND path IN (
                   SELECT DISTINCT inner_item.path
                   FROM item inner_item
                   WHERE inner_item.updated_at > ?1{inner_key_filter}
                     AND (?2 IS NULL OR inner_item.path > ?2)
                   ORDER BY inner_item.path
                   LIMIT ?3
               )
             ORDER BY path, key;"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut changes = Vec::new();
        while let Some(row) = rows.next()? {
            changes.push(ChangeRow {
                path: row.get("path")?,
                key: row.get("key")?,
                updated_at: row.get("updated_at")?,
                deleted: parse_deleted(row.get("deleted")?)?,
            });
        }
        Ok(changes)
    }
}

/// Key restriction bound as numbered placeholders, so the same binding can be
/// referenced from more than one place in a statement.
enum KeyFilter {
    All,
    Nothing,
    In(String),
}

impl KeyFilter {
    fn bind(bind_values: &mut Vec<Value>, keys: Option<&[&str]>) -> Self {
        let Some(keys) = keys else {
            return Self::All;
        };
        if keys.is_empty() {
            return Self::Nothing;
        }

        let placeholders = keys
            .iter()
            .map(|key| {
                bind_values.push(Value::Text((*key).to_string()));
                format!("?{}", bind_values.len())
            })
            .collect::<Vec<_>>();
        Self::In(placeholders.join(", "))
    }

    fn sql(&self, column: &str) -> String {
        match self {
            Self::All => String::new(),
            Self::Nothing => " AND 0".to_string(),
            Self::In(placeholders) => format!(" AND {column} IN ({placeholders})"),
        }
    }
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<AttributeRecord> {
    let kind: String = row.get("kind")?;
    Ok(AttributeRecord {
        path: row.get("path")?,
        key: row.get("key")?,
        value: decode(&kind, row.get("value")?),
        updated_at: row.get("updated_at")?,
        deleted: parse_deleted(row.get("deleted")?)?,
    })
}

fn parse_deleted(value: i64) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid deleted value `{other}` in item.deleted"
        ))),
    }
}
