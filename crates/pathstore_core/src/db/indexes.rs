//! Access-path indexes over `item`, droppable for bulk imports.
//!
//! # Invariants
//! - The set here is exactly the set created by migration 2.
//! - Dropping and rebuilding only changes speed, never query results.
//! - Both directions are idempotent.

use super::DbResult;
use rusqlite::{params, Connection, OptionalExtension};

struct AccessPathIndex {
    name: &'static str,
    columns: &'static str,
}

const ACCESS_PATH_INDEXES: &[AccessPathIndex] = &[
    AccessPathIndex {
        name: "item_updated_at",
        columns: "updated_at",
    },
    AccessPathIndex {
        name: "item_key_updated_at",
        columns: "key, updated_at",
    },
    AccessPathIndex {
        name: "item_key_value",
        columns: "key, value",
    },
];

/// Drops every access-path index that exists; returns how many were dropped.
pub fn drop_access_path_indexes(conn: &Connection) -> DbResult<usize> {
    let mut dropped = 0;
    for index in ACCESS_PATH_INDEXES {
        if index_exists(conn, index.name)? {
            conn.execute_batch(&format!("DROP INDEX {};", index.name))?;
            dropped += 1;
        }
    }
    Ok(dropped)
}

/// Creates every missing access-path index; returns how many were built.
pub fn ensure_access_path_indexes(conn: &Connection) -> DbResult<usize> {
    let mut created = 0;
    for index in ACCESS_PATH_INDEXES {
        if !index_exists(conn, index.name)? {
            conn.execute_batch(&format!(
                "CREATE INDEX {} ON item ({});",
                index.name, index.columns
            ))?;
            created += 1;
        }
    }
    Ok(created)
}

/// Names of access-path indexes currently missing, in definition order.
pub fn missing_access_path_indexes(conn: &Connection) -> DbResult<Vec<&'static str>> {
    let mut missing = Vec::new();
    for index in ACCESS_PATH_INDEXES {
        if !index_exists(conn, index.name)? {
            missing.push(index.name);
        }
    }
    Ok(missing)
}

fn index_exists(conn: &Connection, name: &str) -> DbResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1;",
            params![name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::{drop_access_path_indexes, ensure_access_path_indexes, missing_access_path_indexes};
    use crate::db::open_db_in_memory;

    #[test]
    fn migrated_schema_has_every_index() {
        let conn = open_db_in_memory().unwrap();
        assert!(missing_access_path_indexes(&conn).unwrap().is_empty());
        assert_eq!(ensure_access_path_indexes(&conn).unwrap(), 0);
    }

    #[test]
    fn drop_and_rebuild_are_idempotent() {
        let conn = open_db_in_memory().unwrap();

        assert_eq!(drop_access_path_indexes(&conn).unwrap(), 3);
        assert_eq!(drop_access_path_indexes(&conn).unwrap(), 0);
        assert_eq!(
            missing_access_path_indexes(&conn).unwrap(),
            vec!["item_updated_at", "item_key_updated_at", "item_key_value"]
        );

        assert_eq!(ensure_access_path_indexes(&conn).unwrap(), 3);
        assert_eq!(ensure_access_path_indexes(&conn).unwrap(), 0);
        assert!(missing_access_path_indexes(&conn).unwrap().is_empty());
    }
}
