//! Store data model.
//!
//! # Responsibility
//! - Define attribute values and their canonical storage encoding.
//! - Define records and change-feed events exchanged with callers.
//!
//! # Invariants
//! - A record is identified by `(path, key)`; paths are opaque to the store.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod record;
pub mod value;
