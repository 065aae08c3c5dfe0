//! Attribute records and change-feed events.
//!
//! # Responsibility
//! - Define the atomic `(path, key, value, updated_at, deleted)` fact.
//! - Define the per-path change notification produced by the feed.
//!
//! # Invariants
//! - `updated_at` only moves when content changes or a record flips between
//!   deleted and live.
//! - Feed events carry changed key names, never old or new values.

use crate::model::value::AttrValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Logical clock value. Not wall-clock time.
pub type Timestamp = i64;

/// One stored attribute, including soft-deleted ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub path: String,
    pub key: String,
    pub value: AttrValue,
    /// Stamp of the last effective change.
    pub updated_at: Timestamp,
    /// Soft delete tombstone; the value is retained.
    pub deleted: bool,
}

/// Record metadata scanned by the feed, without the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRow {
    pub path: String,
    pub key: String,
    pub updated_at: Timestamp,
    pub deleted: bool,
}

/// What happened to a path since the requested watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedAction {
    /// At least one contributing record is live.
    Update,
    /// Every contributing record is deleted.
    Delete,
}

/// One change notification for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub path: String,
    pub action: FeedAction,
    /// Highest `updated_at` among the contributing records.
    pub updated_at: Timestamp,
    /// Keys whose records changed.
    pub keys: BTreeSet<String>,
}
