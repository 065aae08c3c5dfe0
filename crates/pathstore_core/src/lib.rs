//! Versioned, path-keyed attribute store with an incremental change feed.
//!
//! Independent synchronizers record facts with [`AttributeStore::update`],
//! discover what changed since their last run with [`AttributeStore::feed`],
//! and read current state with [`AttributeStore::get`] and friends. The store
//! never interprets paths or keys.

pub mod db;
pub mod feed;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod store;

pub use feed::{
    aggregate_changes, consume_feed, set_watermark, watermark, watermark_name, ConsumeError,
    ConsumeSummary, Feed,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::record::{AttributeRecord, ChangeRow, FeedAction, FeedEvent, Timestamp};
pub use model::value::{decode, encode, AttrMap, AttrValue, EncodedValue, ValueKind};
pub use query::browse::Browse;
pub use query::search::{SearchQuery, SearchTerm, MAX_SEARCH_KEYS};
pub use store::{AttributeStore, StoreError, StoreOptions, StoreResult, StoreWriter};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
