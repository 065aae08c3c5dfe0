//! Change-data-capture over the item relation, keyed by the logical clock.
//!
//! # Responsibility
//! - Surface every path with a record stamped above a watermark.
//! - Collapse each path's changed records into one [`FeedEvent`].
//! - Drive consumers that persist their own watermark ([`consume_feed`]).
//!
//! # Invariants
//! - No missed updates: every `(path, key)` with `updated_at > since` is
//!   reported under its path.
//! - Events carry key names only; consumers read current values themselves.
//! - Delivery is at-least-once; consumers must tolerate re-delivery.

mod aggregate;
mod consumer;

pub use aggregate::aggregate_changes;
pub use consumer::{
    consume_feed, set_watermark, watermark, watermark_name, ConsumeError, ConsumeSummary,
};

use crate::model::record::{FeedEvent, Timestamp};
use crate::repo::item_repo::{ItemRepository, SqliteItemRepository};
use crate::store::{AttributeStore, StoreResult};
use std::collections::{BTreeSet, VecDeque};

/// Lazy iterator over change events in path order.
///
/// Each page covers up to `page_size` paths and is read in one statement;
/// restart a scan by calling [`AttributeStore::feed`] again.
pub struct Feed<'s> {
    store: &'s AttributeStore,
    since: Timestamp,
    keys: Option<Vec<String>>,
    cursor: Option<String>,
    page_size: u32,
    pending: VecDeque<FeedEvent>,
    exhausted: bool,
}

impl<'s> Feed<'s> {
    pub(crate) fn new(
        store: &'s AttributeStore,
        since: Timestamp,
        keys: Option<&[&str]>,
        page_size: u32,
    ) -> Self {
        Self {
            store,
            since,
            keys: keys.map(|keys| {
                keys.iter()
                    .map(|key| (*key).to_string())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            }),
            cursor: None,
            page_size,
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn since(&self) -> Timestamp {
        self.since
    }

    fn fetch_page(&mut self) -> StoreResult<()> {
        let keys = self
            .keys
            .as_ref()
            .map(|keys| keys.iter().map(String::as_str).collect::<Vec<_>>());
        let rows = self.store.read(|conn| {
            Ok(SqliteItemRepository::new(conn).change_rows(
                self.since,
                keys.as_deref(),
                self.cursor.as_deref(),
                self.page_size,
            )?)
        })?;

        let events = aggregate_changes(rows);
        if events.len() < self.page_size as usize {
            self.exhausted = true;
        }
        if let Some(last) = events.last() {
            self.cursor = Some(last.path.clone());
        }
        self.pending.extend(events);
        Ok(())
    }
}

impl Iterator for Feed<'_> {
    type Item = StoreResult<FeedEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
    }
}
