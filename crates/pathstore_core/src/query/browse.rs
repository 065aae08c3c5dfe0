//! Child-segment listing derived from record paths.
//!
//! There is no directory index: children are whatever segments follow
//! `path + "/"` in live record paths.

use crate::repo::item_repo::{ItemRepository, SqliteItemRepository};
use crate::store::{AttributeStore, StoreResult};
use std::collections::{HashSet, VecDeque};

/// Lazy iterator over the distinct immediate children of one path.
///
/// Children come out in the order of the first path string that mentions
/// them, each exactly once. Pages are fetched on demand; iterate again by
/// calling [`AttributeStore::browse`] again.
pub struct Browse<'s> {
    store: &'s AttributeStore,
    prefix: String,
    upper: String,
    cursor: Option<String>,
    page_size: u32,
    seen: HashSet<String>,
    pending: VecDeque<String>,
    exhausted: bool,
}

impl<'s> Browse<'s> {
    pub(crate) fn new(store: &'s AttributeStore, path: &str, page_size: u32) -> Self {
        let base = path.trim_end_matches('/');
        Self {
            store,
            prefix: format!("{base}/"),
            // '0' is the byte right after '/', so [prefix, upper) is exactly
            // the set of strings starting with prefix.
            upper: format!("{base}0"),
            cursor: None,
            page_size,
            seen: HashSet::new(),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fetch_page(&mut self) -> StoreResult<()> {
        let paths = self.store.read(|conn| {
            Ok(SqliteItemRepository::new(conn).paths_in_range(
                &self.prefix,
                &self.upper,
                self.cursor.as_deref(),
                self.page_size,
            )?)
        })?;

        if paths.len() < self.page_size as usize {
            self.exhausted = true;
        }
        if let Some(last) = paths.last() {
            self.cursor = Some(last.clone());
        }

        for path in &paths {
            if let Some(child) = child_segment(&self.prefix, path) {
                if self.seen.insert(child.to_string()) {
                    self.pending.push_back(child.to_string());
                }
            }
        }
        Ok(())
    }
}

impl Iterator for Browse<'_> {
    type Item = StoreResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(child) = self.pending.pop_front() {
                return Some(Ok(child));
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

/// Returns the segment of `path` right after `prefix`, if non-empty.
pub fn child_segment<'p>(prefix: &str, path: &'p str) -> Option<&'p str> {
    let rest = path.strip_prefix(prefix)?;
    let segment = rest.split('/').next().unwrap_or(rest);
    if segment.is_empty() {
        None
    } else {
        Some(segment)
    }
}
