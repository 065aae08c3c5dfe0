//! Multi-attribute exact-match search.
//!
//! # Invariants
//! - A path matches only if it satisfies every term.
//! - A `Null` term value means "the key is live at the path and holds null".
//! - An empty query returns no paths.
//! - Repeated identical terms count once; two different values for one key
//!   can never both hold, so such a query matches nothing.

use crate::model::value::{encode, AttrValue};
use crate::repo::item_repo::{EncodedTerm, ItemRepository, SqliteItemRepository};
use crate::store::{StoreError, StoreResult};
use log::debug;
use rusqlite::Connection;

/// One `key == value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTerm {
    pub key: String,
    pub value: AttrValue,
}

/// Most distinct keys one query may constrain: each key is one side of a
/// self-join, and SQLite joins at most 64 tables.
pub const MAX_SEARCH_KEYS: usize = 64;

/// Ordered conjunction of [`SearchTerm`]s.
///
/// At most [`MAX_SEARCH_KEYS`] distinct keys; larger queries fail with
/// [`StoreError::InvalidQuery`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    terms: Vec<SearchTerm>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `key == value` term.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.terms.push(SearchTerm {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Adds a "key present with a null value" term.
    pub fn with_null(self, key: impl Into<String>) -> Self {
        self.with(key, AttrValue::Null)
    }

    pub fn terms(&self) -> &[SearchTerm] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl<K: Into<String>, V: Into<AttrValue>> FromIterator<(K, V)> for SearchQuery {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |query, (key, value)| query.with(key, value))
    }
}

pub(crate) fn search_paths(conn: &Connection, query: &SearchQuery) -> StoreResult<Vec<String>> {
    if query.is_empty() {
        debug!("event=store_search module=query status=skipped reason=empty_query");
        return Ok(Vec::new());
    }

    let Some(terms) = distinct_terms(query) else {
        debug!("event=store_search module=query status=skipped reason=conflicting_terms");
        return Ok(Vec::new());
    };
    if terms.len() > MAX_SEARCH_KEYS {
        return Err(StoreError::InvalidQuery(format!(
            "search constrains {} keys, at most {MAX_SEARCH_KEYS} are supported",
            terms.len()
        )));
    }

    let paths = SqliteItemRepository::new(conn).search_paths(&terms)?;
    debug!(
        "event=store_search module=query status=ok terms={} matches={}",
        terms.len(),
        paths.len()
    );
    Ok(paths)
}

// `None` when two terms demand different values for the same key.
fn distinct_terms(query: &SearchQuery) -> Option<Vec<EncodedTerm>> {
    let mut terms: Vec<EncodedTerm> = Vec::with_capacity(query.terms().len());
    for term in query.terms() {
        let value = encode(&term.value);
        match terms.iter().find(|seen| seen.key == term.key) {
            Some(seen) if seen.value == value => {}
            Some(_) => return None,
            None => terms.push(EncodedTerm {
                key: term.key.clone(),
                value,
            }),
        }
    }
    Some(terms)
}

#[cfg(test)]
mod tests {
    use super::{distinct_terms, SearchQuery};

    #[test]
    fn repeated_terms_collapse_in_first_seen_order() {
        let query = SearchQuery::new()
            .with("b", 1)
            .with("a", "x")
            .with("b", 1);
        let keys = distinct_terms(&query)
            .unwrap()
            .into_iter()
            .map(|term| term.key)
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn conflicting_values_for_one_key_match_nothing() {
        let query = SearchQuery::new().with("n", 1).with("n", 1.0);
        assert!(distinct_terms(&query).is_none());
    }
}
