//! Mutation engine: conditional writes stamped by the logical clock.
//!
//! # Responsibility
//! - Apply `update` / `update_many` / `delete` against the open transaction.
//! - Decide per record whether anything actually changed.
//! - Stamp every effective change of one call with one clock value.
//!
//! # Invariants
//! - Re-asserting a live, byte-identical value touches neither the record
//!   nor the clock.
//! - A call ticks the clock at most once, and only if some record changes.
//! - Deleting a missing or already-deleted record is a no-op.

use crate::db::{drop_access_path_indexes, ensure_access_path_indexes};
use crate::model::record::Timestamp;
use crate::model::value::{encode, AttrMap, AttrValue};
use crate::repo::global_repo::{GlobalRepository, SqliteGlobalRepository, CLOCK_NAME};
use crate::repo::item_repo::{ItemRepository, SqliteItemRepository};
use crate::store::{StoreError, StoreResult};
use log::{debug, info};
use rusqlite::Connection;

/// Write-side view of the store inside one transaction.
///
/// Obtained from [`crate::AttributeStore::write`]; everything done through it
/// commits or rolls back together.
pub struct StoreWriter<'tx> {
    conn: &'tx Connection,
}

impl<'tx> StoreWriter<'tx> {
    pub(crate) fn new(conn: &'tx Connection) -> Self {
        Self { conn }
    }

    fn items(&self) -> SqliteItemRepository<'tx> {
        SqliteItemRepository::new(self.conn)
    }

    fn globals(&self) -> SqliteGlobalRepository<'tx> {
        SqliteGlobalRepository::new(self.conn)
    }

    /// Records every `key -> value` of `data` at `path`.
    ///
    /// New and changed records (including resurrected tombstones) get the
    /// call's stamp: `timestamp` when given, a fresh tick otherwise.
    ///
    /// Returns the stamp applied, or `None` when nothing changed.
    pub fn update(
        &self,
        path: &str,
        data: &AttrMap,
        timestamp: Option<Timestamp>,
    ) -> StoreResult<Option<Timestamp>> {
        let mut stamp = Stamp::new(timestamp);
        let changed = self.apply(path, data, &mut stamp)?;
        log_mutation("store_update", 1, data.len(), changed, stamp.assigned());
        Ok(stamp.assigned())
    }

    /// Applies [`Self::update`] to every `(path, data)` pair under one stamp,
    /// so one synchronization pass shows up as one wave in the feed.
    pub fn update_many(
        &self,
        pairs: &[(String, AttrMap)],
        timestamp: Option<Timestamp>,
    ) -> StoreResult<Option<Timestamp>> {
        let mut stamp = Stamp::new(timestamp);
        let mut changed = 0;
        let mut keys = 0;
        for (path, data) in pairs {
            changed += self.apply(path, data, &mut stamp)?;
            keys += data.len();
        }
        log_mutation("store_update_many", pairs.len(), keys, changed, stamp.assigned());
        Ok(stamp.assigned())
    }

    /// Tombstones `keys` at `path`, or every live key when `keys` is `None`.
    ///
    /// Returns the stamp applied, or `None` when no live record matched.
    pub fn delete(
        &self,
        path: &str,
        keys: Option<&[&str]>,
        timestamp: Option<Timestamp>,
    ) -> StoreResult<Option<Timestamp>> {
        let items = self.items();
        let live = items.live_keys(path, keys)?;
        if live.is_empty() {
            log_mutation("store_delete", 1, 0, 0, None);
            return Ok(None);
        }

        let mut stamp = Stamp::new(timestamp);
        let ts = stamp.resolve(&self.globals())?;
        let changed = items.mark_deleted(path, &live, ts)?;
        log_mutation("store_delete", 1, live.len(), changed, stamp.assigned());
        Ok(stamp.assigned())
    }

    /// Advances the logical clock inside this transaction.
    pub fn tick(&self) -> StoreResult<Timestamp> {
        Ok(self.globals().tick()?)
    }

    pub fn get_timestamp(&self) -> StoreResult<Timestamp> {
        Ok(self.globals().current_timestamp()?)
    }

    pub fn get_global(&self, name: &str) -> StoreResult<Option<i64>> {
        Ok(self.globals().get_global(name)?)
    }

    /// # Errors
    /// - [`StoreError::ReservedGlobal`] for the clock's own row.
    pub fn set_global(&self, name: &str, value: i64) -> StoreResult<()> {
        if name == CLOCK_NAME {
            return Err(StoreError::ReservedGlobal(name.to_string()));
        }
        Ok(self.globals().set_global(name, value)?)
    }

    /// Reads one live value as seen by this transaction.
    pub fn get(&self, path: &str, key: &str) -> StoreResult<Option<AttrValue>> {
        Ok(self.items().get_value(path, key)?)
    }

    /// Reads live values at `path` as seen by this transaction.
    pub fn get_many(&self, path: &str, keys: Option<&[&str]>) -> StoreResult<AttrMap> {
        Ok(self.items().get_values(path, keys)?)
    }

    /// Drops the feed and search indexes ahead of a bulk import.
    ///
    /// Queries stay correct without them, only slower. Returns how many
    /// indexes were dropped.
    pub fn drop_indexes(&self) -> StoreResult<usize> {
        let dropped = drop_access_path_indexes(self.conn)?;
        info!("event=store_indexes module=store status=ok action=drop changed={dropped}");
        Ok(dropped)
    }

    /// Rebuilds whichever feed and search indexes are missing.
    pub fn ensure_indexes(&self) -> StoreResult<usize> {
        let created = ensure_access_path_indexes(self.conn)?;
        info!("event=store_indexes module=store status=ok action=ensure changed={created}");
        Ok(created)
    }

    fn apply(&self, path: &str, data: &AttrMap, stamp: &mut Stamp) -> StoreResult<usize> {
        let items = self.items();
        let globals = self.globals();
        let mut changed = 0;

        for (key, value) in data {
            let encoded = encode(value);
            if let Some(state) = items.find_state(path, key)? {
                if !state.deleted && state.holds(&encoded) {
                    continue;
                }
            }

            let ts = stamp.resolve(&globals)?;
            items.upsert(path, key, &encoded, ts)?;
            changed += 1;
        }

        Ok(changed)
    }
}

/// Lazily resolved stamp shared by every record of one mutating call.
#[derive(Debug)]
struct Stamp {
    requested: Option<Timestamp>,
    assigned: Option<Timestamp>,
}

impl Stamp {
    fn new(requested: Option<Timestamp>) -> Self {
        Self {
            requested,
            assigned: None,
        }
    }

    /// Returns the call's stamp, ticking (or raising the clock to the
    /// requested stamp) on first use only.
    fn resolve(&mut self, clock: &impl GlobalRepository) -> StoreResult<Timestamp> {
        if let Some(ts) = self.assigned {
            return Ok(ts);
        }

        let ts = match self.requested {
            Some(ts) => {
                clock.advance_clock_to(ts)?;
                ts
            }
            None => clock.tick()?,
        };
        self.assigned = Some(ts);
        Ok(ts)
    }

    fn assigned(&self) -> Option<Timestamp> {
        self.assigned
    }
}

fn log_mutation(
    event: &str,
    paths: usize,
    keys: usize,
    changed: usize,
    stamp: Option<Timestamp>,
) {
    match stamp {
        Some(ts) => debug!(
            "event={event} module=store status=ok paths={paths} keys={keys} changed={changed} timestamp={ts}"
        ),
        None => debug!(
            "event={event} module=store status=ok paths={paths} keys={keys} changed={changed} timestamp=none"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::Stamp;
    use crate::db::open_db_in_memory;
    use crate::repo::global_repo::{GlobalRepository, SqliteGlobalRepository};

    #[test]
    fn stamp_ticks_once_across_many_resolutions() {
        let conn = open_db_in_memory().unwrap();
        let clock = SqliteGlobalRepository::new(&conn);
        let mut stamp = Stamp::new(None);

        assert_eq!(stamp.assigned(), None);
        assert_eq!(stamp.resolve(&clock).unwrap(), 1);
        assert_eq!(stamp.resolve(&clock).unwrap(), 1);
        assert_eq!(clock.current_timestamp().unwrap(), 1);
    }

    #[test]
    fn requested_stamp_raises_but_never_lowers_the_clock() {
        let conn = open_db_in_memory().unwrap();
        let clock = SqliteGlobalRepository::new(&conn);

        assert_eq!(Stamp::new(Some(10)).resolve(&clock).unwrap(), 10);
        assert_eq!(clock.current_timestamp().unwrap(), 10);

        assert_eq!(Stamp::new(Some(4)).resolve(&clock).unwrap(), 4);
        assert_eq!(clock.current_timestamp().unwrap(), 10);
        assert_eq!(clock.tick().unwrap(), 11);
    }
}
