//! Per-path merge of change rows into feed events.

use crate::model::record::{ChangeRow, FeedAction, FeedEvent};
use std::collections::BTreeSet;

/// Merges path-sorted change rows into one event per path.
///
/// Rows for the same path must be adjacent. For each run:
/// - `action` is `Delete` only if every row is deleted.
/// - `updated_at` is the highest row stamp.
/// - `keys` is the set of row keys.
pub fn aggregate_changes(rows: impl IntoIterator<Item = ChangeRow>) -> Vec<FeedEvent> {
    let mut events = Vec::new();
    // Event under construction plus whether all of its rows are deleted.
    let mut current: Option<(FeedEvent, bool)> = None;

    for row in rows {
        if let Some((event, all_deleted)) = current
            .as_mut()
            .filter(|(event, _)| event.path == row.path)
        {
            event.updated_at = event.updated_at.max(row.updated_at);
            event.keys.insert(row.key);
            *all_deleted &= row.deleted;
            continue;
        }

        if let Some(done) = current.take() {
            events.push(seal(done));
        }
        current = Some((
            FeedEvent {
                path: row.path,
                action: FeedAction::Update,
                updated_at: row.updated_at,
                keys: BTreeSet::from([row.key]),
            },
            row.deleted,
        ));
    }

    if let Some(done) = current {
        events.push(seal(done));
    }
    events
}

fn seal((mut event, all_deleted): (FeedEvent, bool)) -> FeedEvent {
    if all_deleted {
        event.action = FeedAction::Delete;
    }
    event
}
