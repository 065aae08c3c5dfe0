//! Watermark-driven feed consumption for synchronizers.
//!
//! # Invariants
//! - The watermark only advances after every event of the scan was handled.
//! - The new watermark is the clock value read before the scan started, so a
//!   change committed during the scan is delivered again next run, never lost.

use crate::model::record::{FeedEvent, Timestamp};
use crate::store::{AttributeStore, StoreError, StoreResult};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

const WATERMARK_PREFIX: &str = "watermark.";

/// Name of the `global` row holding `consumer`'s watermark.
pub fn watermark_name(consumer: &str) -> String {
    format!("{WATERMARK_PREFIX}{consumer}")
}

/// Reads `consumer`'s watermark; `0` before its first completed run.
pub fn watermark(store: &AttributeStore, consumer: &str) -> StoreResult<Timestamp> {
    Ok(store.get_global(&watermark_name(consumer))?.unwrap_or(0))
}

/// Moves `consumer`'s watermark to `ts`, for example to replay from an
/// earlier point or to skip history on first run.
pub fn set_watermark(store: &AttributeStore, consumer: &str, ts: Timestamp) -> StoreResult<()> {
    store.set_global(&watermark_name(consumer), ts)
}

/// Outcome of one successful [`consume_feed`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeSummary {
    /// Watermark the scan started from.
    pub since: Timestamp,
    /// Watermark persisted at the end of the scan.
    pub until: Timestamp,
    /// Events handed to the handler.
    pub events: usize,
}

#[derive(Debug)]
pub enum ConsumeError<E> {
    Store(StoreError),
    /// The handler rejected the event for `path`; the watermark is unchanged.
    Handler { path: String, source: E },
}

impl<E: Display> Display for ConsumeError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Handler { path, source } => {
                write!(f, "feed handler failed for `{path}`: {source}")
            }
        }
    }
}

impl<E: Error + 'static> Error for ConsumeError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Handler { source, .. } => Some(source),
        }
    }
}

impl<E> From<StoreError> for ConsumeError<E> {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Hands every change since `consumer`'s watermark to `handler`, then
/// advances the watermark.
///
/// # Errors
/// - [`ConsumeError::Handler`] on the first rejected event; later events are
///   not visited and the watermark stays where it was.
/// - [`ConsumeError::Store`] when reading the feed or saving the watermark
///   fails.
pub fn consume_feed<E, F>(
    store: &AttributeStore,
    consumer: &str,
    keys: Option<&[&str]>,
    mut handler: F,
) -> Result<ConsumeSummary, ConsumeError<E>>
where
    F: FnMut(&FeedEvent) -> Result<(), E>,
{
    let since = watermark(store, consumer)?;
    let until = store.get_timestamp()?.max(since);

    let mut events = 0;
    for event in store.feed(since, keys) {
        let event = event?;
        if let Err(source) = handler(&event) {
            warn!(
                "event=feed_consume module=feed status=error consumer={consumer} since={since} handled={events}"
            );
            return Err(ConsumeError::Handler {
                path: event.path,
                source,
            });
        }
        events += 1;
    }

    if until > since {
        set_watermark(store, consumer, until)?;
    }
    info!(
        "event=feed_consume module=feed status=ok consumer={consumer} since={since} until={until} events={events}"
    );

    Ok(ConsumeSummary {
        since,
        until,
        events,
    })
}
