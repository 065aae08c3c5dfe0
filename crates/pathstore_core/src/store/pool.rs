//! Read-only connection pool for file-backed stores.
//!
//! # Invariants
//! - Every pooled connection is opened `SQLITE_OPEN_READ_ONLY` + `query_only`.
//! - Callers are spread round-robin; a busy slot is skipped before blocking.

use crate::db::{open_read_only, DbResult};
use log::warn;
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub(crate) struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    pub(crate) fn open(path: &Path, size: usize, busy_timeout: Duration) -> DbResult<Self> {
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            connections.push(Mutex::new(open_read_only(path, busy_timeout)?));
        }
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    pub(crate) fn size(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn acquire(&self) -> MutexGuard<'_, Connection> {
        let len = self.connections.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            if let Ok(guard) = self.connections[(start + offset) % len].try_lock() {
                return guard;
            }
        }
        lock_recovering(&self.connections[start], "reader")
    }
}

/// Locks a connection mutex, recovering it if a previous holder panicked.
///
/// A panicking holder drops its open `Transaction`, which rolls back, so the
/// connection itself is still usable.
pub(crate) fn lock_recovering<'a>(
    mutex: &'a Mutex<Connection>,
    role: &'static str,
) -> MutexGuard<'a, Connection> {
    mutex.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        warn!("event=connection_lock module=store status=recovered role={role}");
        poisoned.into_inner()
    })
}
