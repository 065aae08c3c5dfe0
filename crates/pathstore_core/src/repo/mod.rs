//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define record-level data access contracts for the store.
//! - Isolate SQLite query details from mutation/query orchestration.
//!
//! # Invariants
//! - Repositories never open or commit transactions; callers hand them a
//!   connection or an open transaction.
//! - Repository APIs return semantic errors (`InvalidData`) in addition to DB
//!   transport errors.

pub mod global_repo;
pub mod item_repo;
