//! Read-side query entry points: hierarchical browse and attribute search.
//!
//! # Invariants
//! - Only live (`deleted=0`) records are visible.
//! - Results are ordered by path string.

pub mod browse;
pub mod search;
