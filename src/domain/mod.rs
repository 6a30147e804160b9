//! Domain layer: pure types and algorithms with no I/O.

pub mod conditionals;
pub mod context;
pub mod error;
pub mod list;
pub mod pattern;
pub mod query;
pub mod slug;
pub mod types;
