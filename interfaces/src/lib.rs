//! Collaborator boundary for the digest engine.
//!
//! Shared data types plus the narrow traits the engine consumes: a content
//! feed, durable stores for tag weights, settings and articles, and a
//! delivery sink. `memory` holds process-local stores, `state` the SQLite
//! ones.

pub mod defs;
pub mod memory;
pub mod state;

pub use defs::*;
pub use memory::{MemoryArticleStore, MemorySettingsStore, MemoryTagWeightStore};
pub use state::SqliteState;
