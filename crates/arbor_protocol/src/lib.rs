//! Shared types for Arbor
//!
//! Plain data passed between the ledger store, the tree-population scheduler
//! and the workers that execute its work items.

pub mod config;
pub mod defaults;
pub mod ids;
pub mod types;

pub use config::{ConfigError, TreeShape};
pub use ids::SessionId;
pub use types::{
    child_path, claimed_path, is_lock_path, lock_path, path_level, DispatchEvent, LoadFailure,
    LoadOperation, LoadReport, NodeCounts, NodeRecord, WorkItem, LOCK_SEGMENT,
    LOCK_SENTINEL_COUNT,
};
