//! Node records, work items and load reports.
//!
//! These are plain data types passed between the ledger, the scheduler and
//! the worker. None of them carry behaviour beyond small helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::SessionId;

// ============================================================================
// Paths
// ============================================================================

/// Name of the marker node that claims its parent path.
pub const LOCK_SEGMENT: &str = "locked";

/// Counter value written into lock markers.
///
/// Larger than any legal target, so a lock marker never matches an
/// underfilled range query. Fits in a signed 64-bit column.
pub const LOCK_SENTINEL_COUNT: u64 = i64::MAX as u64;

/// Depth of a slash-delimited path: the number of non-empty segments.
///
/// `/Sites/site.1/documentLibrary` is level 3.
pub fn path_level(path: &str) -> u32 {
    path.split('/').filter(|segment| !segment.is_empty()).count() as u32
}

/// Join a parent path and a child name.
pub fn child_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    format!("{parent}/{name}")
}

/// Path of the lock marker that claims `path`.
pub fn lock_path(path: &str) -> String {
    child_path(path, LOCK_SEGMENT)
}

/// True when `path` names a lock marker.
pub fn is_lock_path(path: &str) -> bool {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .is_some_and(|last| last == LOCK_SEGMENT)
}

/// Path the lock marker at `lock` claims.
pub fn claimed_path(lock: &str) -> Option<&str> {
    let trimmed = lock.trim_end_matches('/');
    trimmed
        .strip_suffix(LOCK_SEGMENT)
        .and_then(|rest| rest.strip_suffix('/'))
}

// ============================================================================
// Node Record
// ============================================================================

/// Persisted description of one tree node and its fill counters.
///
/// `folder_count` and `file_count` only grow. They are written by the worker
/// holding the claim on the node and read by the candidate scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub context: String,
    pub path: String,
    /// Remote identifier assigned by the content service.
    pub id: Option<String>,
    pub folder_count: u64,
    pub file_count: u64,
    pub created_at: DateTime<Utc>,
}

impl NodeRecord {
    pub fn new(context: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            path: path.into(),
            id: None,
            folder_count: 0,
            file_count: 0,
            created_at: Utc::now(),
        }
    }

    /// A lock marker claiming `path`.
    pub fn lock_marker(context: impl Into<String>, path: &str) -> Self {
        Self {
            context: context.into(),
            path: lock_path(path),
            id: Some(uuid::Uuid::new_v4().to_string()),
            folder_count: LOCK_SENTINEL_COUNT,
            file_count: LOCK_SENTINEL_COUNT,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_counts(mut self, folder_count: u64, file_count: u64) -> Self {
        self.folder_count = folder_count;
        self.file_count = file_count;
        self
    }

    pub fn level(&self) -> u32 {
        path_level(&self.path)
    }

    pub fn is_lock_marker(&self) -> bool {
        is_lock_path(&self.path)
    }
}

/// Counter pair returned after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub folder_count: u64,
    pub file_count: u64,
}

// ============================================================================
// Work items
// ============================================================================

/// A sized instruction to populate one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub context: String,
    pub path: String,
    pub folders_to_create: u32,
    pub files_to_create: u32,
    /// Session opened for this item at dispatch time.
    pub session_id: Option<SessionId>,
}

impl WorkItem {
    pub fn files(context: impl Into<String>, path: impl Into<String>, count: u32) -> Self {
        Self {
            context: context.into(),
            path: path.into(),
            folders_to_create: 0,
            files_to_create: count,
            session_id: None,
        }
    }

    pub fn folders(context: impl Into<String>, path: impl Into<String>, count: u32) -> Self {
        Self {
            context: context.into(),
            path: path.into(),
            folders_to_create: count,
            files_to_create: 0,
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Messages emitted by the scheduler to the downstream dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// Populate one node.
    Load(WorkItem),
    /// Nothing left to populate in the context.
    Complete { context: String },
}

// ============================================================================
// Load reports
// ============================================================================

/// Step of a work item that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOperation {
    ValidateItem,
    LookupNode,
    CreateFolder,
    CreateDocument,
    RecordFolder,
    IncrementCounters,
    SelectSample,
    ReleaseLock,
    EndSession,
}

impl LoadOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadOperation::ValidateItem => "validate_item",
            LoadOperation::LookupNode => "lookup_node",
            LoadOperation::CreateFolder => "create_folder",
            LoadOperation::CreateDocument => "create_document",
            LoadOperation::RecordFolder => "record_folder",
            LoadOperation::IncrementCounters => "increment_counters",
            LoadOperation::SelectSample => "select_sample",
            LoadOperation::ReleaseLock => "release_lock",
            LoadOperation::EndSession => "end_session",
        }
    }
}

impl fmt::Display for LoadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure of a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub path: String,
    pub operation: LoadOperation,
    pub error: String,
}

impl LoadFailure {
    pub fn new(path: impl Into<String>, operation: LoadOperation, error: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            operation,
            error: error.to_string(),
        }
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed for {}: {}", self.operation, self.path, self.error)
    }
}

impl std::error::Error for LoadFailure {}

/// Outcome of executing one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub context: String,
    pub path: String,
    pub folders_created: u32,
    pub files_created: u32,
    /// Creations answered with "already exists".
    pub conflicts: u32,
    pub failure: Option<LoadFailure>,
}

impl LoadReport {
    pub fn for_item(item: &WorkItem) -> Self {
        Self {
            context: item.context.clone(),
            path: item.path.clone(),
            folders_created: 0,
            files_created: 0,
            conflicts: 0,
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}
