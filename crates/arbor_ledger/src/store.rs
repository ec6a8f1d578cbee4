//! Ledger store trait and URL handling.

use std::path::PathBuf;
use std::sync::Arc;

use arbor_protocol::{NodeCounts, NodeRecord, SessionId};
use async_trait::async_trait;

use crate::error::{LedgerError, Result};
use crate::memory::MemoryLedger;
use crate::query::{CreateOutcome, UnderfilledQuery};
use crate::sqlite::SqliteLedger;

/// Persistent node records, lock markers and work sessions.
///
/// Records are keyed by `(context, path)`. Every implementation must make
/// `create_if_absent` atomic across all processes sharing the store, since
/// the claim lock relies on it for mutual exclusion.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create tables or other backing structures. Idempotent.
    async fn init(&self) -> Result<()>;

    /// Matching records ordered by insertion sequence, then paginated.
    async fn find_underfilled(&self, query: &UnderfilledQuery) -> Result<Vec<NodeRecord>>;

    /// Number of matching records, ignoring offset and limit.
    async fn count_underfilled(&self, query: &UnderfilledQuery) -> Result<u64>;

    async fn get_node(&self, context: &str, path: &str) -> Result<Option<NodeRecord>>;

    /// Insert `record` unless `(context, path)` already exists. Never overwrites.
    async fn create_if_absent(&self, record: &NodeRecord) -> Result<CreateOutcome>;

    /// Delete one record. Returns false when nothing was deleted.
    async fn delete_node(&self, context: &str, path: &str) -> Result<bool>;

    /// Add the deltas to a record's counters and return the new values.
    ///
    /// Fails with [`LedgerError::NotFound`] when the record does not exist
    /// and [`LedgerError::Constraint`] for lock markers.
    async fn increment_counters(
        &self,
        context: &str,
        path: &str,
        folder_delta: u32,
        file_delta: u32,
    ) -> Result<NodeCounts>;

    /// Open a work session carrying `payload`.
    async fn start_session(&self, context: &str, payload: &serde_json::Value)
        -> Result<SessionId>;

    /// Stamp the session's end time. Returns false if it was unknown or already ended.
    async fn end_session(&self, id: &SessionId) -> Result<bool>;

    /// Sessions in `context` without an end time.
    async fn count_active_sessions(&self, context: &str) -> Result<u64>;

    /// Lock marker records in `context`, oldest first.
    async fn list_locks(&self, context: &str) -> Result<Vec<NodeRecord>>;
}

/// Parsed ledger URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerUrl {
    Sqlite(PathBuf),
    Memory,
}

impl LedgerUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("sqlite:") {
            let path = rest.trim_start_matches("//").trim();
            if path.is_empty() {
                return Err(LedgerError::UnsupportedUrl(format!(
                    "sqlite URL missing path: {raw}"
                )));
            }
            return Ok(Self::Sqlite(PathBuf::from(path)));
        }
        if raw == "memory:" || raw == "memory" {
            return Ok(Self::Memory);
        }
        Err(LedgerError::UnsupportedUrl(raw.to_string()))
    }
}

/// Open and initialise the ledger named by `raw`.
pub async fn open_ledger(raw: &str) -> Result<Arc<dyn LedgerStore>> {
    let store: Arc<dyn LedgerStore> = match LedgerUrl::parse(raw)? {
        LedgerUrl::Sqlite(path) => Arc::new(SqliteLedger::open(&path).await?),
        LedgerUrl::Memory => Arc::new(MemoryLedger::new()),
    };
    store.init().await?;
    Ok(store)
}
