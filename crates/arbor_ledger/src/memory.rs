//! In-process ledger backend.
//!
//! Shares the contract of the SQLite backend inside one process. Also carries
//! fault injection so callers can exercise ledger outages.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use arbor_protocol::{is_lock_path, NodeCounts, NodeRecord, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{LedgerError, Result};
use crate::query::{CreateOutcome, UnderfilledQuery};
use crate::store::LedgerStore;

#[derive(Debug)]
struct StoredNode {
    seq: u64,
    record: NodeRecord,
}

#[derive(Debug)]
struct StoredSession {
    context: String,
    payload: serde_json::Value,
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_seq: u64,
    nodes: HashMap<(String, String), StoredNode>,
    sessions: HashMap<SessionId, StoredSession>,
}

/// Ledger held in a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
    failing: Mutex<HashSet<&'static str>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`LedgerError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make one named operation (e.g. `"start_session"`) fail until cleared.
    pub fn fail_operation(&self, operation: &'static str, failing: bool) {
        if let Ok(mut set) = self.failing.lock() {
            if failing {
                set.insert(operation);
            } else {
                set.remove(operation);
            }
        }
    }

    /// Payload stored with a session, if the session exists.
    pub fn session_payload(&self, id: &SessionId) -> Option<serde_json::Value> {
        let state = self.state.lock().ok()?;
        state.sessions.get(id).map(|session| session.payload.clone())
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::unavailable(format!(
                "memory ledger offline during {operation}"
            )));
        }
        let failing = self
            .failing
            .lock()
            .map_err(|_| LedgerError::invalid_state("fault set lock poisoned"))?;
        if failing.contains(operation) {
            return Err(LedgerError::unavailable(format!(
                "injected failure in {operation}"
            )));
        }
        Ok(())
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| LedgerError::invalid_state("memory ledger lock poisoned"))
    }

    fn matching<'a>(state: &'a MemoryState, query: &UnderfilledQuery) -> Vec<&'a StoredNode> {
        let mut matched: Vec<&StoredNode> = state
            .nodes
            .values()
            .filter(|stored| query.matches(&stored.record))
            .collect();
        matched.sort_by_key(|stored| stored.seq);
        matched
    }
}

fn key(context: &str, path: &str) -> (String, String) {
    (context.to_string(), path.to_string())
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn init(&self) -> Result<()> {
        self.check("init")
    }

    async fn find_underfilled(&self, query: &UnderfilledQuery) -> Result<Vec<NodeRecord>> {
        self.check("find_underfilled")?;
        let state = self.state()?;
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        Ok(Self::matching(&state, query)
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn count_underfilled(&self, query: &UnderfilledQuery) -> Result<u64> {
        self.check("count_underfilled")?;
        let state = self.state()?;
        Ok(Self::matching(&state, query).len() as u64)
    }

    async fn get_node(&self, context: &str, path: &str) -> Result<Option<NodeRecord>> {
        self.check("get_node")?;
        let state = self.state()?;
        Ok(state
            .nodes
            .get(&key(context, path))
            .map(|stored| stored.record.clone()))
    }

    async fn create_if_absent(&self, record: &NodeRecord) -> Result<CreateOutcome> {
        self.check("create_if_absent")?;
        let mut state = self.state()?;
        let node_key = key(&record.context, &record.path);
        if state.nodes.contains_key(&node_key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.next_seq += 1;
        let seq = state.next_seq;
        state.nodes.insert(
            node_key,
            StoredNode {
                seq,
                record: record.clone(),
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn delete_node(&self, context: &str, path: &str) -> Result<bool> {
        self.check("delete_node")?;
        let mut state = self.state()?;
        Ok(state.nodes.remove(&key(context, path)).is_some())
    }

    async fn increment_counters(
        &self,
        context: &str,
        path: &str,
        folder_delta: u32,
        file_delta: u32,
    ) -> Result<NodeCounts> {
        self.check("increment_counters")?;
        if is_lock_path(path) {
            return Err(LedgerError::constraint(format!(
                "{path} is a lock marker, its counters are fixed"
            )));
        }
        let mut state = self.state()?;
        let stored = state
            .nodes
            .get_mut(&key(context, path))
            .ok_or_else(|| LedgerError::not_found(format!("node {path} in context '{context}'")))?;
        let record = &mut stored.record;
        record.folder_count = record.folder_count.saturating_add(u64::from(folder_delta));
        record.file_count = record.file_count.saturating_add(u64::from(file_delta));
        Ok(NodeCounts {
            folder_count: record.folder_count,
            file_count: record.file_count,
        })
    }

    async fn start_session(
        &self,
        context: &str,
        payload: &serde_json::Value,
    ) -> Result<SessionId> {
        self.check("start_session")?;
        let mut state = self.state()?;
        let id = SessionId::new();
        state.sessions.insert(
            id,
            StoredSession {
                context: context.to_string(),
                payload: payload.clone(),
                ended_at: None,
            },
        );
        Ok(id)
    }

    async fn end_session(&self, id: &SessionId) -> Result<bool> {
        self.check("end_session")?;
        let mut state = self.state()?;
        match state.sessions.get_mut(id) {
            Some(session) if session.ended_at.is_none() => {
                session.ended_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_active_sessions(&self, context: &str) -> Result<u64> {
        self.check("count_active_sessions")?;
        let state = self.state()?;
        Ok(state
            .sessions
            .values()
            .filter(|session| session.context == context && session.ended_at.is_none())
            .count() as u64)
    }

    async fn list_locks(&self, context: &str) -> Result<Vec<NodeRecord>> {
        self.check("list_locks")?;
        let state = self.state()?;
        let mut locks: Vec<&StoredNode> = state
            .nodes
            .values()
            .filter(|stored| stored.record.context == context && is_lock_path(&stored.record.path))
            .collect();
        locks.sort_by_key(|stored| stored.seq);
        Ok(locks.into_iter().map(|stored| stored.record.clone()).collect())
    }
}
