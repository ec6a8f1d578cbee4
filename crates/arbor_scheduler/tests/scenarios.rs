//! Tick-level behaviour against the in-memory ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arbor_ledger::{CreateOutcome, LedgerStore, MemoryLedger, Result, UnderfilledQuery};
use arbor_protocol::{lock_path, NodeCounts, NodeRecord, SessionId, TreeShape};
use async_trait::async_trait;
use arbor_scheduler::{
    ClaimLock, ClaimOutcome, LevelMatch, ScheduleConfig, ScheduleError, Scheduler,
    SchedulerState, TickNext,
};

fn doclib(i: usize) -> String {
    format!("/Sites/site.{i}/documentLibrary")
}

async fn seed_doclibs(ledger: &MemoryLedger, count: usize) {
    for i in 0..count {
        let record = NodeRecord::new("", doclib(i)).with_id(format!("doclib-{i}"));
        ledger.create_if_absent(&record).await.unwrap();
    }
}

fn shape(files_per_leaf: u32) -> TreeShape {
    TreeShape::new(5, 3, files_per_leaf).unwrap()
}

/// Folder at the deepest level of tree `i` under the default shape.
fn leaf(i: usize) -> String {
    format!("{}/a/b/leaf.{i}", doclib(0))
}

/// Five empty leaves under a full parent, plus a level-5 sibling with no children.
async fn seed_leaf_level(ledger: &MemoryLedger) {
    let parent = NodeRecord::new("", format!("{}/a/b", doclib(0)))
        .with_id("b")
        .with_counts(5, 0);
    ledger.create_if_absent(&parent).await.unwrap();
    for i in 0..5 {
        let record = NodeRecord::new("", leaf(i)).with_id(format!("leaf-{i}"));
        ledger.create_if_absent(&record).await.unwrap();
    }
    let sibling = NodeRecord::new("", format!("{}/a/c", doclib(0))).with_id("c");
    ledger.create_if_absent(&sibling).await.unwrap();
}

fn exact(max_active_loaders: u32) -> ScheduleConfig {
    ScheduleConfig::new(shape(100), max_active_loaders).with_level_match(LevelMatch::Exact)
}

fn scheduler(ledger: &Arc<MemoryLedger>, config: ScheduleConfig) -> Scheduler {
    let ledger: Arc<dyn LedgerStore> = ledger.clone();
    Scheduler::new(config, ledger).unwrap()
}

#[tokio::test]
async fn test_capacity_four_dispatches_four_file_loads_then_one_folder_load() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_doclibs(&ledger, 5).await;

    // First tick: four loaders, five empty folders
    let mut first = scheduler(&ledger, ScheduleConfig::new(shape(100), 4));
    let outcome = first.tick().await.unwrap();

    assert_eq!(outcome.work_items.len(), 4);
    for (i, item) in outcome.work_items.iter().enumerate() {
        assert_eq!(item.path, doclib(i));
        assert_eq!(item.files_to_create, 100);
        assert_eq!(item.folders_to_create, 0);
        assert!(item.session_id.is_some());
    }
    assert!(matches!(outcome.next, TickNext::Reschedule { .. }));
    assert_eq!(ledger.count_active_sessions("").await.unwrap(), 4);
    assert_eq!(ledger.list_locks("").await.unwrap().len(), 4);

    // Second tick: no file targets, five loaders, four sessions still open
    let mut second = scheduler(&ledger, ScheduleConfig::new(shape(0), 5));
    let outcome = second.tick().await.unwrap();

    assert_eq!(outcome.admission.capacity, 1);
    assert_eq!(outcome.work_items.len(), 1);
    assert_eq!(outcome.work_items[0].path, doclib(4));
    assert_eq!(outcome.work_items[0].folders_to_create, 5);
    assert_eq!(outcome.work_items[0].files_to_create, 0);
    assert_eq!(outcome.claims_lost, 4);
    assert!(matches!(outcome.next, TickNext::Reschedule { .. }));
}

#[tokio::test]
async fn test_empty_ledger_completes_without_work() {
    let ledger = Arc::new(MemoryLedger::new());
    let mut scheduler = scheduler(&ledger, ScheduleConfig::new(shape(100), 4));

    let outcome = scheduler.tick().await.unwrap();
    assert!(outcome.work_items.is_empty());
    assert_eq!(outcome.next, TickNext::Complete);
    assert_eq!(scheduler.state(), SchedulerState::Done);
    assert_eq!(ledger.count_active_sessions("").await.unwrap(), 0);
}

#[tokio::test]
async fn test_fully_populated_nodes_complete() {
    let ledger = Arc::new(MemoryLedger::new());
    let full = NodeRecord::new("", doclib(0)).with_id("a").with_counts(5, 100);
    ledger.create_if_absent(&full).await.unwrap();

    let outcome = scheduler(&ledger, ScheduleConfig::new(shape(100), 4))
        .tick()
        .await
        .unwrap();
    assert!(outcome.is_complete());
}

#[tokio::test]
async fn test_racing_schedulers_skip_lost_claims() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_doclibs(&ledger, 2).await;

    let mut left = scheduler(&ledger, ScheduleConfig::new(shape(100), 1));
    let mut right = scheduler(&ledger, ScheduleConfig::new(shape(100), 2));

    let won = left.tick().await.unwrap();
    assert_eq!(won.work_items.len(), 1);
    assert_eq!(won.work_items[0].path, doclib(0));

    let other = right.tick().await.unwrap();
    assert_eq!(other.claims_lost, 1);
    assert_eq!(other.work_items.len(), 1);
    assert_eq!(other.work_items[0].path, doclib(1));
}

#[tokio::test]
async fn test_concurrent_claims_on_one_node() {
    let ledger: Arc<dyn LedgerStore> = Arc::new(MemoryLedger::new());
    let a = ClaimLock::new(Arc::clone(&ledger));
    let b = ClaimLock::new(Arc::clone(&ledger));

    let path = doclib(0);
    let (left, right) = tokio::join!(a.try_claim("", &path), b.try_claim("", &path));
    let outcomes = [left.unwrap(), right.unwrap()];
    let claimed = outcomes.iter().filter(|o| o.is_claimed()).count();
    assert_eq!(claimed, 1);
    assert!(outcomes.contains(&ClaimOutcome::Lost));
}

#[tokio::test]
async fn test_dispatch_never_exceeds_capacity() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_doclibs(&ledger, 10).await;

    let outcome = scheduler(&ledger, ScheduleConfig::new(shape(100), 3))
        .tick()
        .await
        .unwrap();
    assert_eq!(outcome.admission.capacity, 3);
    assert_eq!(outcome.work_items.len(), 3);
}

#[tokio::test]
async fn test_no_capacity_only_reschedules() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_doclibs(&ledger, 2).await;
    for _ in 0..6 {
        ledger
            .start_session("", &serde_json::json!({}))
            .await
            .unwrap();
    }

    let outcome = scheduler(&ledger, ScheduleConfig::new(shape(100), 4))
        .tick()
        .await
        .unwrap();
    assert_eq!(outcome.admission.capacity, -2);
    assert!(outcome.work_items.is_empty());
    assert!(!outcome.is_complete());
    assert!(ledger.list_locks("").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_in_flight_work_defers_completion() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_doclibs(&ledger, 2).await;

    let mut first = scheduler(&ledger, ScheduleConfig::new(shape(100), 2));
    assert_eq!(first.tick().await.unwrap().work_items.len(), 2);

    // Every candidate is claimed and both sessions are still open
    let mut idle_required = scheduler(&ledger, ScheduleConfig::new(shape(100), 4));
    let outcome = idle_required.tick().await.unwrap();
    assert!(outcome.work_items.is_empty());
    assert_eq!(outcome.claims_lost, 4);
    assert!(!outcome.is_complete());

    let config = ScheduleConfig::new(shape(100), 4).with_completion_requires_idle(false);
    let outcome = scheduler(&ledger, config).tick().await.unwrap();
    assert!(outcome.work_items.is_empty());
    assert!(outcome.is_complete());
}

#[tokio::test]
async fn test_lost_claims_keep_paging() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_doclibs(&ledger, 3).await;
    let claims = ClaimLock::new(ledger.clone());
    claims.try_claim("", &doclib(0)).await.unwrap();
    claims.try_claim("", &doclib(1)).await.unwrap();

    let config = ScheduleConfig::new(shape(100), 1).with_page_size(1);
    let outcome = scheduler(&ledger, config).tick().await.unwrap();
    assert_eq!(outcome.claims_lost, 2);
    assert_eq!(outcome.work_items.len(), 1);
    assert_eq!(outcome.work_items[0].path, doclib(2));
}

#[tokio::test]
async fn test_populated_node_never_reappears() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_doclibs(&ledger, 2).await;
    ledger
        .increment_counters("", &doclib(0), 5, 100)
        .await
        .unwrap();

    let outcome = scheduler(&ledger, ScheduleConfig::new(shape(100), 4))
        .tick()
        .await
        .unwrap();
    let paths: Vec<&str> = outcome.work_items.iter().map(|i| i.path.as_str()).collect();
    // File-fill then folder-fill; the filled node shows up in neither
    assert_eq!(paths, vec![doclib(1).as_str()]);
}

#[tokio::test]
async fn test_exact_level_match_ignores_shallow_folders() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_doclibs(&ledger, 1).await;
    let leaf_parent = NodeRecord::new("", format!("{}/a/b", doclib(0))).with_id("p");
    ledger.create_if_absent(&leaf_parent).await.unwrap();

    let config = ScheduleConfig::new(shape(100), 4).with_level_match(LevelMatch::Exact);
    let outcome = scheduler(&ledger, config).tick().await.unwrap();

    assert_eq!(outcome.work_items.len(), 1);
    assert_eq!(outcome.work_items[0].path, leaf_parent.path);
    assert_eq!(outcome.work_items[0].folders_to_create, 5);
}

#[tokio::test]
async fn test_ledger_failure_returns_claims() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_doclibs(&ledger, 3).await;
    ledger.fail_operation("start_session", true);

    let mut scheduler = scheduler(&ledger, ScheduleConfig::new(shape(100), 4));
    let err = scheduler.tick().await.unwrap_err();
    assert!(matches!(
        err,
        ScheduleError::Ledger {
            operation: "start_session",
            ..
        }
    ));
    assert!(err.is_retryable());
    assert!(ledger.list_locks("").await.unwrap().is_empty());
    assert_eq!(scheduler.state(), SchedulerState::IdleReschedule);

    // The next tick picks the same nodes up again
    ledger.fail_operation("start_session", false);
    let outcome = scheduler.tick().await.unwrap();
    assert_eq!(outcome.work_items.len(), 3);
}

#[tokio::test]
async fn test_unavailable_ledger_aborts_tick() {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_unavailable(true);

    let result = scheduler(&ledger, ScheduleConfig::new(shape(100), 4))
        .tick()
        .await;
    assert!(matches!(
        result,
        Err(ScheduleError::Ledger {
            operation: "count_active_sessions",
            ..
        })
    ));
}

#[tokio::test]
async fn test_session_payload_carries_work_item() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_doclibs(&ledger, 1).await;

    let outcome = scheduler(&ledger, ScheduleConfig::new(shape(100), 1))
        .tick()
        .await
        .unwrap();
    let session_id = outcome.work_items[0].session_id.unwrap();
    let payload = ledger.session_payload(&session_id).unwrap();
    assert_eq!(payload["path"], doclib(0));
    assert_eq!(payload["files_to_create"], 100);
}

#[tokio::test]
async fn test_leaf_level_fill_then_folder_fill() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_leaf_level(&ledger).await;

    // Four loaders, five empty leaves at level 6: the fifth waits
    let outcome = scheduler(&ledger, exact(4)).tick().await.unwrap();
    let paths: Vec<&str> = outcome.work_items.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, vec![leaf(0), leaf(1), leaf(2), leaf(3)]);
    for item in &outcome.work_items {
        assert_eq!((item.folders_to_create, item.files_to_create), (0, 100));
    }
    assert!(matches!(outcome.next, TickNext::Reschedule { .. }));

    // The fifth leaf fills up while the four loads are still open
    ledger.increment_counters("", &leaf(4), 0, 100).await.unwrap();

    let outcome = scheduler(&ledger, exact(5)).tick().await.unwrap();
    assert_eq!(outcome.admission.capacity, 1);
    assert_eq!(outcome.claims_lost, 4);
    assert_eq!(outcome.work_items.len(), 1);
    assert_eq!(outcome.work_items[0].path, format!("{}/a/c", doclib(0)));
    assert_eq!(outcome.work_items[0].folders_to_create, 5);
    assert_eq!(outcome.work_items[0].files_to_create, 0);
    assert!(matches!(outcome.next, TickNext::Reschedule { .. }));
}

/// Memory ledger where a load on `path` finishes just before its next claim.
struct FillsBeforeClaim {
    inner: Arc<MemoryLedger>,
    path: String,
    fired: AtomicBool,
}

#[async_trait]
impl LedgerStore for FillsBeforeClaim {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn find_underfilled(&self, query: &UnderfilledQuery) -> Result<Vec<NodeRecord>> {
        self.inner.find_underfilled(query).await
    }

    async fn count_underfilled(&self, query: &UnderfilledQuery) -> Result<u64> {
        self.inner.count_underfilled(query).await
    }

    async fn get_node(&self, context: &str, path: &str) -> Result<Option<NodeRecord>> {
        self.inner.get_node(context, path).await
    }

    async fn create_if_absent(&self, record: &NodeRecord) -> Result<CreateOutcome> {
        if record.path == lock_path(&self.path) && !self.fired.swap(true, Ordering::SeqCst) {
            self.inner
                .increment_counters(&record.context, &self.path, 0, 100)
                .await?;
        }
        self.inner.create_if_absent(record).await
    }

    async fn delete_node(&self, context: &str, path: &str) -> Result<bool> {
        self.inner.delete_node(context, path).await
    }

    async fn increment_counters(
        &self,
        context: &str,
        path: &str,
        folder_delta: u32,
        file_delta: u32,
    ) -> Result<NodeCounts> {
        self.inner
            .increment_counters(context, path, folder_delta, file_delta)
            .await
    }

    async fn start_session(
        &self,
        context: &str,
        payload: &serde_json::Value,
    ) -> Result<SessionId> {
        self.inner.start_session(context, payload).await
    }

    async fn end_session(&self, id: &SessionId) -> Result<bool> {
        self.inner.end_session(id).await
    }

    async fn count_active_sessions(&self, context: &str) -> Result<u64> {
        self.inner.count_active_sessions(context).await
    }

    async fn list_locks(&self, context: &str) -> Result<Vec<NodeRecord>> {
        self.inner.list_locks(context).await
    }
}

#[tokio::test]
async fn test_node_filled_after_scan_is_not_dispatched() {
    let inner = Arc::new(MemoryLedger::new());
    seed_leaf_level(&inner).await;
    let ledger: Arc<dyn LedgerStore> = Arc::new(FillsBeforeClaim {
        inner: inner.clone(),
        path: leaf(0),
        fired: AtomicBool::new(false),
    });

    let mut scheduler = Scheduler::new(exact(2), ledger).unwrap();
    let outcome = scheduler.tick().await.unwrap();

    let paths: Vec<&str> = outcome.work_items.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, vec![leaf(1), leaf(2)]);

    let filled = inner.get_node("", &leaf(0)).await.unwrap().unwrap();
    assert_eq!(filled.file_count, 100);
    let locks: Vec<String> = inner
        .list_locks("")
        .await
        .unwrap()
        .into_iter()
        .map(|marker| marker.path)
        .collect();
    assert!(!locks.contains(&lock_path(&leaf(0))));
    assert_eq!(inner.count_active_sessions("").await.unwrap(), 2);
}
