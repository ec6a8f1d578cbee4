//! Create-if-absent races between independent ledger handles.

use std::sync::Arc;

use arbor_ledger::{CreateOutcome, LedgerStore, SqliteLedger};
use arbor_protocol::NodeRecord;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_handle_creates_the_lock() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("ledger.sqlite");

    let setup = SqliteLedger::open(&db_path).await.unwrap();
    setup.init().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        // Separate pools stand in for separate scheduler processes
        let ledger = SqliteLedger::open(&db_path).await.unwrap();
        handles.push(tokio::spawn(async move {
            let marker = NodeRecord::lock_marker("", "/Sites/site.1/documentLibrary");
            ledger.create_if_absent(&marker).await.unwrap()
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() == CreateOutcome::Created {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(setup.list_locks("").await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_not_lost() {
    let tmp = TempDir::new().unwrap();
    let ledger = Arc::new(
        SqliteLedger::open(&tmp.path().join("ledger.sqlite"))
            .await
            .unwrap(),
    );
    ledger.init().await.unwrap();
    ledger
        .create_if_absent(&NodeRecord::new("", "/S/a/d"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            ledger.increment_counters("", "/S/a/d", 0, 1).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let node = ledger.get_node("", "/S/a/d").await.unwrap().unwrap();
    assert_eq!(node.file_count, 20);
}
