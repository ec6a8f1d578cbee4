//! Executes a single work item.
//!
//! Counters are incremented after every confirmed creation, never batched,
//! so a failure part way through leaves the node record accurate. Whatever
//! happens while populating, the claim is released and the session ended
//! afterwards.

use std::sync::Arc;

use arbor_ledger::LedgerStore;
use arbor_protocol::{
    child_path, LoadFailure, LoadOperation, LoadReport, NodeRecord, SessionId, WorkItem,
};
use arbor_scheduler::ClaimLock;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::content::ContentService;
use crate::samples::SamplePool;

pub struct TreeLoader {
    ledger: Arc<dyn LedgerStore>,
    content: Arc<dyn ContentService>,
    claims: ClaimLock,
    samples: Arc<SamplePool>,
}

impl TreeLoader {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        content: Arc<dyn ContentService>,
        samples: Arc<SamplePool>,
    ) -> Self {
        Self {
            claims: ClaimLock::new(Arc::clone(&ledger)),
            ledger,
            content,
            samples,
        }
    }

    /// Populate the node named by `item` and report what happened.
    ///
    /// Items without a session did not come from a scheduler claim and are
    /// rejected before touching the content service or the ledger.
    pub async fn execute(&self, item: &WorkItem) -> LoadReport {
        let span = tracing::info_span!(
            "worker.load",
            path = %item.path,
            folders = item.folders_to_create,
            files = item.files_to_create,
        );
        self.execute_inner(item).instrument(span).await
    }

    async fn execute_inner(&self, item: &WorkItem) -> LoadReport {
        let mut report = LoadReport::for_item(item);

        let Some(session_id) = item.session_id else {
            let failure = LoadFailure::new(
                &item.path,
                LoadOperation::ValidateItem,
                "work item carries no session",
            );
            error!(%failure, "Rejected work item");
            report.failure = Some(failure);
            return report;
        };

        if let Err(failure) = self.populate(item, &mut report).await {
            error!(%failure, "Load failed");
            report.failure = Some(failure);
        }

        self.finalize(item, session_id, &mut report).await;

        info!(
            folders_created = report.folders_created,
            files_created = report.files_created,
            conflicts = report.conflicts,
            success = report.is_success(),
            "Load finished"
        );
        report
    }

    async fn populate(&self, item: &WorkItem, report: &mut LoadReport) -> Result<(), LoadFailure> {
        let fail = |operation: LoadOperation, err: &dyn std::fmt::Display| {
            LoadFailure::new(&item.path, operation, err)
        };

        let node = self
            .ledger
            .get_node(&item.context, &item.path)
            .await
            .map_err(|e| fail(LoadOperation::LookupNode, &e))?
            .ok_or_else(|| fail(LoadOperation::LookupNode, &"no node record for path"))?;
        let Some(node_id) = node.id.as_deref() else {
            return Err(fail(LoadOperation::LookupNode, &"node record has no remote id"));
        };

        for _ in 0..item.folders_to_create {
            let name = Uuid::new_v4().to_string();
            let child_id = match self.content.create_folder(node_id, &name).await {
                Ok(id) => id,
                Err(e) if e.is_already_exists() => {
                    warn!(name = %name, "Folder already exists, skipping");
                    report.conflicts += 1;
                    continue;
                }
                Err(e) => return Err(fail(LoadOperation::CreateFolder, &e)),
            };

            let child = NodeRecord::new(&item.context, child_path(&item.path, &name))
                .with_id(child_id);
            let outcome = self
                .ledger
                .create_if_absent(&child)
                .await
                .map_err(|e| fail(LoadOperation::RecordFolder, &e))?;
            if !outcome.is_created() {
                warn!(child = %child.path, "Folder record already present");
            }

            self.ledger
                .increment_counters(&item.context, &item.path, 1, 0)
                .await
                .map_err(|e| fail(LoadOperation::IncrementCounters, &e))?;
            report.folders_created += 1;
            debug!(child = %child.path, "Created folder");
        }

        for _ in 0..item.files_to_create {
            let sample = self
                .samples
                .pick()
                .ok_or_else(|| fail(LoadOperation::SelectSample, &"sample pool is empty"))?;
            let name = format!("{}-{}", Uuid::new_v4(), sample.name);

            match self
                .content
                .create_document(node_id, &name, &sample.bytes)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_already_exists() => {
                    warn!(name = %name, "Document already exists, skipping");
                    report.conflicts += 1;
                    continue;
                }
                Err(e) => return Err(fail(LoadOperation::CreateDocument, &e)),
            }

            self.ledger
                .increment_counters(&item.context, &item.path, 0, 1)
                .await
                .map_err(|e| fail(LoadOperation::IncrementCounters, &e))?;
            report.files_created += 1;
        }

        Ok(())
    }

    /// Release the claim and end the session. Both are attempted regardless of
    /// each other; the first problem is kept if nothing failed earlier.
    async fn finalize(&self, item: &WorkItem, session_id: SessionId, report: &mut LoadReport) {
        match self.claims.release(&item.context, &item.path).await {
            Ok(true) => {}
            Ok(false) => warn!("Claim was already gone"),
            Err(e) => {
                error!(error = %e, "Failed to release claim");
                report
                    .failure
                    .get_or_insert_with(|| LoadFailure::new(&item.path, LoadOperation::ReleaseLock, &e));
            }
        }

        match self.ledger.end_session(&session_id).await {
            Ok(true) => {}
            Ok(false) => warn!(session_id = %session_id, "Session was already ended"),
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to end session");
                report
                    .failure
                    .get_or_insert_with(|| LoadFailure::new(&item.path, LoadOperation::EndSession, &e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryContentService;
    use arbor_ledger::MemoryLedger;

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        content: Arc<MemoryContentService>,
        loader: TreeLoader,
    }

    async fn fixture(samples: SamplePool) -> Fixture {
        let ledger = Arc::new(MemoryLedger::new());
        let content = Arc::new(MemoryContentService::new());
        let root = content.create_folder("", "doclib").await.unwrap();
        ledger
            .create_if_absent(&NodeRecord::new("", "/S/a/doclib").with_id(root))
            .await
            .unwrap();
        let loader = TreeLoader::new(ledger.clone(), content.clone(), Arc::new(samples));
        Fixture {
            ledger,
            content,
            loader,
        }
    }

    async fn claimed(fixture: &Fixture, item: WorkItem) -> WorkItem {
        ClaimLock::new(fixture.ledger.clone())
            .try_claim(&item.context, &item.path)
            .await
            .unwrap();
        let session = fixture
            .ledger
            .start_session("", &serde_json::json!({}))
            .await
            .unwrap();
        item.with_session(session)
    }

    #[tokio::test]
    async fn test_folder_load_records_children() {
        let f = fixture(SamplePool::synthetic(1)).await;
        let item = claimed(&f, WorkItem::folders("", "/S/a/doclib", 3)).await;

        let report = f.loader.execute(&item).await;
        assert!(report.is_success());
        assert_eq!(report.folders_created, 3);

        let node = f.ledger.get_node("", "/S/a/doclib").await.unwrap().unwrap();
        assert_eq!(node.folder_count, 3);
        assert_eq!(node.file_count, 0);

        let children = f.content.children("doclib");
        assert_eq!(children.len(), 3);
        for child in children {
            let name = child.trim_start_matches("doclib/");
            let record = f
                .ledger
                .get_node("", &format!("/S/a/doclib/{name}"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.id.as_deref(), Some(child.as_str()));
            assert_eq!(record.folder_count, 0);
        }
        assert!(f.ledger.list_locks("").await.unwrap().is_empty());
        assert_eq!(f.ledger.count_active_sessions("").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_load_names_documents_after_samples() {
        let f = fixture(SamplePool::synthetic(1)).await;
        let item = claimed(&f, WorkItem::files("", "/S/a/doclib", 4)).await;

        let report = f.loader.execute(&item).await;
        assert!(report.is_success());
        assert_eq!(report.files_created, 4);
        for id in f.content.children("doclib") {
            assert!(id.ends_with("-sample-0.txt"));
        }
        let node = f.ledger.get_node("", "/S/a/doclib").await.unwrap().unwrap();
        assert_eq!(node.file_count, 4);
    }

    #[tokio::test]
    async fn test_missing_session_is_rejected_untouched() {
        let f = fixture(SamplePool::synthetic(1)).await;
        ClaimLock::new(f.ledger.clone())
            .try_claim("", "/S/a/doclib")
            .await
            .unwrap();

        let report = f
            .loader
            .execute(&WorkItem::files("", "/S/a/doclib", 2))
            .await;
        let failure = report.failure.unwrap();
        assert_eq!(failure.operation, LoadOperation::ValidateItem);
        assert_eq!(f.content.document_count(), 0);
        // Not our claim to give back
        assert_eq!(f.ledger.list_locks("").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_sample_pool_fails_but_releases() {
        let f = fixture(SamplePool::default()).await;
        let item = claimed(&f, WorkItem::files("", "/S/a/doclib", 2)).await;

        let report = f.loader.execute(&item).await;
        assert_eq!(report.failure.unwrap().operation, LoadOperation::SelectSample);
        assert!(f.ledger.list_locks("").await.unwrap().is_empty());
        assert_eq!(f.ledger.count_active_sessions("").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_node_fails_lookup() {
        let f = fixture(SamplePool::synthetic(1)).await;
        let item = claimed(&f, WorkItem::folders("", "/S/missing/doclib", 2)).await;

        let report = f.loader.execute(&item).await;
        assert_eq!(report.failure.unwrap().operation, LoadOperation::LookupNode);
        assert!(f.ledger.list_locks("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflicts_are_skipped() {
        let f = fixture(SamplePool::synthetic(1)).await;
        let item = claimed(&f, WorkItem::files("", "/S/a/doclib", 3)).await;
        f.content.conflict_next(1);

        let report = f.loader.execute(&item).await;
        assert!(report.is_success());
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.files_created, 2);
        let node = f.ledger.get_node("", "/S/a/doclib").await.unwrap().unwrap();
        assert_eq!(node.file_count, 2);
    }
}
