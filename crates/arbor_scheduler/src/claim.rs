//! Claim lock: exclusive right to populate a node.
//!
//! A claim is a marker record at `<path>/locked` created with
//! create-if-absent. Its counters sit above any legal target, so the marker
//! itself never turns up as a candidate. The claimed node still does; later
//! scans skip it because their claim attempt loses.

use std::sync::Arc;

use arbor_ledger::{LedgerStore, Result};
use arbor_protocol::{claimed_path, lock_path, NodeRecord};
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// Another scheduler holds the node. Not an error.
    Lost,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

/// A lock marker currently present in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLock {
    /// Node the marker claims.
    pub path: String,
    pub marker_path: String,
    pub created_at: DateTime<Utc>,
}

impl HeldLock {
    fn from_marker(marker: NodeRecord) -> Self {
        let path = claimed_path(&marker.path)
            .unwrap_or(marker.path.as_str())
            .to_string();
        Self {
            path,
            marker_path: marker.path,
            created_at: marker.created_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }
}

#[derive(Clone)]
pub struct ClaimLock {
    ledger: Arc<dyn LedgerStore>,
}

impl ClaimLock {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    pub async fn try_claim(&self, context: &str, path: &str) -> Result<ClaimOutcome> {
        let marker = NodeRecord::lock_marker(context, path);
        let outcome = self.ledger.create_if_absent(&marker).await?;
        if outcome.is_created() {
            debug!(path = %path, "Claimed node");
            Ok(ClaimOutcome::Claimed)
        } else {
            debug!(path = %path, "Claim lost");
            Ok(ClaimOutcome::Lost)
        }
    }

    /// Delete the marker. Returns false when no marker was held.
    pub async fn release(&self, context: &str, path: &str) -> Result<bool> {
        let released = self.ledger.delete_node(context, &lock_path(path)).await?;
        debug!(path = %path, released, "Released claim");
        Ok(released)
    }

    /// Markers present in `context`, oldest first.
    pub async fn held(&self, context: &str) -> Result<Vec<HeldLock>> {
        let markers = self.ledger.list_locks(context).await?;
        Ok(markers.into_iter().map(HeldLock::from_marker).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_ledger::MemoryLedger;

    fn lock() -> ClaimLock {
        ClaimLock::new(Arc::new(MemoryLedger::new()))
    }

    #[tokio::test]
    async fn test_second_claim_is_lost() {
        let claims = lock();
        let path = "/Sites/site.1/documentLibrary";
        assert_eq!(claims.try_claim("", path).await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(claims.try_claim("", path).await.unwrap(), ClaimOutcome::Lost);
    }

    #[tokio::test]
    async fn test_release_frees_the_node() {
        let claims = lock();
        let path = "/Sites/site.1/documentLibrary";
        claims.try_claim("", path).await.unwrap();
        assert!(claims.release("", path).await.unwrap());
        assert!(!claims.release("", path).await.unwrap());
        assert!(claims.try_claim("", path).await.unwrap().is_claimed());
    }

    #[tokio::test]
    async fn test_claims_are_per_context() {
        let claims = lock();
        let path = "/Sites/site.1/documentLibrary";
        assert!(claims.try_claim("a", path).await.unwrap().is_claimed());
        assert!(claims.try_claim("b", path).await.unwrap().is_claimed());
    }

    #[tokio::test]
    async fn test_held_reports_claimed_paths() {
        let claims = lock();
        claims.try_claim("", "/S/a/d").await.unwrap();
        claims.try_claim("", "/S/b/d").await.unwrap();

        let held = claims.held("").await.unwrap();
        let paths: Vec<&str> = held.iter().map(|lock| lock.path.as_str()).collect();
        assert_eq!(paths, vec!["/S/a/d", "/S/b/d"]);
        assert_eq!(held[0].marker_path, "/S/a/d/locked");
        assert!(held[0].age(Utc::now()) >= chrono::Duration::zero());
    }
}
