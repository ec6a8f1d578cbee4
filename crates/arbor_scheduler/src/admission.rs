//! Admission control: bounds in-flight work items per context.
//!
//! Capacity is read once per tick and is advisory. Sessions opened or
//! closed between the read and the dispatch are not accounted for.

use std::sync::Arc;

use arbor_ledger::{LedgerStore, Result};

/// Capacity computed at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub active_sessions: u64,
    /// `max_active_loaders - active_sessions`; negative when over-subscribed.
    pub capacity: i64,
}

impl Admission {
    pub fn has_room(&self) -> bool {
        self.capacity > 0
    }

    /// Number of work items this tick may dispatch.
    pub fn budget(&self) -> usize {
        usize::try_from(self.capacity.max(0)).unwrap_or(usize::MAX)
    }
}

#[derive(Clone)]
pub struct AdmissionController {
    ledger: Arc<dyn LedgerStore>,
    max_active_loaders: u32,
}

impl AdmissionController {
    pub fn new(ledger: Arc<dyn LedgerStore>, max_active_loaders: u32) -> Self {
        Self {
            ledger,
            max_active_loaders,
        }
    }

    pub async fn check(&self, context: &str) -> Result<Admission> {
        let active_sessions = self.ledger.count_active_sessions(context).await?;
        let active = i64::try_from(active_sessions).unwrap_or(i64::MAX);
        Ok(Admission {
            active_sessions,
            capacity: i64::from(self.max_active_loaders).saturating_sub(active),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_ledger::MemoryLedger;

    #[tokio::test]
    async fn test_capacity_subtracts_active_sessions() {
        let ledger = Arc::new(MemoryLedger::new());
        let controller = AdmissionController::new(ledger.clone(), 5);

        let admission = controller.check("").await.unwrap();
        assert_eq!(admission.capacity, 5);
        assert_eq!(admission.budget(), 5);

        for _ in 0..4 {
            ledger.start_session("", &serde_json::json!({})).await.unwrap();
        }
        let admission = controller.check("").await.unwrap();
        assert_eq!(admission.active_sessions, 4);
        assert_eq!(admission.capacity, 1);
    }

    #[tokio::test]
    async fn test_over_subscribed_capacity_is_negative() {
        let ledger = Arc::new(MemoryLedger::new());
        for _ in 0..6 {
            ledger.start_session("", &serde_json::json!({})).await.unwrap();
        }
        let admission = AdmissionController::new(ledger, 4).check("").await.unwrap();
        assert_eq!(admission.capacity, -2);
        assert!(!admission.has_room());
        assert_eq!(admission.budget(), 0);
    }

    #[tokio::test]
    async fn test_sessions_in_other_contexts_do_not_count() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .start_session("other", &serde_json::json!({}))
            .await
            .unwrap();
        let admission = AdmissionController::new(ledger, 2).check("").await.unwrap();
        assert_eq!(admission.capacity, 2);
    }
}
