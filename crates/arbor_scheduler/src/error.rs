//! Scheduler errors.

use arbor_ledger::LedgerError;
use arbor_protocol::ConfigError;
use thiserror::Error;

/// Errors that abort a tick or stop the scheduler loop.
///
/// A lost claim is not an error; see [`crate::ClaimOutcome::Lost`].
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Ledger call failed; the tick is abandoned and retried later.
    #[error("Ledger failure during {operation}: {source}")]
    Ledger {
        operation: &'static str,
        #[source]
        source: LedgerError,
    },

    #[error("Failed to encode work item: {0}")]
    Encode(#[from] serde_json::Error),

    /// Downstream dispatcher went away.
    #[error("Dispatch channel closed")]
    DispatchClosed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ScheduleError {
    pub fn ledger(operation: &'static str, source: LedgerError) -> Self {
        Self::Ledger { operation, source }
    }

    /// Ledger failures are transient from the loop's point of view.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScheduleError::Ledger { .. } | ScheduleError::Encode(_))
    }
}
