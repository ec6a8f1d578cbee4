//! Tree-population scheduler.
//!
//! Scans the ledger for under-filled nodes, claims them with lock markers,
//! bounds in-flight work through open session counts and emits sized work
//! items until nothing is left to populate.

pub mod admission;
pub mod claim;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scanner;
pub mod scheduler;

pub use admission::{Admission, AdmissionController};
pub use claim::{ClaimLock, ClaimOutcome, HeldLock};
pub use config::{LevelMatch, ScheduleConfig};
pub use error::ScheduleError;
pub use metrics::{MetricsSnapshot, METRICS};
pub use scanner::{phase_query, Candidate, CandidateScanner, ScanPhase};
pub use scheduler::{Scheduler, SchedulerState, SchedulerSummary, TickNext, TickOutcome};
