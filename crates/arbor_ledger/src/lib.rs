//! Ledger store for Arbor
//!
//! Persisted node records with fill counters, lock markers and work
//! sessions, behind the [`LedgerStore`] trait. Two backends:
//!
//! - `sqlite:<path>`: shared across processes
//! - `memory:`: in-process, with fault injection for tests

mod error;
mod memory;
mod query;
mod sqlite;
mod store;

pub use error::{LedgerError, Result};
pub use memory::MemoryLedger;
pub use query::{CountRange, CreateOutcome, LevelFilter, UnderfilledQuery};
pub use sqlite::SqliteLedger;
pub use store::{open_ledger, LedgerStore, LedgerUrl};
