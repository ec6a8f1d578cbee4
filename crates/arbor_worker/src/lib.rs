//! Arbor worker: executes scheduler work items.
//!
//! Creates folders and documents through a content service, records new
//! folders in the ledger and keeps node counters in step with every
//! confirmed creation.

pub mod content;
pub mod loader;
pub mod samples;
pub mod worker;

pub use content::{
    ensure_path, open_content_service, ContentError, ContentService, ContentUrl,
    FsContentService, MemoryContentService, ROOT_ID,
};
pub use loader::TreeLoader;
pub use samples::{Sample, SamplePool};
pub use worker::{Worker, WorkerConfig, WorkerSummary};
