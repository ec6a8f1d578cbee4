//! Canonical default values shared by the scheduler, worker and launcher.

pub const DEFAULT_LEDGER_URL: &str = "sqlite:arbor.sqlite";
pub const DEFAULT_CONTENT_URL: &str = "fs:./content";
pub const DEFAULT_CONTEXT: &str = "";

/// Trees are rooted at `/Sites/<site>/documentLibrary`.
pub const DEFAULT_ROOT_LEVEL: u32 = 3;
pub const DEFAULT_BRANCHING_FACTOR: u32 = 5;
pub const DEFAULT_MAX_DEPTH: u32 = 3;
pub const DEFAULT_FILES_PER_LEAF: u32 = 100;

pub const DEFAULT_MAX_ACTIVE_LOADERS: u32 = 8;
pub const DEFAULT_TICK_DELAY_MS: u64 = 1_000;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 8;
