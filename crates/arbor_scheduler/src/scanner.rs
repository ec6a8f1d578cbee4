//! Candidate scanner: paginated search for under-filled nodes.
//!
//! Two phases per tick. File-fill looks for folders that still need files,
//! folder-fill for folders one level above the leaves that still need
//! subfolders. A phase ends at the first empty page.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use arbor_ledger::{CountRange, LedgerStore, Result, UnderfilledQuery};
use arbor_protocol::{NodeRecord, WorkItem};

use crate::config::ScheduleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    FileFill,
    FolderFill,
}

impl ScanPhase {
    /// Order in which phases run within a tick.
    pub const ORDER: [ScanPhase; 2] = [ScanPhase::FileFill, ScanPhase::FolderFill];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::FileFill => "file_fill",
            ScanPhase::FolderFill => "folder_fill",
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger query for one phase, or `None` when the phase has no target.
pub fn phase_query(config: &ScheduleConfig, phase: ScanPhase) -> Option<UnderfilledQuery> {
    let shape = &config.shape;
    let max_level = shape.max_level();
    let query = match phase {
        ScanPhase::FileFill => {
            if shape.files_per_leaf == 0 {
                return None;
            }
            UnderfilledQuery::new(
                config.context.clone(),
                config.level_match.filter(max_level),
                config.page_size,
            )
            .file_count(CountRange::below(u64::from(shape.files_per_leaf)))
        }
        ScanPhase::FolderFill => {
            let parent_level = max_level.checked_sub(1)?;
            UnderfilledQuery::new(
                config.context.clone(),
                config.level_match.filter(parent_level),
                config.page_size,
            )
            .folder_count(CountRange::below(u64::from(shape.branching_factor)))
        }
    };
    Some(query)
}

/// A node that falls short of its target, with how much it is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub record: NodeRecord,
    pub phase: ScanPhase,
    pub deficit: u32,
}

impl Candidate {
    pub(crate) fn new(record: NodeRecord, phase: ScanPhase, config: &ScheduleConfig) -> Self {
        let (target, current) = match phase {
            ScanPhase::FileFill => (config.shape.files_per_leaf, record.file_count),
            ScanPhase::FolderFill => (config.shape.branching_factor, record.folder_count),
        };
        let deficit = u64::from(target).saturating_sub(current);
        Self {
            record,
            phase,
            deficit: u32::try_from(deficit).unwrap_or(target),
        }
    }

    /// Work item sized to close the deficit. Carries no session yet.
    pub fn work_item(&self) -> WorkItem {
        let context = self.record.context.clone();
        let path = self.record.path.clone();
        match self.phase {
            ScanPhase::FileFill => WorkItem::files(context, path, self.deficit),
            ScanPhase::FolderFill => WorkItem::folders(context, path, self.deficit),
        }
    }
}

/// Cursor over one phase's candidates.
///
/// The offset advances by the size of each page fetched, never restarts,
/// and is not rewound when a candidate's claim is lost.
pub struct CandidateScanner {
    ledger: Arc<dyn LedgerStore>,
    config: ScheduleConfig,
    phase: ScanPhase,
    query: Option<UnderfilledQuery>,
    page: VecDeque<NodeRecord>,
    exhausted: bool,
    pages_fetched: u32,
}

impl CandidateScanner {
    pub fn new(ledger: Arc<dyn LedgerStore>, config: &ScheduleConfig, phase: ScanPhase) -> Self {
        let query = phase_query(config, phase);
        Self {
            ledger,
            config: config.clone(),
            phase,
            exhausted: query.is_none(),
            query,
            page: VecDeque::new(),
            pages_fetched: 0,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Next candidate, fetching a new page when the current one is used up.
    pub async fn next(&mut self) -> Result<Option<Candidate>> {
        if self.page.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(self
            .page
            .pop_front()
            .map(|record| Candidate::new(record, self.phase, &self.config)))
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let Some(query) = self.query.as_mut() else {
            self.exhausted = true;
            return Ok(());
        };
        let records = self.ledger.find_underfilled(query).await?;
        self.pages_fetched += 1;
        if records.is_empty() {
            self.exhausted = true;
            return Ok(());
        }
        query.offset += records.len() as u64;
        self.page.extend(records);
        Ok(())
    }

    /// Number of candidates currently in the ledger for `phase`.
    pub async fn count(
        ledger: &dyn LedgerStore,
        config: &ScheduleConfig,
        phase: ScanPhase,
    ) -> Result<u64> {
        match phase_query(config, phase) {
            Some(query) => ledger.count_underfilled(&query).await,
            None => Ok(0),
        }
    }
}
