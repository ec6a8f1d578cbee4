//! Status command - what the scheduler would see on its next tick
//!
//! Read-only: counts candidates per phase, open sessions and lock markers
//! without claiming or dispatching anything.

use std::sync::Arc;

use anyhow::Context;
use arbor_ledger::LedgerStore;
use arbor_scheduler::{AdmissionController, CandidateScanner, ClaimLock, ScanPhase, ScheduleConfig};
use serde::Serialize;

use crate::cli::error::HelpfulError;
use crate::cli::open_ledger_store;
use crate::cli::output::{print_json, print_table};
use crate::config::ArborConfig;

#[derive(Debug)]
pub struct StatusArgs {
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub context: String,
    pub file_fill_candidates: u64,
    pub folder_fill_candidates: u64,
    pub active_sessions: u64,
    pub capacity: i64,
    pub locks: usize,
    pub complete: bool,
}

pub async fn collect(
    ledger: Arc<dyn LedgerStore>,
    config: &ScheduleConfig,
) -> anyhow::Result<StatusReport> {
    let context = config.context.as_str();
    let file_fill = CandidateScanner::count(ledger.as_ref(), config, ScanPhase::FileFill)
        .await
        .context("Failed to count file-fill candidates")?;
    let folder_fill = CandidateScanner::count(ledger.as_ref(), config, ScanPhase::FolderFill)
        .await
        .context("Failed to count folder-fill candidates")?;
    let admission = AdmissionController::new(Arc::clone(&ledger), config.max_active_loaders)
        .check(context)
        .await
        .context("Failed to count active sessions")?;
    let locks = ClaimLock::new(ledger)
        .held(context)
        .await
        .context("Failed to list locks")?
        .len();

    let idle = admission.active_sessions == 0 || !config.completion_requires_idle;
    Ok(StatusReport {
        context: context.to_string(),
        file_fill_candidates: file_fill,
        folder_fill_candidates: folder_fill,
        active_sessions: admission.active_sessions,
        capacity: admission.capacity,
        locks,
        complete: file_fill == 0 && folder_fill == 0 && idle,
    })
}

pub async fn run(config: &ArborConfig, args: StatusArgs) -> anyhow::Result<()> {
    let schedule = config
        .schedule_config()
        .map_err(HelpfulError::invalid_config)?;
    let ledger = open_ledger_store(&config.ledger.url).await?;
    let report = collect(ledger, &schedule).await?;

    if args.json {
        return print_json(&report);
    }
    print_table(
        &["CONTEXT", "FILE-FILL", "FOLDER-FILL", "SESSIONS", "CAPACITY", "LOCKS", "STATE"],
        vec![vec![
            if report.context.is_empty() {
                "(default)".to_string()
            } else {
                report.context.clone()
            },
            report.file_fill_candidates.to_string(),
            report.folder_fill_candidates.to_string(),
            report.active_sessions.to_string(),
            report.capacity.to_string(),
            report.locks.to_string(),
            if report.complete { "DONE" } else { "POPULATING" }.to_string(),
        ]],
    );
    Ok(())
}
