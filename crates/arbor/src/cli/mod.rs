//! CLI commands for the Arbor launcher

pub mod error;
pub mod locks;
pub mod output;
pub mod run;
pub mod seed;
pub mod status;

use std::sync::Arc;

use arbor_ledger::LedgerStore;
use arbor_worker::ContentService;

use crate::cli::error::HelpfulError;

pub async fn open_ledger_store(url: &str) -> anyhow::Result<Arc<dyn LedgerStore>> {
    arbor_ledger::open_ledger(url)
        .await
        .map_err(|e| anyhow::Error::from(HelpfulError::ledger_unavailable(url, e)))
}

pub async fn open_content(url: &str) -> anyhow::Result<Arc<dyn ContentService>> {
    arbor_worker::open_content_service(url)
        .await
        .map_err(|e| anyhow::Error::from(HelpfulError::content_unavailable(url, e)))
}
