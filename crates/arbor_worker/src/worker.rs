//! Worker run loop.
//!
//! Consumes dispatch events, runs each load on its own task with bounded
//! concurrency and collects the reports.
//!
//! - Loads tracked with JoinHandles for bounded concurrency
//! - Shutdown and results are polled before new events
//! - On shutdown or when the dispatch channel closes, in-flight loads are
//!   awaited so their claims are released before the loop exits

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arbor_protocol::{defaults, ConfigError, DispatchEvent, LoadReport, WorkItem};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::loader::TreeLoader;

/// How often a saturated worker checks for loads that ended without reporting.
const REAP_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub max_concurrent_loads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: defaults::DEFAULT_MAX_CONCURRENT_LOADS,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_loads == 0 {
            return Err(ConfigError::InvalidWorker(
                "max_concurrent_loads must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Totals over one worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub loads_started: u64,
    pub loads_succeeded: u64,
    pub loads_failed: u64,
    pub folders_created: u64,
    pub files_created: u64,
    pub conflicts: u64,
    /// Contexts the scheduler reported as fully populated.
    pub completed_contexts: Vec<String>,
}

impl WorkerSummary {
    fn record(&mut self, report: &LoadReport) {
        if report.is_success() {
            self.loads_succeeded += 1;
        } else {
            self.loads_failed += 1;
        }
        self.folders_created += u64::from(report.folders_created);
        self.files_created += u64::from(report.files_created);
        self.conflicts += u64::from(report.conflicts);
    }
}

/// Result sent from a load task back to the loop.
struct LoadResult {
    load_id: u64,
    report: LoadReport,
}

pub struct Worker {
    config: WorkerConfig,
    loader: Arc<TreeLoader>,
    result_tx: mpsc::Sender<LoadResult>,
    result_rx: mpsc::Receiver<LoadResult>,
    active_loads: HashMap<u64, JoinHandle<()>>,
    next_load_id: u64,
    summary: WorkerSummary,
}

impl Worker {
    pub fn new(config: WorkerConfig, loader: Arc<TreeLoader>) -> Result<Self, ConfigError> {
        config.validate()?;
        let (result_tx, result_rx) = mpsc::channel(config.max_concurrent_loads * 2);
        Ok(Self {
            config,
            loader,
            result_tx,
            result_rx,
            active_loads: HashMap::new(),
            next_load_id: 0,
            summary: WorkerSummary::default(),
        })
    }

    /// Run until the dispatch channel closes or shutdown is signalled.
    pub async fn run(
        mut self,
        mut events_rx: mpsc::Receiver<DispatchEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> WorkerSummary {
        info!(
            max_concurrent_loads = self.config.max_concurrent_loads,
            "Worker started"
        );

        loop {
            let has_room = self.active_loads.len() < self.config.max_concurrent_loads;

            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, waiting for {} active loads...", self.active_loads.len());
                    self.wait_for_all_loads().await;
                    break;
                }

                Some(result) = self.result_rx.recv() => {
                    self.finish_load(result);
                }

                event = events_rx.recv(), if has_room => {
                    match event {
                        Some(DispatchEvent::Load(item)) => self.start_load(item),
                        Some(DispatchEvent::Complete { context }) => {
                            info!(context = %context, "Scheduler reported context complete");
                            self.summary.completed_contexts.push(context);
                        }
                        None => {
                            debug!("Dispatch channel closed");
                            self.wait_for_all_loads().await;
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep(REAP_INTERVAL), if !has_room => {
                    self.reap_completed_loads();
                }
            }
        }

        info!(
            loads = self.summary.loads_started,
            failed = self.summary.loads_failed,
            folders = self.summary.folders_created,
            files = self.summary.files_created,
            "Worker stopped"
        );
        self.summary
    }

    fn start_load(&mut self, item: WorkItem) {
        let load_id = self.next_load_id;
        self.next_load_id += 1;
        self.summary.loads_started += 1;
        debug!(
            load_id,
            path = %item.path,
            active = self.active_loads.len() + 1,
            "Starting load"
        );

        let loader = Arc::clone(&self.loader);
        let result_tx = self.result_tx.clone();
        let handle = tokio::spawn(async move {
            let report = loader.execute(&item).await;
            if result_tx.send(LoadResult { load_id, report }).await.is_err() {
                warn!(load_id, "Worker loop gone, dropping load report");
            }
        });
        self.active_loads.insert(load_id, handle);
    }

    fn finish_load(&mut self, result: LoadResult) {
        self.active_loads.remove(&result.load_id);
        if let Some(failure) = &result.report.failure {
            warn!(load_id = result.load_id, %failure, "Load reported failure");
        }
        self.summary.record(&result.report);
    }

    /// Drop handles of loads that ended without reporting (panicked tasks).
    fn reap_completed_loads(&mut self) {
        // Reports are sent before a task finishes, so drain them first
        while let Ok(result) = self.result_rx.try_recv() {
            self.finish_load(result);
        }
        let mut reaped = 0u64;
        self.active_loads.retain(|load_id, handle| {
            if handle.is_finished() {
                debug!("Reaped finished load {}", load_id);
                reaped += 1;
                false
            } else {
                true
            }
        });
        if reaped > 0 {
            error!(count = reaped, "Loads ended without a report");
            self.summary.loads_failed += reaped;
        }
    }

    async fn wait_for_all_loads(&mut self) {
        let count = self.active_loads.len();
        if count > 0 {
            info!("Waiting for {} active loads to complete...", count);
        }

        for (load_id, handle) in self.active_loads.drain() {
            if let Err(e) = handle.await {
                warn!("Load {} task panicked: {:?}", load_id, e);
                self.summary.loads_failed += 1;
            }
        }

        while let Ok(result) = self.result_rx.try_recv() {
            self.summary.record(&result.report);
        }
    }
}
