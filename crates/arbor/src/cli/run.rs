//! Run command - scheduler loop plus an in-process worker
//!
//! Runs until the scheduler reports the context complete or Ctrl-C. On
//! Ctrl-C the scheduler stops first; the worker then finishes the items
//! already dispatched so their claims are released.

use std::sync::Arc;

use anyhow::Context;
use arbor_scheduler::{Scheduler, SchedulerSummary, METRICS};
use arbor_worker::{SamplePool, TreeLoader, Worker, WorkerSummary};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::error::HelpfulError;
use crate::cli::seed::seed_roots;
use crate::cli::{open_content, open_ledger_store};
use crate::config::{ArborConfig, WorkerSection};

#[derive(Debug, Default)]
pub struct RunArgs {
    /// Overrides `[scheduler] max_active_loaders`
    pub max_active_loaders: Option<u32>,
    /// Roots to seed before the first tick
    pub seed: Vec<String>,
    /// Print Prometheus metrics when done
    pub metrics: bool,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub scheduler: SchedulerSummary,
    pub worker: WorkerSummary,
}

fn sample_pool(worker: &WorkerSection) -> anyhow::Result<SamplePool> {
    match &worker.samples_dir {
        Some(dir) => {
            let pool = SamplePool::load(dir)
                .with_context(|| format!("Failed to load samples from {}", dir.display()))?;
            if pool.is_empty() {
                warn!(dir = %dir.display(), "Sample directory is empty, file loads will fail");
            }
            Ok(pool)
        }
        None => Ok(SamplePool::synthetic(worker.synthetic_samples)),
    }
}

/// Wire everything from `config` and run to completion or shutdown.
pub async fn execute(
    config: &ArborConfig,
    args: &RunArgs,
    mut shutdown: mpsc::Receiver<()>,
) -> anyhow::Result<RunOutcome> {
    let mut config = config.clone();
    if let Some(max) = args.max_active_loaders {
        config.scheduler.max_active_loaders = max;
    }
    let schedule = config
        .schedule_config()
        .map_err(HelpfulError::invalid_config)?;
    let worker_config = config.worker_config().map_err(HelpfulError::invalid_config)?;

    let ledger = open_ledger_store(&config.ledger.url).await?;
    let content = open_content(&config.worker.content_url).await?;
    if !args.seed.is_empty() {
        seed_roots(
            ledger.as_ref(),
            content.as_ref(),
            &schedule.context,
            schedule.shape.root_level,
            &args.seed,
        )
        .await?;
    }
    let samples = Arc::new(sample_pool(&config.worker)?);

    let loader = Arc::new(TreeLoader::new(Arc::clone(&ledger), content, samples));
    let channel_size = usize::try_from(schedule.max_active_loaders)
        .unwrap_or(usize::MAX)
        .saturating_mul(2)
        .max(1);
    let scheduler = Scheduler::new(schedule, ledger)?;
    let worker = Worker::new(worker_config, loader)?;

    let (dispatch_tx, dispatch_rx) = mpsc::channel(channel_size);
    let (scheduler_stop_tx, scheduler_stop_rx) = mpsc::channel(1);
    // The worker stops when the dispatch channel closes
    let (_worker_stop_tx, worker_stop_rx) = mpsc::channel(1);

    let mut scheduler_task = tokio::spawn(scheduler.run(dispatch_tx, scheduler_stop_rx));
    let worker_task = tokio::spawn(worker.run(dispatch_rx, worker_stop_rx));

    let scheduler_result = tokio::select! {
        result = &mut scheduler_task => result,
        Some(()) = shutdown.recv() => {
            info!("Shutdown requested, stopping scheduler...");
            // Already stopped if the send fails
            let _ = scheduler_stop_tx.send(()).await;
            scheduler_task.await
        }
    };

    let worker_summary = worker_task.await.context("Worker task panicked")?;
    let scheduler_summary = scheduler_result.context("Scheduler task panicked")??;
    Ok(RunOutcome {
        scheduler: scheduler_summary,
        worker: worker_summary,
    })
}

pub async fn run(config: &ArborConfig, args: RunArgs) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, initiating shutdown...");
            let _ = shutdown_tx.send(()).await;
        }
    });

    let outcome = execute(config, &args, shutdown_rx).await?;

    let state = if outcome.scheduler.completed {
        "DONE"
    } else {
        "STOPPED"
    };
    println!("{}: {}", state, METRICS.snapshot().summary());
    println!(
        "Loads: {} ({} failed) | Created: {} folders, {} files | Conflicts: {}",
        outcome.worker.loads_started,
        outcome.worker.loads_failed,
        outcome.worker.folders_created,
        outcome.worker.files_created,
        outcome.worker.conflicts,
    );
    if args.metrics {
        print!("{}", METRICS.prometheus_format());
    }
    Ok(())
}
