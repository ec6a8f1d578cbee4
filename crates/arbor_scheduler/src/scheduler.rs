//! Scheduler loop.
//!
//! Each tick reads capacity, walks the file-fill then folder-fill candidates,
//! claims what it can within that capacity and opens a work session per
//! claim. A tick either yields work items plus a reschedule, or the
//! completion signal. The loop never waits for workers.

use std::sync::Arc;
use std::time::Instant;

use arbor_ledger::LedgerStore;
use arbor_protocol::{ConfigError, DispatchEvent, WorkItem};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

use crate::admission::{Admission, AdmissionController};
use crate::claim::{ClaimLock, ClaimOutcome};
use crate::config::ScheduleConfig;
use crate::error::ScheduleError;
use crate::metrics::METRICS;
use crate::scanner::{Candidate, CandidateScanner, ScanPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Scanning,
    Dispatching,
    IdleReschedule,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickNext {
    Reschedule { at: DateTime<Utc> },
    Complete,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub admission: Admission,
    /// Claimed items, each with an open session.
    pub work_items: Vec<WorkItem>,
    pub claims_lost: u32,
    pub next: TickNext,
}

impl TickOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self.next, TickNext::Complete)
    }
}

/// Totals reported when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub ticks: u64,
    pub aborted_ticks: u64,
    pub items_dispatched: u64,
    pub completed: bool,
}

pub struct Scheduler {
    config: ScheduleConfig,
    ledger: Arc<dyn LedgerStore>,
    claims: ClaimLock,
    admission: AdmissionController,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig, ledger: Arc<dyn LedgerStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            claims: ClaimLock::new(Arc::clone(&ledger)),
            admission: AdmissionController::new(Arc::clone(&ledger), config.max_active_loaders),
            config,
            ledger,
            state: SchedulerState::Scanning,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Run one scan-claim-dispatch cycle.
    ///
    /// A ledger failure aborts the tick: claims and sessions taken so far are
    /// given back on a best-effort basis and nothing is returned for dispatch.
    pub async fn tick(&mut self) -> Result<TickOutcome, ScheduleError> {
        let span = tracing::info_span!(
            "scheduler.tick",
            context = %self.config.context,
            capacity = tracing::field::Empty,
            dispatched = tracing::field::Empty,
        );
        let tick_start = Instant::now();
        METRICS.inc_ticks();
        self.state = SchedulerState::Scanning;

        let result = self.run_tick(&span).instrument(span.clone()).await;
        METRICS.record_tick_time(tick_start);

        match &result {
            Ok(outcome) => {
                span.record("dispatched", outcome.work_items.len());
                self.state = if outcome.is_complete() {
                    SchedulerState::Done
                } else {
                    SchedulerState::IdleReschedule
                };
            }
            Err(_) => {
                METRICS.inc_tick_errors();
                self.state = SchedulerState::IdleReschedule;
            }
        }
        result
    }

    async fn run_tick(&mut self, span: &tracing::Span) -> Result<TickOutcome, ScheduleError> {
        let context = self.config.context.clone();
        let admission = self
            .admission
            .check(&context)
            .await
            .map_err(|e| ScheduleError::ledger("count_active_sessions", e))?;
        span.record("capacity", admission.capacity);

        if !admission.has_room() {
            debug!(
                active_sessions = admission.active_sessions,
                "No capacity, rescheduling"
            );
            return Ok(TickOutcome {
                admission,
                work_items: Vec::new(),
                claims_lost: 0,
                next: self.reschedule_at(),
            });
        }

        let mut taken = Vec::new();
        let mut claims_lost = 0u32;
        if let Err(err) = self
            .fill(&context, admission.budget(), &mut taken, &mut claims_lost)
            .await
        {
            warn!(error = %err, claimed = taken.len(), "Tick aborted, returning claims");
            self.rollback(&taken).await;
            return Err(err);
        }

        let idle = admission.active_sessions == 0;
        let next = if taken.is_empty() && (idle || !self.config.completion_requires_idle) {
            TickNext::Complete
        } else {
            self.reschedule_at()
        };

        debug!(
            items = taken.len(),
            claims_lost,
            complete = matches!(next, TickNext::Complete),
            "Tick finished"
        );

        Ok(TickOutcome {
            admission,
            work_items: taken,
            claims_lost,
            next,
        })
    }

    /// Claim candidates phase by phase until the budget is spent.
    async fn fill(
        &mut self,
        context: &str,
        budget: usize,
        taken: &mut Vec<WorkItem>,
        claims_lost: &mut u32,
    ) -> Result<(), ScheduleError> {
        for phase in ScanPhase::ORDER {
            if taken.len() >= budget {
                break;
            }
            let mut scanner = CandidateScanner::new(Arc::clone(&self.ledger), &self.config, phase);

            while taken.len() < budget {
                let candidate = scanner
                    .next()
                    .await
                    .map_err(|e| ScheduleError::ledger("find_underfilled", e))?;
                let Some(candidate) = candidate else {
                    break;
                };

                let path = candidate.record.path.clone();
                let outcome = self
                    .claims
                    .try_claim(context, &path)
                    .await
                    .map_err(|e| ScheduleError::ledger("create_if_absent", e))?;

                if outcome == ClaimOutcome::Lost {
                    METRICS.inc_claims_lost();
                    *claims_lost += 1;
                    continue;
                }
                METRICS.inc_claims_won();

                // The page may predate a load that finished before this claim
                let Some(candidate) = self.recheck(context, &path, phase).await? else {
                    continue;
                };
                self.state = SchedulerState::Dispatching;

                // Recorded before the session opens so a failure below still releases it
                taken.push(candidate.work_item());
                let payload = serde_json::to_value(candidate.work_item())?;
                let session_id = self
                    .ledger
                    .start_session(context, &payload)
                    .await
                    .map_err(|e| ScheduleError::ledger("start_session", e))?;
                if let Some(item) = taken.last_mut() {
                    item.session_id = Some(session_id);
                }

                debug!(
                    path = %path,
                    phase = %phase,
                    deficit = candidate.deficit,
                    session_id = %session_id,
                    "Work item scheduled"
                );
            }
        }
        Ok(())
    }

    /// Re-read a freshly claimed node and size it from its current counters.
    ///
    /// Returns `None`, with the claim released, when the node is gone or no
    /// longer short of its target.
    async fn recheck(
        &self,
        context: &str,
        path: &str,
        phase: ScanPhase,
    ) -> Result<Option<Candidate>, ScheduleError> {
        let record = match self.ledger.get_node(context, path).await {
            Ok(record) => record,
            Err(e) => {
                self.release_quietly(context, path).await;
                return Err(ScheduleError::ledger("get_node", e));
            }
        };

        let candidate = record.map(|record| Candidate::new(record, phase, &self.config));
        match candidate {
            Some(candidate) if candidate.deficit > 0 => Ok(Some(candidate)),
            _ => {
                debug!(path = %path, phase = %phase, "Node filled since scan, releasing claim");
                self.claims
                    .release(context, path)
                    .await
                    .map_err(|e| ScheduleError::ledger("delete_node", e))?;
                Ok(None)
            }
        }
    }

    async fn release_quietly(&self, context: &str, path: &str) {
        if let Err(e) = self.claims.release(context, path).await {
            error!(path = %path, error = %e, "Failed to release claim");
        }
    }

    /// Release claims and end sessions. Failures are logged and skipped.
    async fn rollback(&self, items: &[WorkItem]) {
        for item in items {
            self.release_quietly(&item.context, &item.path).await;
            if let Some(session_id) = item.session_id {
                if let Err(e) = self.ledger.end_session(&session_id).await {
                    error!(session_id = %session_id, error = %e, "Failed to end session");
                }
            }
        }
    }

    fn reschedule_at(&self) -> TickNext {
        let delay = chrono::Duration::from_std(self.config.tick_delay)
            .unwrap_or_else(|_| chrono::Duration::zero());
        TickNext::Reschedule {
            at: Utc::now() + delay,
        }
    }

    /// Tick until completion or shutdown, sending events to `dispatch_tx`.
    ///
    /// Returns after emitting [`DispatchEvent::Complete`], on a shutdown
    /// signal (or a closed shutdown channel), or with
    /// [`ScheduleError::DispatchClosed`] when the receiver is dropped. The
    /// dispatch sender is dropped on return, closing the channel.
    pub async fn run(
        mut self,
        dispatch_tx: mpsc::Sender<DispatchEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<SchedulerSummary, ScheduleError> {
        let mut summary = SchedulerSummary::default();
        info!(
            context = %self.config.context,
            max_active_loaders = self.config.max_active_loaders,
            tick_delay_ms = self.config.tick_delay.as_millis() as u64,
            "Scheduler loop started"
        );

        loop {
            summary.ticks += 1;
            match self.tick().await {
                Ok(outcome) => {
                    let mut pending = outcome.work_items.into_iter();
                    while let Some(item) = pending.next() {
                        if let Err(mpsc::error::SendError(event)) =
                            dispatch_tx.send(DispatchEvent::Load(item)).await
                        {
                            if let DispatchEvent::Load(unsent) = event {
                                let mut undelivered = vec![unsent];
                                undelivered.extend(pending);
                                self.rollback(&undelivered).await;
                            }
                            error!("Dispatch channel closed, stopping scheduler");
                            return Err(ScheduleError::DispatchClosed);
                        }
                        METRICS.inc_items_dispatched();
                        summary.items_dispatched += 1;
                    }

                    if let TickNext::Complete = outcome.next {
                        let complete = DispatchEvent::Complete {
                            context: self.config.context.clone(),
                        };
                        if dispatch_tx.send(complete).await.is_err() {
                            return Err(ScheduleError::DispatchClosed);
                        }
                        METRICS.inc_completions();
                        summary.completed = true;
                        info!(
                            ticks = summary.ticks,
                            items = summary.items_dispatched,
                            "Tree population complete"
                        );
                        return Ok(summary);
                    }
                    METRICS.inc_reschedules();
                }
                Err(err) if err.is_retryable() => {
                    summary.aborted_ticks += 1;
                    error!(error = %err, "Tick aborted, retrying after delay");
                }
                Err(err) => return Err(err),
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!(ticks = summary.ticks, "Scheduler received shutdown signal");
                    return Ok(summary);
                }

                _ = tokio::time::sleep(self.config.tick_delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_ledger::MemoryLedger;
    use arbor_protocol::{NodeRecord, TreeShape};

    #[test]
    fn test_new_rejects_invalid_config() {
        let ledger: Arc<dyn LedgerStore> = Arc::new(MemoryLedger::new());
        let config = ScheduleConfig::new(TreeShape::default(), 0);
        assert!(Scheduler::new(config, ledger).is_err());
    }

    #[tokio::test]
    async fn test_state_follows_outcome() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .create_if_absent(&NodeRecord::new("", "/S/a/d").with_id("a"))
            .await
            .unwrap();
        let config = ScheduleConfig::new(TreeShape::default(), 1);
        let mut scheduler = Scheduler::new(config, ledger.clone()).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Scanning);

        let first = scheduler.tick().await.unwrap();
        assert_eq!(first.work_items.len(), 1);
        assert_eq!(scheduler.state(), SchedulerState::IdleReschedule);

        // Finish the item by hand
        let item = &first.work_items[0];
        ledger
            .increment_counters("", "/S/a/d", 5, 100)
            .await
            .unwrap();
        ClaimLock::new(ledger.clone())
            .release("", &item.path)
            .await
            .unwrap();
        ledger
            .end_session(&item.session_id.unwrap())
            .await
            .unwrap();

        let second = scheduler.tick().await.unwrap();
        assert!(second.is_complete());
        assert_eq!(scheduler.state(), SchedulerState::Done);
    }

    #[tokio::test]
    async fn test_reschedule_time_uses_tick_delay() {
        let ledger = Arc::new(MemoryLedger::new());
        for _ in 0..2 {
            ledger.start_session("", &serde_json::json!({})).await.unwrap();
        }
        let config = ScheduleConfig::new(TreeShape::default(), 2)
            .with_tick_delay(std::time::Duration::from_secs(30));
        let mut scheduler = Scheduler::new(config, ledger).unwrap();

        let before = Utc::now();
        let outcome = scheduler.tick().await.unwrap();
        match outcome.next {
            TickNext::Reschedule { at } => {
                assert!(at >= before + chrono::Duration::seconds(30));
            }
            TickNext::Complete => panic!("zero capacity must not complete"),
        }
    }
}
