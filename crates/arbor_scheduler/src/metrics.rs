//! Scheduler metrics.
//!
//! Process-wide atomic counters, readable as a snapshot, a one-line summary
//! or Prometheus exposition text.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    pub ticks: AtomicU64,
    pub tick_errors: AtomicU64,
    pub items_dispatched: AtomicU64,
    pub claims_won: AtomicU64,
    pub claims_lost: AtomicU64,
    pub completions: AtomicU64,
    pub reschedules: AtomicU64,

    // Cumulative microseconds for averaging
    pub tick_time_us: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            tick_errors: AtomicU64::new(0),
            items_dispatched: AtomicU64::new(0),
            claims_won: AtomicU64::new(0),
            claims_lost: AtomicU64::new(0),
            completions: AtomicU64::new(0),
            reschedules: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_ticks(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_tick_errors(&self) {
        self.tick_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_items_dispatched(&self) {
        self.items_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_claims_won(&self) {
        self.claims_won.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_claims_lost(&self) {
        self.claims_lost.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_completions(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_reschedules(&self) {
        self.reschedules.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tick_time(&self, start: Instant) {
        let elapsed_us = start.elapsed().as_micros() as u64;
        self.tick_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_errors: self.tick_errors.load(Ordering::Relaxed),
            items_dispatched: self.items_dispatched.load(Ordering::Relaxed),
            claims_won: self.claims_won.load(Ordering::Relaxed),
            claims_lost: self.claims_lost.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            reschedules: self.reschedules.load(Ordering::Relaxed),
            tick_time_us: self.tick_time_us.load(Ordering::Relaxed),
        }
    }

    /// Format as Prometheus exposition format
    pub fn prometheus_format(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"# HELP arbor_ticks_total Scheduler ticks started
# TYPE arbor_ticks_total counter
arbor_ticks_total {}

# HELP arbor_tick_errors_total Ticks aborted by a ledger failure
# TYPE arbor_tick_errors_total counter
arbor_tick_errors_total {}

# HELP arbor_items_dispatched_total Work items handed to the dispatcher
# TYPE arbor_items_dispatched_total counter
arbor_items_dispatched_total {}

# HELP arbor_claims_won_total Claim attempts that created a lock marker
# TYPE arbor_claims_won_total counter
arbor_claims_won_total {}

# HELP arbor_claims_lost_total Claim attempts that found an existing lock marker
# TYPE arbor_claims_lost_total counter
arbor_claims_lost_total {}

# HELP arbor_completions_total Completion signals emitted
# TYPE arbor_completions_total counter
arbor_completions_total {}

# HELP arbor_reschedules_total Ticks that rescheduled the loop
# TYPE arbor_reschedules_total counter
arbor_reschedules_total {}

# HELP arbor_tick_time_microseconds_total Cumulative tick time in microseconds
# TYPE arbor_tick_time_microseconds_total counter
arbor_tick_time_microseconds_total {}
"#,
            s.ticks,
            s.tick_errors,
            s.items_dispatched,
            s.claims_won,
            s.claims_lost,
            s.completions,
            s.reschedules,
            s.tick_time_us,
        )
    }
}

/// Immutable snapshot of metrics for reading
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub tick_errors: u64,
    pub items_dispatched: u64,
    pub claims_won: u64,
    pub claims_lost: u64,
    pub completions: u64,
    pub reschedules: u64,
    pub tick_time_us: u64,
}

impl MetricsSnapshot {
    pub fn avg_tick_time_ms(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            (self.tick_time_us as f64 / self.ticks as f64) / 1000.0
        }
    }

    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Ticks: {} ({} aborted) | Items: {} dispatched | \
             Claims: {} won, {} lost | Avg tick: {:.2}ms",
            self.ticks,
            self.tick_errors,
            self.items_dispatched,
            self.claims_won,
            self.claims_lost,
            self.avg_tick_time_ms(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();
        metrics.inc_claims_won();
        metrics.inc_claims_won();
        metrics.inc_claims_lost();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.claims_won, 2);
        assert_eq!(snapshot.claims_lost, 1);
    }

    #[test]
    fn test_summary_without_ticks() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot.avg_tick_time_ms(), 0.0);
        assert!(snapshot.summary().starts_with("Ticks: 0 (0 aborted)"));
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.inc_completions();
        let output = metrics.prometheus_format();
        assert!(output.contains("arbor_completions_total 1"));
        assert!(output.contains("arbor_ticks_total 0"));
    }
}
