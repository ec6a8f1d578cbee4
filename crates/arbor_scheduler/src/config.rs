//! Scheduler configuration.

use std::str::FromStr;
use std::time::Duration;

use arbor_ledger::LevelFilter;
use arbor_protocol::defaults;
use arbor_protocol::{ConfigError, TreeShape};
use serde::{Deserialize, Serialize};

/// How a phase's target level restricts the candidate scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LevelMatch {
    /// Every folder at or above the target level qualifies.
    #[default]
    AtMost,
    /// Only folders exactly at the target level qualify.
    Exact,
}

impl LevelMatch {
    pub fn filter(self, level: u32) -> LevelFilter {
        match self {
            LevelMatch::AtMost => LevelFilter::AtMost(level),
            LevelMatch::Exact => LevelFilter::Exact(level),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LevelMatch::AtMost => "at-most",
            LevelMatch::Exact => "exact",
        }
    }
}

impl FromStr for LevelMatch {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "at-most" | "at_most" => Ok(LevelMatch::AtMost),
            "exact" => Ok(LevelMatch::Exact),
            other => Err(ConfigError::InvalidScheduler(format!(
                "unknown level_match '{other}' (expected at-most or exact)"
            ))),
        }
    }
}

/// Everything one scheduler instance needs to know about its work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Partition the scheduler populates.
    pub context: String,
    pub shape: TreeShape,
    /// Upper bound on open work sessions in the context.
    pub max_active_loaders: u32,
    /// Delay between ticks.
    pub tick_delay: Duration,
    /// Candidates fetched per ledger query.
    pub page_size: u32,
    pub level_match: LevelMatch,
    /// Only declare completion when no work session is open.
    ///
    /// When false, completion follows the plain rule: a tick with spare
    /// capacity that claims nothing is the last one, even while earlier
    /// loads are still running.
    pub completion_requires_idle: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            context: defaults::DEFAULT_CONTEXT.to_string(),
            shape: TreeShape::default(),
            max_active_loaders: defaults::DEFAULT_MAX_ACTIVE_LOADERS,
            tick_delay: Duration::from_millis(defaults::DEFAULT_TICK_DELAY_MS),
            page_size: defaults::DEFAULT_PAGE_SIZE,
            level_match: LevelMatch::default(),
            completion_requires_idle: true,
        }
    }
}

impl ScheduleConfig {
    pub fn new(shape: TreeShape, max_active_loaders: u32) -> Self {
        Self {
            shape,
            max_active_loaders,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_tick_delay(mut self, tick_delay: Duration) -> Self {
        self.tick_delay = tick_delay;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_level_match(mut self, level_match: LevelMatch) -> Self {
        self.level_match = level_match;
        self
    }

    pub fn with_completion_requires_idle(mut self, requires_idle: bool) -> Self {
        self.completion_requires_idle = requires_idle;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shape.validate()?;
        if self.max_active_loaders == 0 {
            return Err(ConfigError::InvalidScheduler(
                "max_active_loaders must be greater than 0".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(ConfigError::InvalidScheduler(
                "page_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
