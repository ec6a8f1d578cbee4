//! Launcher configuration (`arbor.toml`)
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration. Validation runs once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use arbor_protocol::{defaults, ConfigError, TreeShape};
use arbor_scheduler::{LevelMatch, ScheduleConfig};
use arbor_worker::WorkerConfig;
use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "arbor.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArborConfig {
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub tree: TreeSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSection {
    /// `sqlite:<path>` or `memory:`
    #[serde(default = "default_ledger_url")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSection {
    #[serde(default = "default_branching_factor")]
    pub branching_factor: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_files_per_leaf")]
    pub files_per_leaf: u32,
    #[serde(default = "default_root_level")]
    pub root_level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_context")]
    pub context: String,
    #[serde(default = "default_max_active_loaders")]
    pub max_active_loaders: u32,
    #[serde(default = "default_tick_delay_ms")]
    pub tick_delay_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub level_match: LevelMatch,
    #[serde(default = "default_true")]
    pub completion_requires_idle: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSection {
    /// `fs:<dir>` or `memory:`
    #[serde(default = "default_content_url")]
    pub content_url: String,
    /// Directory of sample documents. Generated samples are used when unset.
    #[serde(default)]
    pub samples_dir: Option<PathBuf>,
    #[serde(default = "default_synthetic_samples")]
    pub synthetic_samples: usize,
    #[serde(default = "default_max_concurrent_loads")]
    pub max_concurrent_loads: usize,
}

fn default_ledger_url() -> String {
    defaults::DEFAULT_LEDGER_URL.to_string()
}

fn default_branching_factor() -> u32 {
    defaults::DEFAULT_BRANCHING_FACTOR
}

fn default_max_depth() -> u32 {
    defaults::DEFAULT_MAX_DEPTH
}

fn default_files_per_leaf() -> u32 {
    defaults::DEFAULT_FILES_PER_LEAF
}

fn default_root_level() -> u32 {
    defaults::DEFAULT_ROOT_LEVEL
}

fn default_context() -> String {
    defaults::DEFAULT_CONTEXT.to_string()
}

fn default_max_active_loaders() -> u32 {
    defaults::DEFAULT_MAX_ACTIVE_LOADERS
}

fn default_tick_delay_ms() -> u64 {
    defaults::DEFAULT_TICK_DELAY_MS
}

fn default_page_size() -> u32 {
    defaults::DEFAULT_PAGE_SIZE
}

fn default_true() -> bool {
    true
}

fn default_content_url() -> String {
    defaults::DEFAULT_CONTENT_URL.to_string()
}

fn default_synthetic_samples() -> usize {
    8
}

fn default_max_concurrent_loads() -> usize {
    defaults::DEFAULT_MAX_CONCURRENT_LOADS
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            url: default_ledger_url(),
        }
    }
}

impl Default for TreeSection {
    fn default() -> Self {
        Self {
            branching_factor: default_branching_factor(),
            max_depth: default_max_depth(),
            files_per_leaf: default_files_per_leaf(),
            root_level: default_root_level(),
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            context: default_context(),
            max_active_loaders: default_max_active_loaders(),
            tick_delay_ms: default_tick_delay_ms(),
            page_size: default_page_size(),
            level_match: LevelMatch::default(),
            completion_requires_idle: true,
        }
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            content_url: default_content_url(),
            samples_dir: None,
            synthetic_samples: default_synthetic_samples(),
            max_concurrent_loads: default_max_concurrent_loads(),
        }
    }
}

impl ArborConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Load `path` if given, else `arbor.toml` when present, else defaults.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn tree_shape(&self) -> Result<TreeShape, ConfigError> {
        let tree = &self.tree;
        let shape = TreeShape::new(tree.branching_factor, tree.max_depth, tree.files_per_leaf)?
            .with_root_level(tree.root_level);
        shape.validate()?;
        Ok(shape)
    }

    pub fn schedule_config(&self) -> Result<ScheduleConfig, ConfigError> {
        let scheduler = &self.scheduler;
        let config = ScheduleConfig::new(self.tree_shape()?, scheduler.max_active_loaders)
            .with_context(scheduler.context.clone())
            .with_tick_delay(Duration::from_millis(scheduler.tick_delay_ms))
            .with_page_size(scheduler.page_size)
            .with_level_match(scheduler.level_match)
            .with_completion_requires_idle(scheduler.completion_requires_idle);
        config.validate()?;
        Ok(config)
    }

    pub fn worker_config(&self) -> Result<WorkerConfig, ConfigError> {
        let config = WorkerConfig {
            max_concurrent_loads: self.worker.max_concurrent_loads,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every section without opening anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule_config()?;
        self.worker_config()?;
        Ok(())
    }
}
