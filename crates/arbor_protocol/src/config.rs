//! Tree shape parameters and configuration errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults;

/// Configuration errors are fatal at startup and never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid tree shape: {0}")]
    InvalidShape(String),

    #[error("Invalid scheduler setting: {0}")]
    InvalidScheduler(String),

    #[error("Invalid worker setting: {0}")]
    InvalidWorker(String),

    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),
}

/// Target shape of every populated tree (read-only configuration).
///
/// Levels count path segments. The tree root sits at `root_level`, so the
/// deepest folders sit at `max_depth + root_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeShape {
    /// Subfolders per non-leaf folder.
    pub branching_factor: u32,
    /// Depth of the last level of folders, measured from the tree root.
    pub max_depth: u32,
    /// Files added to each folder.
    pub files_per_leaf: u32,
    /// Level of the tree root inside the fixed prefix.
    pub root_level: u32,
}

impl Default for TreeShape {
    fn default() -> Self {
        Self {
            branching_factor: defaults::DEFAULT_BRANCHING_FACTOR,
            max_depth: defaults::DEFAULT_MAX_DEPTH,
            files_per_leaf: defaults::DEFAULT_FILES_PER_LEAF,
            root_level: defaults::DEFAULT_ROOT_LEVEL,
        }
    }
}

impl TreeShape {
    pub fn new(branching_factor: u32, max_depth: u32, files_per_leaf: u32) -> Result<Self, ConfigError> {
        let shape = Self {
            branching_factor,
            max_depth,
            files_per_leaf,
            root_level: defaults::DEFAULT_ROOT_LEVEL,
        };
        shape.validate()?;
        Ok(shape)
    }

    pub fn with_root_level(mut self, root_level: u32) -> Self {
        self.root_level = root_level;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.branching_factor == 0 {
            return Err(ConfigError::InvalidShape(
                "branching_factor must be greater than 0".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::InvalidShape(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.max_depth.checked_add(self.root_level).is_none() {
            return Err(ConfigError::InvalidShape(format!(
                "root_level {} overflows the level range",
                self.root_level
            )));
        }
        Ok(())
    }

    /// Level of the deepest folders.
    pub fn max_level(&self) -> u32 {
        self.max_depth.saturating_add(self.root_level)
    }

    /// Number of folders in one fully populated tree, root included.
    pub fn folders_per_tree(&self) -> u64 {
        let b = u64::from(self.branching_factor);
        (0..=self.max_depth).fold(0u64, |total, depth| {
            total.saturating_add(b.saturating_pow(depth))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shape_is_valid() {
        let shape = TreeShape::default();
        assert!(shape.validate().is_ok());
        assert_eq!(shape.max_level(), 6);
    }

    #[test]
    fn test_rejects_zero_branching_factor() {
        let err = TreeShape::new(0, 3, 100).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidShape(_)));
    }

    #[test]
    fn test_rejects_zero_depth() {
        assert!(TreeShape::new(5, 0, 100).is_err());
    }

    #[test]
    fn test_rejects_root_level_overflow() {
        let shape = TreeShape::new(5, 3, 100).unwrap().with_root_level(u32::MAX);
        assert!(matches!(shape.validate(), Err(ConfigError::InvalidShape(_))));
        let shape = TreeShape::new(5, 3, 100).unwrap().with_root_level(u32::MAX - 3);
        assert!(shape.validate().is_ok());
    }

    #[test]
    fn test_zero_files_per_leaf_is_allowed() {
        assert!(TreeShape::new(5, 3, 0).is_ok());
    }

    #[test]
    fn test_folders_per_tree() {
        // 1 + 5 + 25 + 125
        let shape = TreeShape::new(5, 3, 100).unwrap();
        assert_eq!(shape.folders_per_tree(), 156);
    }
}
