//! Sample documents uploaded as file content.

use std::path::Path;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, info};
use walkdir::WalkDir;

/// One sample document.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

/// Pool of sample documents, picked at random per file.
#[derive(Debug, Clone, Default)]
pub struct SamplePool {
    samples: Vec<Sample>,
}

impl SamplePool {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Read every regular file directly inside `dir`.
    pub fn load(dir: &Path) -> std::io::Result<Self> {
        let mut samples = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let bytes = std::fs::read(entry.path())?;
            debug!(name = %name, size = bytes.len(), "Loaded sample");
            samples.push(Sample {
                name,
                bytes: bytes.into(),
            });
        }
        info!(dir = %dir.display(), count = samples.len(), "Sample pool loaded");
        Ok(Self { samples })
    }

    /// Small generated text documents, for runs without a sample directory.
    pub fn synthetic(count: usize) -> Self {
        let samples = (0..count)
            .map(|i| Sample {
                name: format!("sample-{i}.txt"),
                bytes: format!("Arbor sample document {i}\n").into_bytes().into(),
            })
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// A random sample, or `None` when the pool is empty.
    pub fn pick(&self) -> Option<&Sample> {
        self.samples.choose(&mut rand::thread_rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_reads_top_level_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.pdf"), b"%PDF").unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"text").unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested").join("c.txt"), b"skip").unwrap();

        let pool = SamplePool::load(tmp.path()).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.samples[0].name, "a.txt");
        assert_eq!(&*pool.samples[1].bytes, b"%PDF");
    }

    #[test]
    fn test_load_missing_dir_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(SamplePool::load(&tmp.path().join("absent")).is_err());
    }

    #[test]
    fn test_pick() {
        assert!(SamplePool::default().pick().is_none());
        let pool = SamplePool::synthetic(3);
        let sample = pool.pick().unwrap();
        assert!(sample.name.starts_with("sample-"));
    }
}
