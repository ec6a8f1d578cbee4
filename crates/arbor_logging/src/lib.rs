//! Shared logging setup for Arbor binaries.
//!
//! Two `fmt` layers: a size-rotated log file under `$ARBOR_HOME/logs` and
//! stderr. `RUST_LOG` overrides the default filter.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "arbor=info,arbor_scheduler=info,arbor_worker=info,arbor_ledger=info";
const QUIET_CONSOLE_FILTER: &str = "warn,arbor=info";

/// Logging configuration shared by Arbor binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file filter on stderr instead of warnings only.
    pub verbose: bool,
}

/// Initialize tracing with a size-rotated log file and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_writer = LogFileWriter::open(&log_dir, config.app_name, Rotation::default())
        .with_context(|| format!("Failed to open log file for {}", config.app_name))?;

    let default_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    let console_filter = if config.verbose {
        default_filter()
    } else {
        EnvFilter::new(QUIET_CONSOLE_FILTER)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(default_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Get the Arbor home directory: `$ARBOR_HOME` or `~/.arbor`.
///
/// Falls back to `./.arbor` when no home directory can be determined.
pub fn arbor_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("ARBOR_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".arbor")
}

/// Get the logs directory: `<home>/logs`.
pub fn logs_dir() -> PathBuf {
    arbor_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// How many generations to keep and how large one may grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    /// Files kept, the live one included.
    pub keep: usize,
    pub max_bytes: u64,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            keep: 5,
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Log files currently present for `app_name` in `dir`, newest first.
pub fn log_files(dir: &Path, app_name: &str, rotation: Rotation) -> Vec<PathBuf> {
    let stem = file_stem(app_name);
    (0..rotation.keep.max(1))
        .map(|generation| generation_path(dir, &stem, generation))
        .filter(|path| path.exists())
        .collect()
}

/// `<stem>.log` for the live file, `<stem>.log.<n>` for older generations.
fn generation_path(dir: &Path, stem: &str, generation: usize) -> PathBuf {
    if generation == 0 {
        dir.join(format!("{stem}.log"))
    } else {
        dir.join(format!("{stem}.log.{generation}"))
    }
}

fn file_stem(app_name: &str) -> String {
    app_name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok((file, len))
}

/// A log file that starts a new generation once it would exceed its size.
struct SizeRotatedFile {
    dir: PathBuf,
    stem: String,
    rotation: Rotation,
    file: Option<File>,
    written: u64,
}

impl SizeRotatedFile {
    fn open(dir: &Path, app_name: &str, rotation: Rotation) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut log = Self {
            dir: dir.to_path_buf(),
            stem: file_stem(app_name),
            rotation: Rotation {
                keep: rotation.keep.max(1),
                ..rotation
            },
            file: None,
            written: 0,
        };
        let (file, len) = open_append(&log.path(0))?;
        log.file = Some(file);
        log.written = len;
        if log.written > log.rotation.max_bytes {
            log.roll()?;
        }
        Ok(log)
    }

    fn path(&self, generation: usize) -> PathBuf {
        generation_path(&self.dir, &self.stem, generation)
    }

    /// Close the live file, age every generation by one and reopen.
    fn roll(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }

        let oldest = self.rotation.keep - 1;
        let expired = self.path(oldest);
        if expired.exists() {
            fs::remove_file(expired)?;
        }
        for generation in (0..oldest).rev() {
            let from = self.path(generation);
            if from.exists() {
                fs::rename(from, self.path(generation + 1))?;
            }
        }

        let (file, len) = open_append(&self.path(0))?;
        self.file = Some(file);
        self.written = len;
        Ok(())
    }
}

impl Write for SizeRotatedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.rotation.max_bytes {
            self.roll()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Shared handle given to the file layer; each event locks the file once.
#[derive(Clone)]
struct LogFileWriter {
    log: Arc<Mutex<SizeRotatedFile>>,
}

impl LogFileWriter {
    fn open(dir: &Path, app_name: &str, rotation: Rotation) -> io::Result<Self> {
        Ok(Self {
            log: Arc::new(Mutex::new(SizeRotatedFile::open(dir, app_name, rotation)?)),
        })
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut SizeRotatedFile) -> io::Result<T>) -> io::Result<T> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;
        f(&mut log)
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_log(|log| log.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_log(|log| log.flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
