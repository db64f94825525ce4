//! Log output for the mixing service.
//!
//! Console output goes to stderr. File output is written to `run.log` in the
//! configured directory; the previous run's file is archived under a
//! timestamped name on startup and old archives are pruned.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{LoggingError, LoggingResult};

const ARCHIVE_PREFIX: &str = "coinmix.";
const ARCHIVE_SUFFIX: &str = ".log";
const ACTIVE_LOG_NAME: &str = "run.log";

/// Keeps the background log writer alive. Buffered lines are flushed on drop.
#[derive(Debug)]
pub struct LoggingGuard {
    _writer: Option<WorkerGuard>,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level filter; `RUST_LOG` is consulted when unset, then INFO.
    pub level: Option<LevelFilter>,
    /// Write to stderr.
    pub console: bool,
    pub file: Option<LogFileConfig>,
}

#[derive(Debug, Clone)]
pub struct LogFileConfig {
    pub directory: PathBuf,
    /// Archived runs to keep.
    pub max_archives: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            console: true,
            file: None,
        }
    }
}

/// Install the global subscriber.
///
/// With neither console nor file output configured nothing is installed and
/// the tracing macros stay no-ops.
pub fn init_logging(config: LoggingConfig) -> LoggingResult<LoggingGuard> {
    if !config.console && config.file.is_none() {
        return Ok(LoggingGuard {
            _writer: None,
        });
    }

    let filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    };

    let (writer, guard) = match &config.file {
        Some(file) => {
            let (writer, guard) = open_log_file(file)?;
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let file_layer = writer.map(|w| fmt::layer().with_ansi(false).with_target(true).with_writer(w));
    let console_layer = config.console.then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInit(e.to_string()))?;

    Ok(LoggingGuard {
        _writer: guard,
    })
}

/// Archive the last run, prune old archives and open a fresh `run.log`.
fn open_log_file(config: &LogFileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&config.directory)?;
    let directory = LogDirectory::new(&config.directory);
    directory.archive_active()?;
    directory.prune(config.max_archives)?;

    let file = File::create(directory.active_path())?;
    Ok(tracing_appender::non_blocking(file))
}

/// The files of one log directory.
struct LogDirectory<'a> {
    path: &'a Path,
}

impl<'a> LogDirectory<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
        }
    }

    fn active_path(&self) -> PathBuf {
        self.path.join(ACTIVE_LOG_NAME)
    }

    /// Rename `run.log` to `coinmix.<date>.<time>[-n].log`, stamped with its mtime.
    fn archive_active(&self) -> LoggingResult<Option<PathBuf>> {
        let active = self.active_path();
        if !active.exists() {
            return Ok(None);
        }

        let stamp = modified_at(&active).unwrap_or_else(Local::now).format("%Y-%m-%d.%H%M%S").to_string();
        let target = std::iter::once(format!("{ARCHIVE_PREFIX}{stamp}{ARCHIVE_SUFFIX}"))
            .chain((1..1000).map(|n| format!("{ARCHIVE_PREFIX}{stamp}-{n}{ARCHIVE_SUFFIX}")))
            .map(|name| self.path.join(name))
            .find(|candidate| !candidate.exists())
            .ok_or_else(|| LoggingError::RotationFailed(format!("no free archive name for {stamp}")))?;

        fs::rename(&active, &target).map_err(|e| LoggingError::RotationFailed(e.to_string()))?;
        Ok(Some(target))
    }

    /// Archived logs, oldest first.
    fn archives(&self) -> LoggingResult<Vec<(PathBuf, Option<SystemTime>)>> {
        let entries = fs::read_dir(self.path)
            .map_err(|e| LoggingError::RotationFailed(format!("cannot list {}: {e}", self.path.display())))?;

        let mut archives: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with(ARCHIVE_PREFIX) && name.ends_with(ARCHIVE_SUFFIX)
            })
            .map(|entry| {
                let modified = entry.metadata().and_then(|m| m.modified()).ok();
                (entry.path(), modified)
            })
            .collect();
        archives.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(archives)
    }

    /// Delete the oldest archives beyond `keep`. `run.log` is never touched.
    fn prune(&self, keep: usize) -> LoggingResult<usize> {
        let archives = self.archives()?;
        let excess = archives.len().saturating_sub(keep);
        for (path, _) in archives.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Could not remove old log {}: {}", path.display(), e);
            }
        }
        Ok(excess)
    }
}

fn modified_at(path: &Path) -> Option<DateTime<Local>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::from(modified))
}
