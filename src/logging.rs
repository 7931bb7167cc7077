//! Tracing setup for `imgrecon` invocations.
//!
//! Every invocation logs to stdout and to its own file under the app logs
//! directory, named after the command and its start time. Work done by a
//! command runs inside [`run_span`], so each line carries the settings of the
//! run that produced it.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing::Span;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs::{self, AppDirError};
use crate::dedup::DedupMode;

/// Log files kept across invocations.
const MAX_LOG_FILES: usize = 10;
const LOG_FILE_PREFIX: &str = "imgrecon";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Settings of one invocation, attached to its log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext<'a> {
    pub command: &'a str,
    pub dry_run: bool,
    pub dedup_mode: DedupMode,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Log directory unavailable: {0}")]
    LogDir(#[from] AppDirError),
    #[error("Failed to format log file time: {0}")]
    FormatTime(time::error::Format),
    #[error("Failed to create log file {path}: {source}")]
    CreateLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to prune old logs in {path}: {source}")]
    Prune {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
}

/// Install the stdout and file subscriber for this invocation and return
/// the log file path.
///
/// A second call keeps the first subscriber. Errors leave the CLI running
/// without logs.
pub fn init(context: &RunContext<'_>) -> Result<Option<PathBuf>, LoggingError> {
    if LOG_GUARD.get().is_some() {
        return Ok(None);
    }
    let log_dir = app_dirs::logs_dir()?;
    let log_path = log_dir.join(log_file_name(context.command, now_local_or_utc())?);
    create_log_file(&log_path)?;
    prune_old_logs(&log_dir, MAX_LOG_FILES)?;

    let (file_writer, guard) = tracing_appender::non_blocking(rolling::never(
        &log_dir,
        log_path.file_name().unwrap_or_default(),
    ));
    let timer = local_timer();
    let subscriber = Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(timer.clone())
                .with_writer(std::io::stdout),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(file_writer),
        );
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    let _ = LOG_GUARD.set(guard);
    Ok(Some(log_path))
}

/// Span enclosing all work of one invocation.
pub fn run_span(context: &RunContext<'_>) -> Span {
    tracing::info_span!(
        "run",
        command = context.command,
        dry_run = context.dry_run,
        dedup_mode = context.dedup_mode.as_str()
    )
}

fn create_log_file(path: &Path) -> Result<(), LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(drop)
        .map_err(|source| LoggingError::CreateLogFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Delete the oldest `imgrecon` logs beyond `keep`. Other files are left alone.
fn prune_old_logs(dir: &Path, keep: usize) -> Result<(), LoggingError> {
    let prune_error = |source| LoggingError::Prune {
        path: dir.to_path_buf(),
        source,
    };
    let mut logs: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)
        .map_err(prune_error)?
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log")
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect();
    logs.sort();
    let excess = logs.len().saturating_sub(keep);
    for (_, path) in logs.into_iter().take(excess) {
        fs::remove_file(&path).map_err(prune_error)?;
    }
    Ok(())
}

fn log_file_name(command: &str, now: OffsetDateTime) -> Result<String, LoggingError> {
    const NAME_FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    let stamp = now.format(NAME_FORMAT).map_err(LoggingError::FormatTime)?;
    Ok(format!("{LOG_FILE_PREFIX}-{command}_{stamp}.log"))
}

fn local_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const DISPLAY_FORMAT: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, DISPLAY_FORMAT.into())
}

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};
    use tempfile::tempdir;

    fn context(dry_run: bool) -> RunContext<'static> {
        RunContext {
            command: "run",
            dry_run,
            dedup_mode: DedupMode::AnyDuplicate,
        }
    }

    #[test]
    fn log_file_is_named_after_command_and_start_time() {
        let fixed = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(
            log_file_name("resolve", fixed).unwrap(),
            "imgrecon-resolve_2023-11-14_22-13-20.log"
        );
    }

    #[test]
    fn run_span_records_run_settings() {
        tracing::subscriber::with_default(Registry::default(), || {
            let span = run_span(&context(true));
            let metadata = span.metadata().expect("span enabled");
            assert_eq!(metadata.name(), "run");
            let fields: Vec<&str> = metadata.fields().iter().map(|field| field.name()).collect();
            assert_eq!(fields, vec!["command", "dry_run", "dedup_mode"]);
        });
    }

    #[test]
    fn prune_keeps_newest_logs_and_ignores_other_files() {
        let dir = tempdir().unwrap();
        for idx in 0..5 {
            create_log_file(&dir.path().join(format!("imgrecon-run_{idx}.log"))).unwrap();
            thread::sleep(Duration::from_millis(10));
        }
        fs::write(dir.path().join("missing_images.csv"), b"user_id\n").unwrap();
        fs::write(dir.path().join("other-tool.log"), b"").unwrap();

        prune_old_logs(dir.path(), 3).unwrap();
        let mut remaining = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                "imgrecon-run_2.log",
                "imgrecon-run_3.log",
                "imgrecon-run_4.log",
                "missing_images.csv",
                "other-tool.log",
            ]
        );
    }
}
