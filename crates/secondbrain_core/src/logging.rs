//! Process-wide log sink for batch runs.
//!
//! # Responsibility
//! - Route `log` records to daily-rotated files under the state directory.
//! - Mirror records to stderr when a person is watching the run.
//! - Record panics as a structured event before the default hook prints.
//!
//! # Invariants
//! - Message bodies never reach the log; events carry ids and counts only.
//! - The sink is installed at most once; a second call with the same
//!   directory and level is a no-op.

use flexi_logger::{
    Age, Cleanup, Criterion, Duplicate, FileSpec, FlexiLoggerError, Logger, LoggerHandle, Naming,
    WriteMode,
};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const LOG_BASENAME: &str = "secondbrain";
const KEEP_DAYS: usize = 14;
const PANIC_SUMMARY_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveSink> = OnceCell::new();

struct ActiveSink {
    level: LevelFilter,
    dir: PathBuf,
    _handle: LoggerHandle,
}

#[derive(Debug)]
pub enum LoggingError {
    UnknownLevel(String),
    RelativeDir(PathBuf),
    CreateDir { path: PathBuf, source: io::Error },
    Backend(FlexiLoggerError),
    /// A sink with different settings is already installed.
    AlreadyActive { level: LevelFilter, dir: PathBuf },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownLevel(value) => write!(
                f,
                "unknown log level `{value}`; expected trace|debug|info|warn|error"
            ),
            Self::RelativeDir(path) => {
                write!(f, "log directory must be absolute, got `{}`", path.display())
            }
            Self::CreateDir { path, source } => {
                write!(f, "cannot create log directory `{}`: {source}", path.display())
            }
            Self::Backend(err) => write!(f, "log backend failed to start: {err}"),
            Self::AlreadyActive { level, dir } => write!(
                f,
                "logging already active at `{}` with level {level}",
                dir.display()
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FlexiLoggerError> for LoggingError {
    fn from(value: FlexiLoggerError) -> Self {
        Self::Backend(value)
    }
}

/// Installs the file sink at `level` under `log_dir`.
///
/// # Errors
/// - `level` is not a `log` level name (`warning` is accepted for `warn`).
/// - `log_dir` is relative or cannot be created.
/// - A sink with another level or directory is already installed.
pub fn init_logging(
    level: &str,
    log_dir: &Path,
    echo_to_stderr: bool,
) -> Result<(), LoggingError> {
    let level = parse_level(level)?;
    if !log_dir.is_absolute() {
        return Err(LoggingError::RelativeDir(log_dir.to_path_buf()));
    }

    let sink = ACTIVE.get_or_try_init(|| start_sink(level, log_dir, echo_to_stderr))?;
    if sink.level != level || sink.dir != log_dir {
        return Err(LoggingError::AlreadyActive {
            level: sink.level,
            dir: sink.dir.clone(),
        });
    }
    Ok(())
}

/// Level and directory of the installed sink, if any.
pub fn logging_status() -> Option<(LevelFilter, PathBuf)> {
    ACTIVE.get().map(|sink| (sink.level, sink.dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start_sink(
    level: LevelFilter,
    dir: &Path,
    echo_to_stderr: bool,
) -> Result<ActiveSink, LoggingError> {
    std::fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let handle = Logger::try_with_str(level.to_string().to_ascii_lowercase())?
        .log_to_file(FileSpec::default().directory(dir).basename(LOG_BASENAME))
        .rotate(
            Criterion::Age(Age::Day),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(KEEP_DAYS),
        )
        .duplicate_to_stderr(stderr_echo(level, echo_to_stderr))
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .format_for_stderr(flexi_logger::default_format)
        .start()?;

    install_panic_hook();
    info!(
        "event=logging_start module=logging status=ok level={level} version={} log_dir={}",
        env!("CARGO_PKG_VERSION"),
        dir.display()
    );

    Ok(ActiveSink {
        level,
        dir: dir.to_path_buf(),
        _handle: handle,
    })
}

fn parse_level(value: &str) -> Result<LevelFilter, LoggingError> {
    let trimmed = value.trim();
    let candidate = if trimmed.eq_ignore_ascii_case("warning") {
        "warn"
    } else {
        trimmed
    };
    match LevelFilter::from_str(candidate) {
        Ok(LevelFilter::Off) | Err(_) => Err(LoggingError::UnknownLevel(trimmed.to_string())),
        Ok(level) => Ok(level),
    }
}

fn stderr_echo(level: LevelFilter, enabled: bool) -> Duplicate {
    if !enabled {
        return Duplicate::None;
    }
    match level {
        LevelFilter::Trace => Duplicate::Trace,
        LevelFilter::Debug => Duplicate::Debug,
        LevelFilter::Info => Duplicate::Info,
        LevelFilter::Warn => Duplicate::Warn,
        _ => Duplicate::Error,
    }
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string payload".to_string());
        error!(
            "event=panic module=logging status=error location={location} payload={}",
            single_line(&payload, PANIC_SUMMARY_CHARS)
        );
        previous(panic_info);
    }));
}

/// Joins lines and caps the length; panic payloads may quote captured text.
fn single_line(value: &str, max_chars: usize) -> String {
    let joined = value.replace(['\n', '\r'], " ");
    if joined.chars().count() <= max_chars {
        return joined;
    }
    let mut capped = joined.chars().take(max_chars).collect::<String>();
    capped.push_str("...");
    capped
}
