//! Logging setup: JSON lines to a rotating file plus console output.

use hostlink_core::config::LoggingConfig;
use hostlink_core::{Error, Result};
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Keeps the non-blocking file writer alive; dropping it flushes and
/// closes the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize the global subscriber: a JSON file layer with daily
/// rotation and a bounded backlog, and a console layer for interactive
/// runs. Also installs a panic hook so every panic lands in the log with
/// a backtrace before the recovery barriers handle it.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let directory = config.file.parent().unwrap_or_else(|| Path::new("."));
    let file_name = config
        .file
        .file_name()
        .ok_or_else(|| Error::ConfigInvalid(format!("invalid log file path: {}", config.file.display())))?;
    std::fs::create_dir_all(directory)?;

    let mut builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_suffix(file_name.to_string_lossy().into_owned());
    if config.max_backups > 0 {
        builder = builder.max_log_files(config.max_backups as usize);
    }
    let appender = builder
        .build(directory)
        .map_err(|e| Error::Internal(format!("failed to initialize log file: {e}")))?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .json();

    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stdout);

    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| Error::ConfigInvalid(format!("invalid log level: {e}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("failed to initialize logging: {e}")))?;

    install_panic_hook();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Log panics with a stack trace; the default hook only writes to stderr,
/// which the rotating log file never sees.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!(panic = %info, stack = %backtrace, "Panic");
        default_hook(info);
    }));
}
