//! Logging and tracing configuration
//!
//! Harness diagnostics go to stderr so they never interleave with the
//! scenario progress printed on stdout. Long runs can also keep a log file.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Keeps the file writer alive; logs are flushed when it is dropped
pub struct LogGuard {
    _file: Option<WorkerGuard>,
    pub log_file: Option<PathBuf>,
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("cats=debug,info")
        } else {
            EnvFilter::new("cats=info,warn")
        }
    })
}

/// Initialize tracing for the CLI
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG with `verbose`), WARN for
/// dependencies. With `log_file`, a copy is appended to
/// `<data dir>/logs/cats.log`.
pub fn init(verbose: bool, log_file: bool) -> LogGuard {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    if log_file {
        match paths::ensure_log_dir() {
            Ok(Some(dir)) => {
                let appender = tracing_appender::rolling::never(&dir, "cats.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);

                let file_layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true);

                tracing_subscriber::registry()
                    .with(filter(verbose))
                    .with(stderr_layer)
                    .with(file_layer)
                    .init();

                return LogGuard {
                    _file: Some(guard),
                    log_file: Some(dir.join("cats.log")),
                };
            }
            Ok(None) => eprintln!("Warning: no data directory available for log file"),
            Err(e) => eprintln!("Warning: Could not create log directory: {}", e),
        }
    }

    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(stderr_layer)
        .init();

    LogGuard {
        _file: None,
        log_file: None,
    }
}
