// Logging module
// Console + optional rolling file output on top of the tracing ecosystem.
//
// The library crates only emit events through the `tracing` macros; binaries
// call `initialize_logging` once at startup to install the subscriber stack:
// - EnvFilter (RUST_LOG wins over the configured level)
// - ANSI console layer
// - daily rolling file layer when a log directory is configured

use std::path::Path;

use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// File name prefix used by the rolling appender.
const LOG_FILE_NAME: &str = "tacmap.log";

/// Map the numeric verbosity used on the command line to a filter directive.
/// 0=Minimum, 1=Error, 2=Detail, 3=Full/Debug, 4=Trace
pub fn map_log_level(level: i32) -> &'static str {
    match level {
        i32::MIN..=0 => "warn",
        1 => "error",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system
pub fn initialize_logging(log_dir: Option<&str>, log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console = fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false);

    if let Some(dir) = log_dir {
        let path = Path::new(dir);
        if !path.exists() {
            let _ = std::fs::create_dir_all(path);
        }

        let file_appender = rolling::daily(dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // The guard flushes on drop; it has to live for the whole process.
        std::mem::forget(guard);

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            )
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .try_init();
    }
}
