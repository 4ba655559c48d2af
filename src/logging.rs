//! Tracing configuration and log routing.
//!
//! Events go to stdout through a compact formatter and to a log file through a non-blocking
//! writer. `RESILIENCE_LOG_FILE` selects the file; without it, `logs/rusty-resilience.log`
//! is used. The error log mirrors its entries into these same subscribers.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable overriding the log file location.
pub const LOG_FILE_VAR: &str = "RESILIENCE_LOG_FILE";

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_NAME: &str = "rusty-resilience.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// Respects `RUST_LOG` (default `info`). Returns `false` if a subscriber was already
/// installed, which leaves the existing one in place.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let installed = match configure_file_writer() {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).try_init()
        }
        None => registry.try_init(),
    };
    installed.is_ok()
}

/// Where file logs go for the given override.
pub fn log_file_path(override_path: Option<&str>) -> PathBuf {
    match override_path.map(str::trim).filter(|path| !path.is_empty()) {
        Some(path) => PathBuf::from(path),
        None => Path::new(DEFAULT_LOG_DIR).join(DEFAULT_LOG_NAME),
    }
}

/// Build the non-blocking file writer.
///
/// Returns `None` when the directory cannot be created or the file cannot be opened; stdout
/// logging still works in that case.
fn configure_file_writer() -> Option<NonBlocking> {
    let path = log_file_path(std::env::var(LOG_FILE_VAR).ok().as_deref());
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty())
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {err}", parent.display());
        return None;
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}
