//! Logging setup.
//!
//! Stdout carries the event stream, so every log line goes to stderr:
//! - **Production**: JSON logs to daily rolling files + compact logs to stderr
//! - **Development**: pretty logs to stderr with span events

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the fallback filter when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "PROXIMA_LOG_LEVEL";

/// Keep the non-blocking writers alive for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDERR_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Build the filter from `RUST_LOG`, then `PROXIMA_LOG_LEVEL`, then `info`.
fn env_filter() -> anyhow::Result<EnvFilter> {
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&level))?)
}

/// Initialize logging.
///
/// In production, logs also go to `<log_dir>/proxima.<date>` as JSON. The
/// directory defaults to [`log_directory`].
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed or the log directory
/// cannot be created.
pub fn init(is_production: bool, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = env_filter()?;

    if is_production {
        let dir = log_dir.map_or_else(log_directory, Path::to_path_buf);
        init_production(env_filter, &dir)?;
    } else {
        init_development(env_filter);
    }

    Ok(())
}

fn init_production(env_filter: EnvFilter, log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "proxima");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stderr)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDERR_GUARD.set(stderr_guard);

    Ok(())
}

fn init_development(env_filter: EnvFilter) {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}

/// Platform log directory.
#[must_use]
pub fn log_directory() -> PathBuf {
    directories::ProjectDirs::from("", "", "proxima")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_valid_path() {
        let dir = log_directory();
        assert!(!dir.as_os_str().is_empty());
        assert!(dir.ends_with("logs"));
    }

    #[test]
    fn test_filter_falls_back_to_info() {
        // Neither variable is set under `cargo test` unless the caller sets it.
        if std::env::var_os("RUST_LOG").is_none() && std::env::var_os(LOG_LEVEL_ENV).is_none() {
            let filter = env_filter().unwrap();
            assert_eq!(filter.to_string(), "info");
        }
    }
}
