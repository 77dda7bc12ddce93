//! Structured observability for the bridge.
//!
//! Layered `tracing` subscriber:
//! - **stderr** output for interactive use (respects `RUST_LOG`).
//! - **file appender** writing JSON lines under `~/.minibridge/logs` with
//!   daily rotation and bounded retention.
//!
//! Stored secure-storage *values* are never logged anywhere; dispatch and
//! storage events carry key counts and byte sizes only.

use std::path::PathBuf;

use tracing::Span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Log directory under the user's home.
const LOG_DIR_RELATIVE: &str = ".minibridge/logs";

/// Log file prefix.
const LOG_FILE_PREFIX: &str = "minibridge";

/// Maximum number of daily log files to retain.
const MAX_LOG_FILES: usize = 7;

/// Initialize the global tracing subscriber with stderr + file layers.
///
/// Call this **once** early in the host's startup. Panics if called twice.
pub fn init_logging() {
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let file_layer = make_file_layer();

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(LOG_DIR_RELATIVE))
}

fn make_file_layer<S>() -> Option<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let dir = log_dir()?;
    let _ = std::fs::create_dir_all(&dir);

    let file_appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the process lifetime.
    std::mem::forget(guard);

    let layer = fmt::layer()
        .json()
        .with_target(true)
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    Some(layer.boxed())
}

/// Remove rotated log files beyond the [`MAX_LOG_FILES`] newest.
///
/// Called opportunistically at startup. Errors are silently ignored.
pub fn prune_old_logs() {
    let Some(dir) = log_dir() else { return };
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return;
    };

    let mut log_files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX))
        })
        .collect();

    // Daily rotation file names sort chronologically.
    log_files.sort();

    if log_files.len() > MAX_LOG_FILES {
        let to_remove = log_files.len() - MAX_LOG_FILES;
        for path in &log_files[..to_remove] {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Top-level span correlating all work within one bridge session.
pub fn session_span(session_id: &str, app_id: &str) -> Span {
    tracing::info_span!(
        "bridge_session",
        session_id = session_id,
        app_id = app_id,
    )
}

/// Span scoping one correlated request through parse, route, and response.
pub fn request_span(callback_id: &str) -> Span {
    tracing::info_span!("bridge_request", callback_id = callback_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_spans_are_usable_without_a_subscriber() {
        // Hosts may build spans before init_logging runs; entering a
        // disabled span must be a no-op, not a panic.
        let session = session_span("sess-1", "app-1");
        let _session_guard = session.enter();
        let request = request_span("cb-1");
        let _request_guard = request.enter();
    }
}
