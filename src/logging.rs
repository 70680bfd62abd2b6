//! Log setup: env-filtered tracing to stderr and a daily rolling file.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives
const FILTER_ENV: &str = "SHELF_SYNC_LOG";

/// Install the global subscriber. Keep the guard alive until exit so buffered
/// file output is flushed.
pub fn init(log_dir: &Path) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false);

  if let Err(e) = std::fs::create_dir_all(log_dir) {
    // No file logging; stderr still works
    let _ = tracing_subscriber::registry()
      .with(filter)
      .with(stderr_layer)
      .try_init();
    tracing::warn!(dir = %log_dir.display(), error = %e, "log directory unavailable");
    return None;
  }

  let appender = tracing_appender::rolling::daily(log_dir, "shelf-sync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(writer)
    .with_ansi(false);

  let _ = tracing_subscriber::registry()
    .with(filter)
    .with(stderr_layer)
    .with(file_layer)
    .try_init();

  Some(guard)
}
