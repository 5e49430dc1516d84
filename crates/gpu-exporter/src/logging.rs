//! Metrics file output.

use std::path::Path;

use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;

const DEFAULT_METRICS_PREFIX: &str = "gpu-metrics.log";
const MAX_METRICS_FILES: usize = 3;

/// Opens the daily rotated metrics file behind a non-blocking writer.
///
/// `metrics_file` may name a file or an existing directory. When the
/// appender cannot be created the metrics go to stdout instead. The returned
/// guard flushes pending lines when dropped.
pub fn metrics_writer(metrics_file: &Path) -> (NonBlocking, WorkerGuard) {
    let (rotation_dir, prefix) = rotation_target(metrics_file);

    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(MAX_METRICS_FILES)
        .build(rotation_dir)
    {
        Ok(appender) => tracing_appender::non_blocking(appender),
        Err(err) => {
            tracing::error!(
                "failed to create metrics rolling file appender at {}: {err}; falling back to stdout",
                rotation_dir.display()
            );
            tracing_appender::non_blocking(std::io::stdout())
        }
    }
}

fn rotation_target(metrics_file: &Path) -> (&Path, &str) {
    if metrics_file.is_dir() {
        return (metrics_file, DEFAULT_METRICS_PREFIX);
    }
    let parent = metrics_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = metrics_file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_METRICS_PREFIX);
    (parent, prefix)
}
