//! Subscriber setup: stdout plus a daily rolling file in the work directory.

use camino::Utf8Path;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "pacmerge";
const LOG_RETENTION_DAYS: u64 = 7;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the built-in filter. The returned guard must be held
/// until exit so buffered file output is flushed.
pub fn init_logging(log_dir: Option<&Utf8Path>, verbose: bool) -> Option<WorkerGuard> {
    let default_filter = if verbose {
        "pacmerge=debug,pac_merge=debug"
    } else {
        "pacmerge=info,pac_merge=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    let (file_guard, file_layer) = match log_dir {
        Some(log_dir) => {
            let appender = std::fs::create_dir_all(log_dir.as_std_path())
                .map_err(|e| e.to_string())
                .and_then(|_| {
                    rolling::RollingFileAppender::builder()
                        .rotation(rolling::Rotation::DAILY)
                        .filename_prefix(LOG_FILE_PREFIX)
                        .filename_suffix("log")
                        .build(log_dir.as_std_path())
                        .map_err(|e| e.to_string())
                });
            match appender {
                Ok(file_appender) => {
                    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                    let layer = tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false);
                    (Some(guard), Some(layer))
                }
                Err(e) => {
                    eprintln!("Failed to set up log directory {}: {}", log_dir, e);
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);
    if let Some(layer) = file_layer {
        registry.with(layer).init();
    } else {
        registry.init();
    }

    if let Some(log_dir) = log_dir {
        cleanup_old_logs(log_dir, LOG_RETENTION_DAYS);
    }

    file_guard
}

/// Delete log files older than `max_age_days` from the log directory.
pub fn cleanup_old_logs(log_dir: &Utf8Path, max_age_days: u64) -> usize {
    let max_age = std::time::Duration::from_secs(max_age_days * 24 * 60 * 60);

    let entries = match std::fs::read_dir(log_dir.as_std_path()) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("Failed to read log directory for cleanup: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };

        // Only dated log files (e.g. "pacmerge.2026-02-17.log")
        if !file_name.starts_with("pacmerge.") || !file_name.ends_with(".log") {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => continue,
        };

        let age = match std::time::SystemTime::now().duration_since(modified) {
            Ok(d) => d,
            Err(_) => continue,
        };

        if age > max_age {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("Failed to delete old log file {}: {}", path.display(), e);
            } else {
                tracing::debug!("Deleted old log file: {}", path.display());
                removed += 1;
            }
        }
    }
    removed
}
