//! Logging setup with a runtime-reloadable filter.
//!
//! Events go to the console and to a daily rotated file under the log
//! directory. Files older than seven days are removed by a background task.

use chrono::{Local, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "demix_server=info,sqlx=warn,tower_http=info";

/// Prefix of the rotated log files; the appender adds `.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "demix-server.log";

const LOG_RETENTION_DAYS: i64 = 7;

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: PathBuf,
}

impl LoggingConfig {
    /// Current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the filter, e.g. with `"demix_server=debug,sqlx=warn"`.
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::validation(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Delete old log files once a day until cancelled.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let cleanup_interval = Duration::from_secs(24 * 60 * 60);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(cleanup_interval) => {
                        if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                            warn!(error = %e, "Failed to cleanup old logs");
                        }
                    }
                }
            }
        })
    }
}

/// Delete rotated log files whose date is older than `retention_days`.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = Utc::now().date_naive() - chrono::Duration::days(retention_days);
    let date_prefix = format!("{}.", LOG_FILE_PREFIX);

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(date_str) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(date_prefix.as_str()))
        else {
            continue;
        };

        let Ok(file_date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };
        if file_date < cutoff {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to delete old log file");
            } else {
                deleted_count += 1;
                debug!(path = %path.display(), "Deleted old log file");
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the lifetime of the process, or buffered
/// file output is lost.
pub fn init_logging(log_dir: &Path) -> crate::Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_path = log_dir.to_path_buf();
    fs::ensure_dir_all_sync_with_op("creating log directory", &log_path)?;

    let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    let config = Arc::new(LoggingConfig {
        handle: filter_handle,
        log_dir: log_path,
    });

    Ok((config, guard))
}

/// Targets worth tuning through the filter endpoint.
pub fn available_modules() -> Vec<(&'static str, &'static str)> {
    vec![
        ("demix_server", "Main application"),
        ("demix_server::jobs", "Admission, execution and retention"),
        ("demix_server::separation", "Demucs invocation"),
        ("demix_server::retrieval", "yt-dlp invocation"),
        ("sqlx", "Database queries"),
        ("tower_http", "HTTP middleware"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("demix_server=info"));
        assert!(DEFAULT_LOG_FILTER.contains("sqlx=warn"));
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_available_modules() {
        let modules = available_modules();
        assert!(modules.iter().any(|(name, _)| *name == "demix_server"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_log_files() {
        let dir = tempfile::tempdir().unwrap();
        let today = Utc::now().date_naive();
        let old = today - chrono::Duration::days(30);

        let old_log = dir.path().join(format!("{}.{}", LOG_FILE_PREFIX, old.format("%Y-%m-%d")));
        let new_log = dir.path().join(format!("{}.{}", LOG_FILE_PREFIX, today.format("%Y-%m-%d")));
        let unrelated = dir.path().join("notes.txt");
        for path in [&old_log, &new_log, &unrelated] {
            std::fs::write(path, b"x").unwrap();
        }

        let deleted = cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(!old_log.exists());
        assert!(new_log.exists());
        assert!(unrelated.exists());
    }
}
