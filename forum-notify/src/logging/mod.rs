//! Logging setup: console plus a daily rolling file, with local timestamps.
//!
//! The filter comes from `RUST_LOG` when set, otherwise [`DEFAULT_LOG_FILTER`].
//! Old rolled files are removed by [`cleanup_old_logs`]. Panics are routed
//! into the same log by [`install_panic_hook`].

use chrono::{Local, Utc};
use std::backtrace::Backtrace;
use std::fmt;
use std::io::Write;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{format::Writer, layer as fmt_layer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "forum_notify=info,sqlx=warn";

/// Default directory for log files.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Base name of the rolling log file. Rolled files get a `.YYYY-MM-DD` suffix.
pub const LOG_FILE_NAME: &str = "forum-notify.log";

/// Log retention period in days.
pub const LOG_RETENTION_DAYS: i64 = 7;

/// Formats timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Initialize the global subscriber.
///
/// Keep the returned guard alive for the lifetime of the process, otherwise
/// buffered file output is lost.
pub fn init_logging(log_dir: &str) -> crate::Result<WorkerGuard> {
    let log_path = PathBuf::from(log_dir);
    std::fs::create_dir_all(&log_path)?;

    let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt_layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(guard)
}

/// Path of today's rolled log file, as named by `tracing_appender::rolling::daily`.
fn todays_log_file(log_dir: &Path) -> PathBuf {
    log_dir.join(format!("{LOG_FILE_NAME}.{}", Local::now().format("%Y-%m-%d")))
}

/// What gets logged for a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PanicRecord {
    thread: String,
    location: String,
    message: String,
}

impl PanicRecord {
    fn from_hook(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| info.to_string());

        Self {
            thread: std::thread::current()
                .name()
                .unwrap_or("<unnamed>")
                .to_string(),
            location: info
                .location()
                .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
                .unwrap_or_else(|| "<unknown>".to_string()),
            message,
        }
    }
}

impl fmt::Display for PanicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PANIC thread={} location={} payload={}",
            self.thread, self.location, self.message
        )
    }
}

/// Install a global panic hook that reports panics through `tracing`.
///
/// The previous hook still runs afterwards. Panics inside a notification sweep
/// are caught by the scheduler but pass through here first. In `panic = "abort"`
/// builds the record is also appended straight to today's log file.
pub fn install_panic_hook(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = PanicRecord::from_hook(info);
            let backtrace = Backtrace::capture();
            tracing::error!(target: "forum_notify::panic", "{record}\n{backtrace}");

            if cfg!(panic = "abort") {
                let _ = append_to_todays_log(&log_dir, &format!("{record}\n{backtrace}"));
            }
        }));

        previous_hook(info);
    }));
}

fn append_to_todays_log(log_dir: &Path, line: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(todays_log_file(log_dir))?;
    writeln!(file, "{line}")?;
    file.flush()
}

/// Delete rolled log files older than `retention_days`.
///
/// Returns the number of files removed. Files that fail to delete are logged
/// and skipped.
pub async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();
    let prefix = format!("{LOG_FILE_NAME}.");

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
            .and_then(|n| n.strip_prefix(prefix.as_str()))
        else {
            continue;
        };

        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete old log file")
                }
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}
