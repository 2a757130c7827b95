//! Logging helpers.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "qore_proxy=info";
const LOG_FILE_PREFIX: &str = "qore-proxy.log";

/// How [`init_tracing`] sets up the global subscriber
#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// Filter directives used when `RUST_LOG` is not set
    pub default_filter: String,
    /// JSON lines instead of human readable output
    pub json: bool,
    /// Write to a daily rolling file in this directory instead of stderr
    pub log_dir: Option<PathBuf>,
    /// Rolling files older than this are removed at startup
    pub retention_days: Option<u64>,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_FILTER.to_string(),
            json: false,
            log_dir: None,
            retention_days: Some(14),
        }
    }
}

/// Installs the global tracing subscriber
///
/// Returns false if a subscriber was already installed.
pub fn init_tracing(options: TracingOptions) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));

    let (writer, ansi) = match &options.log_dir {
        Some(dir) => {
            let _ = fs::create_dir_all(dir);
            if let Some(days) = options.retention_days {
                if let Err(e) = cleanup_old_logs(dir, days) {
                    eprintln!("Failed to clean up old logs: {}", e);
                }
            }
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            (BoxMakeWriter::new(appender), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_ansi(ansi);

    let installed = if options.json {
        builder
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .try_init()
            .is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::info!(
            json = options.json,
            log_dir = ?options.log_dir,
            "Tracing initialized"
        );
    }
    installed
}

fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let retention = Duration::from_secs(retention_days * 24 * 60 * 60);
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(LOG_FILE_PREFIX))
            .unwrap_or(false);
        if !is_log {
            continue;
        }

        let age = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if matches!(age, Some(age) if age > retention) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("Failed to remove old log file {:?}: {}", path, e),
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_keeps_fresh_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(format!("{}.2026-01-01", LOG_FILE_PREFIX)), "x").unwrap();
        fs::write(dir.path().join("other.txt"), "y").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 1).unwrap(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_cleanup_removes_expired_logs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(format!("{}.2026-01-01", LOG_FILE_PREFIX)), "x").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cleanup_old_logs(dir.path(), 0).unwrap(), 1);
    }

    #[test]
    fn test_default_options() {
        let options = TracingOptions::default();
        assert_eq!(options.default_filter, "qore_proxy=info");
        assert!(options.log_dir.is_none());
        assert!(!options.json);
    }
}
