use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_BASENAME: &str = "abrcast.log";
const LOG_DIR_ENV: &str = "ABRCAST_LOG_PATH";
const LOG_RETENTION_DAYS: u64 = 7;

/// Get the log directory path
pub fn get_log_dir() -> Result<PathBuf> {
    resolve_log_dir()
}

/// Install stderr and daily-rolling file logging.
///
/// Keep the returned guard alive for the whole process or buffered file
/// output is lost.
pub fn init_logging() -> Result<WorkerGuard> {
    let log_dir = resolve_log_dir()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;

    let pruned = prune_old_logs(
        &log_dir,
        Duration::from_secs(60 * 60 * 24 * LOG_RETENTION_DAYS),
    );

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_BASENAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if pruned > 0 {
        debug!("Pruned {} old log file(s) from {:?}", pruned, log_dir);
    }
    Ok(guard)
}

fn resolve_log_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(LOG_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }

    let proj_dirs = ProjectDirs::from("dev", "abrcast", "client")
        .context("Failed to determine project directories for log path")?;

    let base = proj_dirs
        .state_dir()
        .unwrap_or_else(|| proj_dirs.data_local_dir());
    Ok(base.join("logs"))
}

/// Delete rotated log files last modified before `now - max_age`.
///
/// Returns how many files were removed. Files not named after our log are
/// never touched.
fn prune_old_logs(log_dir: &Path, max_age: Duration) -> usize {
    let (Ok(entries), Some(cutoff)) = (
        std::fs::read_dir(log_dir),
        SystemTime::now().checked_sub(max_age),
    ) else {
        return 0;
    };

    entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_BASENAME))
        })
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let stale = metadata.is_file() && metadata.modified().ok()? < cutoff;
            stale.then(|| entry.path())
        })
        .filter(|path| match std::fs::remove_file(path) {
            Ok(()) => true,
            Err(e) => {
                debug!("Could not remove old log {:?}: {}", path, e);
                false
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_recent_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let recent = dir.path().join("abrcast.log.2026-10-19");
        let foreign = dir.path().join("other.log");
        std::fs::write(&recent, "recent").unwrap();
        std::fs::write(&foreign, "foreign").unwrap();

        assert_eq!(prune_old_logs(dir.path(), Duration::from_secs(60)), 0);
        assert!(recent.exists());
        assert!(foreign.exists());

        // Older than a 1ms retention window
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(prune_old_logs(dir.path(), Duration::from_millis(1)), 1);
        assert!(!recent.exists());
        assert!(foreign.exists());
    }
}
