//! Scheduled maintenance tasks.
//!
//! A plain task table maps each janitor task to its configured interval;
//! tasks with a non-positive interval never run. Every enabled task loops
//! on its own timer until the shared cancellation token fires.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;

/// One janitor task: name, interval seconds, and the work itself.
struct ScheduledTask {
    name: &'static str,
    interval_secs: i64,
    task: fn(&TaskContext) -> Result<usize>,
}

/// Inputs shared by all janitor tasks.
#[derive(Clone)]
struct TaskContext {
    base_path: PathBuf,
    upload_path: PathBuf,
    upload_timeout: Duration,
}

/// Spawn every enabled janitor task. Returns the token that stops them.
pub fn spawn_janitor(
    config: &Config,
    base_path: PathBuf,
    upload_path: PathBuf,
) -> CancellationToken {
    let cancel = CancellationToken::new();
    let context = TaskContext {
        base_path,
        upload_path,
        upload_timeout: Duration::from_secs(config.file.upload_timeout),
    };

    let tasks = [
        ScheduledTask {
            name: "clean_outdated_files",
            interval_secs: config.cron.clean_outdated_file,
            task: clean_outdated_files,
        },
        ScheduledTask {
            name: "delete_empty_folders",
            interval_secs: config.cron.delete_empty_folder,
            task: delete_empty_folders,
        },
    ];

    for task in tasks {
        if task.interval_secs <= 0 {
            info!(task = task.name, "janitor task disabled");
            continue;
        }
        info!(
            task = task.name,
            interval_secs = task.interval_secs,
            "janitor task scheduled"
        );

        let context = context.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(task.interval_secs as u64));
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(task = task.name, "janitor task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let run_context = context.clone();
                        let run = task.task;
                        let result =
                            tokio::task::spawn_blocking(move || run(&run_context)).await;
                        match result {
                            Ok(Ok(count)) if count > 0 => {
                                info!(task = task.name, removed = count, "janitor task ran");
                            }
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => warn!(task = task.name, error = %e, "janitor task failed"),
                            Err(e) => warn!(task = task.name, error = %e, "janitor task panicked"),
                        }
                    }
                }
            }
        });
    }

    cancel
}

/// Remove staging files whose last write is older than the upload timeout.
fn clean_outdated_files(context: &TaskContext) -> Result<usize> {
    let mut removed = 0;
    let mut files = Vec::new();
    collect_files(&context.upload_path, &mut files)?;

    for path in files {
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .unwrap_or_default();
        if age > context.upload_timeout {
            debug!(path = %path.display(), "removing outdated staging file");
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

/// Remove empty directories under the base path, deepest first. The base
/// path itself always survives.
fn delete_empty_folders(context: &TaskContext) -> Result<usize> {
    let mut dirs = Vec::new();
    collect_dirs(&context.base_path, &mut dirs)?;

    let mut removed = 0;
    for dir in dirs.iter().rev() {
        if *dir == context.base_path {
            continue;
        }
        let is_empty = std::fs::read_dir(dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            debug!(path = %dir.display(), "removing empty folder");
            if std::fs::remove_dir(dir).is_ok() {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

/// Collect every file under `root`, recursively.
fn collect_files(root: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// Collect every directory under `root` in pre-order, `root` included.
fn collect_dirs(root: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    out.push(root.to_path_buf());
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            collect_dirs(&entry.path(), out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn context(dir: &Path, timeout: Duration) -> TaskContext {
        TaskContext {
            base_path: dir.join("data"),
            upload_path: dir.join("upload"),
            upload_timeout: timeout,
        }
    }

    #[test]
    fn outdated_staging_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path(), Duration::ZERO);
        std::fs::create_dir_all(&context.upload_path).unwrap();

        let stale = context.upload_path.join("stale");
        std::fs::write(&stale, b"old").unwrap();
        // mtime == now, age > ZERO once the clock ticks
        std::thread::sleep(Duration::from_millis(20));

        let removed = clean_outdated_files(&context).unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
    }

    #[test]
    fn fresh_staging_files_survive() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path(), Duration::from_secs(3600));
        std::fs::create_dir_all(&context.upload_path).unwrap();

        let fresh = context.upload_path.join("fresh");
        std::fs::write(&fresh, b"new").unwrap();

        assert_eq!(clean_outdated_files(&context).unwrap(), 0);
        assert!(fresh.exists());
    }

    #[test]
    fn empty_folder_chains_collapse_but_base_survives() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path(), Duration::ZERO);

        let deep = context.base_path.join("aa/bb/cc");
        std::fs::create_dir_all(&deep).unwrap();
        let occupied = context.base_path.join("dd");
        std::fs::create_dir_all(&occupied).unwrap();
        std::fs::write(occupied.join(".file"), b"content").unwrap();

        let removed = delete_empty_folders(&context).unwrap();
        assert_eq!(removed, 3);
        assert!(context.base_path.exists());
        assert!(!context.base_path.join("aa").exists());
        assert!(occupied.exists());
    }

    #[test]
    fn missing_roots_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path(), Duration::ZERO);
        assert_eq!(clean_outdated_files(&context).unwrap(), 0);
        assert_eq!(delete_empty_folders(&context).unwrap(), 0);
    }
}
