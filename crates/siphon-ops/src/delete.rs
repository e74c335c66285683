//! Remote file deletion with empty-directory pruning.

use std::collections::BTreeSet;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use siphon_core::remote::{normalize_remote_root, remote_depth, remote_parent};
use siphon_core::{
    Connector, DeletionOutcome, EVENT_CHANNEL_SIZE, EventSink, ItemError, RemoteFs, StageEvent,
    percent,
};

use crate::STATUS_INTERVAL;

/// Event type of a deletion.
pub type DeletionEvent = StageEvent<DeletionOutcome>;

/// Files to remove from the device.
#[derive(Debug, Clone, Default)]
pub struct DeletionRequest {
    /// Absolute remote paths, deleted in this order.
    pub files: Vec<String>,
    /// Configured remote root. Never removed; directories between it and the
    /// deleted files are pruned when they end up empty.
    pub remote_root: Option<String>,
}

impl DeletionRequest {
    /// Delete `files`, protecting `remote_root`.
    pub fn new(files: Vec<String>, remote_root: Option<String>) -> Self {
        Self { files, remote_root }
    }
}

/// Delete each file, then prune directories left empty, deepest first.
///
/// Per-file failures are logged and counted. Pruning only starts when at
/// least one file was deleted and the batch was not cancelled; once started
/// it runs to completion.
pub fn delete_remote_files(
    fs: &dyn RemoteFs,
    request: &DeletionRequest,
    cancel: &CancellationToken,
    sink: &dyn EventSink,
) -> DeletionOutcome {
    let total = request.files.len();
    let mut outcome = DeletionOutcome {
        files_total: total,
        ..Default::default()
    };
    let mut attempted = Vec::with_capacity(total);

    sink.status(format!("Deleting {total} files..."));

    for (i, path) in request.files.iter().enumerate() {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            sink.status("Deletion stopped by user.".to_string());
            break;
        }

        attempted.push(path.clone());
        match fs.remove_file(path) {
            Ok(()) => outcome.files_deleted += 1,
            Err(err) => {
                warn!(path = %path, error = %err, "failed to delete remote file");
                sink.status(format!("Error deleting {path}: {err}"));
                outcome.errors.push(ItemError::from(&err));
            }
        }

        let done = i + 1;
        sink.progress(percent(done, total));
        if done % STATUS_INTERVAL == 0 || done == total {
            sink.status(format!("Deleted {}/{total} files", outcome.files_deleted));
        }
    }

    if outcome.files_deleted > 0 && !outcome.cancelled {
        sink.status("Cleaning up empty directories...".to_string());
        let candidates = cleanup_candidates(&attempted, request.remote_root.as_deref());
        outcome.directories_removed = prune_empty_dirs(fs, &candidates);
        if outcome.directories_removed > 0 {
            sink.status(format!(
                "Removed {} empty directories",
                outcome.directories_removed
            ));
        }
    }

    info!(
        deleted = outcome.files_deleted,
        failed = outcome.errors.len(),
        dirs_removed = outcome.directories_removed,
        cancelled = outcome.cancelled,
        "remote deletion finished"
    );
    outcome
}

/// Directories that may have become empty, deepest first.
///
/// With a root, every ancestor strictly below it is a candidate. Without one,
/// or for files outside it, only the immediate parent is. `/` and the root
/// itself never are.
pub(crate) fn cleanup_candidates(attempted: &[String], remote_root: Option<&str>) -> Vec<String> {
    let root = remote_root.map(normalize_remote_root);
    let mut dirs = BTreeSet::new();

    for path in attempted {
        let mut current = remote_parent(path);
        while let Some(dir) = current {
            if dir == "/" || root.as_deref() == Some(dir) {
                break;
            }
            dirs.insert(dir.to_string());

            let inside_root = root
                .as_deref()
                .is_some_and(|r| dir.starts_with(&format!("{r}/")));
            if !inside_root {
                break;
            }
            current = remote_parent(dir);
        }
    }

    let mut dirs: Vec<String> = dirs.into_iter().collect();
    dirs.sort_by(|a, b| remote_depth(b).cmp(&remote_depth(a)).then_with(|| a.cmp(b)));
    dirs
}

/// Remove each directory that lists as empty. Every failure is swallowed.
fn prune_empty_dirs(fs: &dyn RemoteFs, candidates: &[String]) -> usize {
    let mut removed = 0;
    for dir in candidates {
        match fs.read_dir(dir) {
            Ok(entries) if entries.is_empty() => match fs.remove_dir(dir) {
                Ok(()) => {
                    debug!(dir = %dir, "removed empty remote directory");
                    removed += 1;
                }
                Err(err) => debug!(dir = %dir, error = %err, "could not remove directory"),
            },
            Ok(_) => debug!(dir = %dir, "directory not empty, keeping"),
            Err(err) => debug!(dir = %dir, error = %err, "could not list directory"),
        }
    }
    removed
}

/// Open a session and delete an explicit file list.
pub fn run_deletion<C: Connector>(
    connector: &C,
    request: &DeletionRequest,
    cancel: &CancellationToken,
    sink: &dyn EventSink,
) -> DeletionOutcome {
    sink.status(format!("Connecting to {}...", connector.endpoint()));
    let session = match connector.connect() {
        Ok(session) => session,
        Err(err) => {
            warn!(endpoint = %connector.endpoint(), error = %err, "deletion could not connect");
            sink.status(format!("Error: {err}"));
            return DeletionOutcome::failed(request.files.len(), err.to_string());
        }
    };

    let outcome = delete_remote_files(&session, request, cancel, sink);
    drop(session);

    sink.status(outcome.summary_message());
    outcome
}

/// Start a background deletion.
///
/// Returns a receiver for progress updates and the final outcome.
pub fn start_deletion<C: Connector>(
    connector: C,
    request: DeletionRequest,
    cancel: CancellationToken,
) -> mpsc::Receiver<DeletionEvent> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

    tokio::task::spawn_blocking(move || {
        let outcome = run_deletion(&connector, &request, &cancel, &tx);
        let _ = tx.blocking_send(StageEvent::Complete(outcome));
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_candidates_deepest_first() {
        let attempted = paths(&["/data/a/b/c/f1", "/data/a/f2", "/data/a/b/f3"]);
        let dirs = cleanup_candidates(&attempted, Some("/data/"));
        assert_eq!(dirs, paths(&["/data/a/b/c", "/data/a/b", "/data/a"]));
    }

    #[test]
    fn test_candidates_exclude_root() {
        let attempted = paths(&["/data/f1", "/data/x/f2"]);
        let dirs = cleanup_candidates(&attempted, Some("/data"));
        assert_eq!(dirs, paths(&["/data/x"]));
    }

    #[test]
    fn test_candidates_without_root_use_parents_only() {
        let attempted = paths(&["/data/a/b/f1", "/f2"]);
        let dirs = cleanup_candidates(&attempted, None);
        assert_eq!(dirs, paths(&["/data/a/b"]));
    }

    #[test]
    fn test_candidates_outside_root_use_parent_only() {
        let attempted = paths(&["/other/a/f1"]);
        let dirs = cleanup_candidates(&attempted, Some("/data"));
        assert_eq!(dirs, paths(&["/other/a"]));
    }

    #[test]
    fn test_root_prefix_is_not_inside_root() {
        let attempted = paths(&["/data2/a/f1"]);
        let dirs = cleanup_candidates(&attempted, Some("/data"));
        assert_eq!(dirs, paths(&["/data2/a"]));
    }
}
