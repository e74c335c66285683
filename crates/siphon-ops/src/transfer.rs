//! Selection-driven download from the device to the local mirror.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use siphon_analyze::TreeAnalyzer;
use siphon_core::remote::{join_remote, local_path_for, normalize_remote_root};
use siphon_core::{
    Connector, EVENT_CHANNEL_SIZE, EventSink, ItemError, RemoteFile, RemoteFs, ScanId,
    StageEvent, StatusOnly, SyncError, SyncSelection, TransferOutcome, percent,
};

use crate::STATUS_INTERVAL;
use crate::delete::{DeletionRequest, delete_remote_files};

/// Event type of a transfer.
pub type TransferEvent = StageEvent<TransferOutcome>;

/// What to copy and where.
///
/// A selection is checked against `remote_root` and, when `latest_scan` is
/// set, against that scan. Without `latest_scan` a selection taken from an
/// older scan of the same directory is accepted; callers holding the newest
/// [`siphon_core::TreeReport`] should set it or call `TreeReport::validate`.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Directory on the device.
    pub remote_root: String,
    /// Local mirror; created if missing.
    pub local_root: PathBuf,
    /// Files to copy. `None` lists the remote root and copies everything.
    pub selection: Option<SyncSelection>,
    /// Most recent scan of `remote_root`; older selections are rejected.
    pub latest_scan: Option<ScanId>,
    /// Remove successfully copied files from the device afterwards.
    pub delete_after_success: bool,
}

impl TransferRequest {
    /// Copy a previewed selection.
    pub fn with_selection(
        remote_root: impl Into<String>,
        local_root: impl Into<PathBuf>,
        selection: SyncSelection,
    ) -> Self {
        Self {
            remote_root: remote_root.into(),
            local_root: local_root.into(),
            selection: Some(selection),
            latest_scan: None,
            delete_after_success: false,
        }
    }

    /// Copy everything under `remote_root` without a preview.
    pub fn full_listing(remote_root: impl Into<String>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            remote_root: remote_root.into(),
            local_root: local_root.into(),
            selection: None,
            latest_scan: None,
            delete_after_success: false,
        }
    }

    /// Only accept a selection taken from `scan`.
    pub fn latest_scan(mut self, scan: ScanId) -> Self {
        self.latest_scan = Some(scan);
        self
    }

    /// Set whether copied files are deleted from the device.
    pub fn delete_after_success(mut self, delete: bool) -> Self {
        self.delete_after_success = delete;
        self
    }
}

/// How a single file was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileAction {
    Copied(u64),
    Skipped,
}

/// Run a transfer on the calling thread.
///
/// Only connection-level problems and an unusable local mirror fail the
/// transfer outright. Per-file errors are recorded and the batch goes on.
pub fn run_transfer<C: Connector>(
    connector: &C,
    request: &TransferRequest,
    cancel: &CancellationToken,
    sink: &dyn EventSink,
) -> TransferOutcome {
    let started = Instant::now();
    let mut outcome = transfer_inner(connector, request, cancel, sink);
    outcome.duration = started.elapsed();

    if let Some(ref error) = outcome.error {
        warn!(endpoint = %connector.endpoint(), error = %error, "transfer failed");
        sink.status(outcome.summary_message());
    } else if outcome.cancelled {
        sink.status(outcome.summary_message());
    } else {
        sink.progress(100);
        sink.status(format!("Transfer complete! {}", outcome.summary_message()));
    }

    info!(
        endpoint = %connector.endpoint(),
        copied = outcome.files_copied,
        skipped = outcome.files_skipped,
        failed = outcome.errors.len(),
        bytes = outcome.bytes_copied,
        cancelled = outcome.cancelled,
        "transfer finished"
    );
    outcome
}

fn transfer_inner<C: Connector>(
    connector: &C,
    request: &TransferRequest,
    cancel: &CancellationToken,
    sink: &dyn EventSink,
) -> TransferOutcome {
    let remote_root = normalize_remote_root(&request.remote_root);
    if let Some(ref selection) = request.selection {
        if let Err(err) = check_selection(selection, &remote_root, request.latest_scan) {
            return TransferOutcome::failed(err.to_string());
        }
    }

    sink.status(format!("Connecting to {}...", connector.endpoint()));
    let session = match connector.connect() {
        Ok(session) => session,
        Err(err) => return TransferOutcome::failed(err.to_string()),
    };

    let mut skipped_entries = Vec::new();
    let files = match request.selection {
        Some(ref selection) => selection.files().to_vec(),
        None => {
            sink.status("Listing remote files...".to_string());
            let report = match TreeAnalyzer::without_local_diff(&remote_root).analyze(
                &session,
                cancel,
                &StatusOnly(sink),
            ) {
                Ok(report) => report,
                Err(err) => return TransferOutcome::failed(err.to_string()),
            };
            if report.cancelled {
                return TransferOutcome {
                    cancelled: true,
                    ..Default::default()
                };
            }
            if report.files.is_empty() {
                return TransferOutcome::failed("No files found in remote directory");
            }
            skipped_entries = report.warnings;
            report.files
        }
    };

    if let Err(err) = fs::create_dir_all(&request.local_root) {
        let err = SyncError::io(&request.local_root, err);
        return TransferOutcome::failed(format!("Cannot create local directory: {err}"));
    }

    let mut outcome = copy_files(&session, &files, &request.local_root, cancel, sink);
    if !skipped_entries.is_empty() {
        skipped_entries.append(&mut outcome.errors);
        outcome.errors = skipped_entries;
    }

    if request.delete_after_success
        && !outcome.cancelled
        && !outcome.successful_remote_paths.is_empty()
    {
        sink.status(format!(
            "Deleting {} transferred files from the device...",
            outcome.successful_remote_paths.len()
        ));
        let deletion = DeletionRequest::new(
            outcome.successful_remote_paths.clone(),
            Some(remote_root.clone()),
        );
        let deletion = delete_remote_files(&session, &deletion, cancel, &StatusOnly(sink));
        outcome.cancelled = deletion.cancelled;
        outcome.deletion = Some(deletion);
    }

    outcome
}

/// A selection must come from a scan of the same root, and of `latest_scan`
/// when given, and keep the `root + "/" + relative` path shape.
fn check_selection(
    selection: &SyncSelection,
    remote_root: &str,
    latest_scan: Option<ScanId>,
) -> Result<(), SyncError> {
    if let Some(latest) = latest_scan {
        if selection.scan_id() != latest {
            return Err(SyncError::StaleSelection {
                message: format!(
                    "selection is from scan {}, the latest scan is {}",
                    selection.scan_id().0,
                    latest.0
                ),
            });
        }
    }
    if selection.remote_root() != remote_root {
        return Err(SyncError::StaleSelection {
            message: format!(
                "selection was made under {:?}, not {:?}",
                selection.remote_root(),
                remote_root
            ),
        });
    }
    if let Some(file) = selection
        .files()
        .iter()
        .find(|f| f.remote_path != join_remote(remote_root, &f.relative_path))
    {
        return Err(SyncError::StaleSelection {
            message: format!("{} does not belong to {remote_root}", file.remote_path),
        });
    }
    Ok(())
}

/// Copy files in order, checking for cancellation before each one.
fn copy_files(
    remote: &dyn RemoteFs,
    files: &[RemoteFile],
    local_root: &Path,
    cancel: &CancellationToken,
    sink: &dyn EventSink,
) -> TransferOutcome {
    let total = files.len();
    let mut outcome = TransferOutcome {
        files_total: total,
        ..Default::default()
    };

    if total == 0 {
        sink.status("Nothing to transfer".to_string());
        return outcome;
    }

    sink.status(format!("Transferring {total} files..."));

    for file in files {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            sink.status("Transfer stopped by user.".to_string());
            break;
        }

        match transfer_one(remote, file, local_root) {
            Ok(FileAction::Copied(bytes)) => {
                outcome.files_copied += 1;
                outcome.bytes_copied += bytes;
                outcome.successful_remote_paths.push(file.remote_path.clone());
            }
            Ok(FileAction::Skipped) => {
                debug!(path = %file.remote_path, "already present locally, skipping");
                outcome.files_skipped += 1;
            }
            Err(err) => {
                warn!(path = %file.remote_path, error = %err, "failed to transfer file");
                sink.status(format!("Error transferring {}: {err}", file.relative_path));
                outcome
                    .errors
                    .push(ItemError::new(file.remote_path.clone(), err.to_string()));
            }
        }

        outcome.files_processed += 1;
        let done = outcome.files_processed;
        sink.progress(percent(done, total));
        if done % STATUS_INTERVAL == 0 || done == total {
            sink.status(format!(
                "Processed {done}/{total} files ({} copied)",
                outcome.files_copied
            ));
        }
    }

    outcome
}

/// Copy one file unless a same-sized local copy exists.
fn transfer_one(
    remote: &dyn RemoteFs,
    file: &RemoteFile,
    local_root: &Path,
) -> Result<FileAction, SyncError> {
    let local_path = local_path_for(local_root, &file.relative_path)?;
    let parent = local_path.parent().unwrap_or(local_root);
    fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;

    let local_len = fs::metadata(&local_path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len());
    if let Some(local_len) = local_len {
        if local_len == remote.file_size(&file.remote_path)? {
            return Ok(FileAction::Skipped);
        }
    }

    let bytes = download_atomic(remote, &file.remote_path, &local_path)?;
    Ok(FileAction::Copied(bytes))
}

/// Download into a hidden sibling and rename into place on success.
///
/// A failed download never leaves anything at `local_path`.
fn download_atomic(
    remote: &dyn RemoteFs,
    remote_path: &str,
    local_path: &Path,
) -> Result<u64, SyncError> {
    let part_path = part_path_for(local_path);

    let result = download_to(remote, remote_path, &part_path).and_then(|bytes| {
        fs::rename(&part_path, local_path).map_err(|e| SyncError::io(local_path, e))?;
        Ok(bytes)
    });

    if result.is_err() {
        let _ = fs::remove_file(&part_path);
    }
    result
}

fn download_to(remote: &dyn RemoteFs, remote_path: &str, path: &Path) -> Result<u64, SyncError> {
    let file = File::create(path).map_err(|e| SyncError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let bytes = remote.download(remote_path, &mut writer)?;
    writer.flush().map_err(|e| SyncError::io(path, e))?;
    Ok(bytes)
}

fn part_path_for(local_path: &Path) -> PathBuf {
    let name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    local_path.with_file_name(format!(".{name}.part"))
}

/// Start a background transfer.
///
/// Returns a receiver for progress updates and the final outcome.
pub fn start_transfer<C: Connector>(
    connector: C,
    request: TransferRequest,
    cancel: CancellationToken,
) -> mpsc::Receiver<TransferEvent> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

    tokio::task::spawn_blocking(move || {
        let outcome = run_transfer(&connector, &request, &cancel, &tx);
        let _ = tx.blocking_send(StageEvent::Complete(outcome));
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_core::{Connector, NullSink, TreeReport};
    use siphon_test_utils::MemoryRemote;
    use tempfile::TempDir;

    #[test]
    fn test_part_path_is_hidden_sibling() {
        let path = Path::new("/mirror/day1/img.jpg");
        assert_eq!(part_path_for(path), Path::new("/mirror/day1/.img.jpg.part"));
    }

    #[test]
    fn test_transfer_one_creates_subdirectories() {
        let remote = MemoryRemote::new().with_file("/data/day1/cam/a.jpg", "abc");
        let session = remote.connect().unwrap();
        let local = TempDir::new().unwrap();
        let file = RemoteFile::new("/data", "day1/cam/a.jpg", 3, true);

        let action = transfer_one(&session, &file, local.path()).unwrap();
        assert_eq!(action, FileAction::Copied(3));
        assert_eq!(
            std::fs::read(local.path().join("day1").join("cam").join("a.jpg")).unwrap(),
            b"abc"
        );
    }

    #[test]
    fn test_transfer_one_skips_same_size() {
        let remote = MemoryRemote::new().with_file("/data/a.jpg", "abc");
        let session = remote.connect().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::write(local.path().join("a.jpg"), "xyz").unwrap();
        let file = RemoteFile::new("/data", "a.jpg", 3, true);

        assert_eq!(
            transfer_one(&session, &file, local.path()).unwrap(),
            FileAction::Skipped
        );
        assert_eq!(remote.downloads(), 0);
    }

    #[test]
    fn test_transfer_one_replaces_different_size() {
        let remote = MemoryRemote::new().with_file("/data/a.jpg", "abcdef");
        let session = remote.connect().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::write(local.path().join("a.jpg"), "abc").unwrap();
        let file = RemoteFile::new("/data", "a.jpg", 6, true);

        assert_eq!(
            transfer_one(&session, &file, local.path()).unwrap(),
            FileAction::Copied(6)
        );
        assert_eq!(std::fs::read(local.path().join("a.jpg")).unwrap(), b"abcdef");
    }

    #[test]
    fn test_selection_from_other_root_is_rejected() {
        let mut report = TreeReport::new("/other", None);
        report.files = vec![RemoteFile::new("/other", "a.jpg", 1, true)];
        let selection = report.select_all();

        assert!(matches!(
            check_selection(&selection, "/data", None),
            Err(SyncError::StaleSelection { .. })
        ));
        assert!(check_selection(&selection, "/other", None).is_ok());
        assert!(check_selection(&selection, "/other", Some(report.scan_id)).is_ok());
    }

    #[test]
    fn test_selection_from_older_scan_is_rejected() {
        let mut older = TreeReport::new("/data", None);
        older.files = vec![RemoteFile::new("/data", "a.jpg", 1, true)];
        let newer = TreeReport::new("/data", None);

        assert!(matches!(
            check_selection(&older.select_all(), "/data", Some(newer.scan_id)),
            Err(SyncError::StaleSelection { .. })
        ));
    }

    #[test]
    fn test_empty_selection_is_a_no_op() {
        let remote = MemoryRemote::new().with_file("/data/a.jpg", "a");
        let local = TempDir::new().unwrap();
        let selection = TreeReport::new("/data", None).select_new();
        let request = TransferRequest::with_selection("/data", local.path(), selection);

        let outcome = run_transfer(&remote, &request, &CancellationToken::new(), &NullSink);
        assert!(outcome.is_success());
        assert_eq!(outcome.files_total, 0);
        assert_eq!(remote.downloads(), 0);
    }
}
