//! Recursive remote listing compared against a local mirror.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use siphon_core::remote::{join_remote, listing_path, local_path_for, normalize_remote_root};
use siphon_core::{EventSink, ItemError, RemoteFile, RemoteFs, SyncError, TreeReport};

/// Emit a status line every this many discovered files.
const STATUS_INTERVAL: usize = 100;

/// Directories nested deeper than this below the root are not listed.
pub const MAX_DEPTH: usize = 64;

/// Lists a remote directory tree and classifies each file as new or unchanged.
///
/// A file is unchanged when the local mirror holds a file of the same size at
/// the same relative path. Size is the only comparison made.
#[derive(Debug, Clone)]
pub struct TreeAnalyzer {
    remote_root: String,
    local_root: Option<PathBuf>,
}

impl TreeAnalyzer {
    /// Analyze `remote_root` against `local_root`.
    ///
    /// An empty local root means every file is new.
    pub fn new(remote_root: &str, local_root: Option<PathBuf>) -> Self {
        Self {
            remote_root: normalize_remote_root(remote_root),
            local_root: local_root.filter(|p| !p.as_os_str().is_empty()),
        }
    }

    /// List `remote_root` without comparing to anything local.
    pub fn without_local_diff(remote_root: &str) -> Self {
        Self::new(remote_root, None)
    }

    /// Normalized remote root.
    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// Walk the remote tree depth-first.
    ///
    /// Unreadable entries are recorded as warnings and skipped. Only a root
    /// that cannot be listed fails the analysis. Directories reached twice
    /// through symbolic links, and anything nested deeper than
    /// [`MAX_DEPTH`], are skipped with a warning.
    pub fn analyze(
        &self,
        fs: &dyn RemoteFs,
        cancel: &CancellationToken,
        sink: &dyn EventSink,
    ) -> Result<TreeReport, SyncError> {
        let root = listing_path(&self.remote_root);
        let names = fs.read_dir(root)?;

        let mut walk = Walk {
            analyzer: self,
            fs,
            cancel,
            sink,
            report: TreeReport::new(self.remote_root.clone(), self.local_root.clone()),
            visited: HashSet::new(),
        };
        walk.visited
            .insert(fs.real_path(root).unwrap_or_else(|_| root.to_string()));
        walk.dir(&self.remote_root, "", names, 0);
        let report = walk.report;

        debug!(
            root = %root,
            files = report.files.len(),
            warnings = report.warnings.len(),
            cancelled = report.cancelled,
            "remote tree analyzed"
        );
        Ok(report)
    }

    /// Whether the local mirror lacks this file or holds a different size.
    fn is_new(&self, relative_path: &str, remote_size: u64) -> bool {
        let Some(ref local_root) = self.local_root else {
            return true;
        };
        match local_path_for(local_root, relative_path) {
            Ok(local_path) => !local_matches(&local_path, remote_size),
            Err(_) => true,
        }
    }
}

/// State of one traversal.
struct Walk<'a> {
    analyzer: &'a TreeAnalyzer,
    fs: &'a dyn RemoteFs,
    cancel: &'a CancellationToken,
    sink: &'a dyn EventSink,
    report: TreeReport,
    /// Canonical paths of directories already entered.
    visited: HashSet<String>,
}

impl Walk<'_> {
    fn dir(&mut self, remote_dir: &str, relative_dir: &str, names: Vec<String>, depth: usize) {
        for name in names {
            if self.cancel.is_cancelled() {
                self.report.cancelled = true;
                return;
            }

            let remote_path = join_remote(remote_dir, &name);
            let relative_path = if relative_dir.is_empty() {
                name
            } else {
                format!("{relative_dir}/{name}")
            };

            if let Ok(children) = self.fs.read_dir(&remote_path) {
                if let Some(reason) = self.refuse_entry(&remote_path, depth + 1) {
                    warn!(path = %remote_path, reason = %reason, "skipping remote directory");
                    self.report
                        .warnings
                        .push(ItemError::new(remote_path, reason));
                    continue;
                }
                self.dir(&remote_path, &relative_path, children, depth + 1);
                if self.report.cancelled {
                    return;
                }
                continue;
            }

            match self.fs.file_size(&remote_path) {
                Ok(size) => self.add_file(relative_path, size),
                Err(err) => {
                    warn!(path = %remote_path, error = %err, "skipping unreadable remote entry");
                    self.report
                        .warnings
                        .push(ItemError::new(remote_path, err.to_string()));
                }
            }
        }
    }

    /// Why a listable directory must not be entered, if it must not.
    fn refuse_entry(&mut self, remote_path: &str, depth: usize) -> Option<String> {
        if depth > MAX_DEPTH {
            return Some(format!("nested deeper than {MAX_DEPTH} levels"));
        }
        let canonical = self
            .fs
            .real_path(remote_path)
            .unwrap_or_else(|_| remote_path.to_string());
        if self.visited.insert(canonical.clone()) {
            None
        } else {
            Some(format!("directory loop, {canonical} already listed"))
        }
    }

    fn add_file(&mut self, relative_path: String, size: u64) {
        let is_new = self.analyzer.is_new(&relative_path, size);
        let root = &self.analyzer.remote_root;
        self.report
            .files
            .push(RemoteFile::new(root, relative_path, size, is_new));

        if self.report.files.len() % STATUS_INTERVAL == 0 {
            self.sink
                .status(format!("Discovered {} files...", self.report.files.len()));
        }
    }
}

/// A local regular file exists with exactly `size` bytes.
pub(crate) fn local_matches(path: &Path, size: u64) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() == size)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_core::{Connector, NullSink};
    use siphon_test_utils::MemoryRemote;
    use tempfile::TempDir;

    #[test]
    fn test_everything_new_without_local_root() {
        let remote = MemoryRemote::new()
            .with_sized_file("/data/a.jpg", 10)
            .with_sized_file("/data/day1/b.jpg", 20);
        let session = remote.connect().unwrap();

        let report = TreeAnalyzer::without_local_diff("/data/")
            .analyze(&session, &CancellationToken::new(), &NullSink)
            .unwrap();

        assert_eq!(report.remote_root, "/data");
        assert_eq!(report.files.len(), 2);
        assert!(report.files.iter().all(|f| f.is_new));
        let nested = report
            .files
            .iter()
            .find(|f| f.relative_path == "day1/b.jpg")
            .unwrap();
        assert_eq!(nested.remote_path, "/data/day1/b.jpg");
        assert_eq!(nested.size_bytes, 20);
    }

    #[test]
    fn test_empty_local_root_means_no_diff() {
        let analyzer = TreeAnalyzer::new("/data", Some(PathBuf::new()));
        assert!(analyzer.local_root.is_none());
    }

    #[test]
    fn test_size_mismatch_is_new() {
        let local = TempDir::new().unwrap();
        std::fs::write(local.path().join("a.jpg"), vec![0u8; 9]).unwrap();

        let analyzer = TreeAnalyzer::new("/data", Some(local.path().to_path_buf()));
        assert!(analyzer.is_new("a.jpg", 10));
        assert!(!analyzer.is_new("a.jpg", 9));
        assert!(analyzer.is_new("missing.jpg", 9));
    }

    #[test]
    fn test_unlistable_root_fails() {
        let remote = MemoryRemote::new();
        let session = remote.connect().unwrap();

        let result = TreeAnalyzer::without_local_diff("/nope")
            .analyze(&session, &CancellationToken::new(), &NullSink);
        assert!(result.is_err());
    }

    /// Every directory lists the same two entries, and `loop` always points
    /// back at the root.
    struct EndlessTree {
        resolve_links: bool,
    }

    impl RemoteFs for EndlessTree {
        fn read_dir(&self, path: &str) -> Result<Vec<String>, SyncError> {
            if path == "/data" || path.ends_with("/loop") {
                Ok(vec!["img.jpg".to_string(), "loop".to_string()])
            } else {
                Err(SyncError::remote(path, "not a directory"))
            }
        }

        fn file_size(&self, _path: &str) -> Result<u64, SyncError> {
            Ok(1)
        }

        fn download(&self, path: &str, _writer: &mut dyn std::io::Write) -> Result<u64, SyncError> {
            Err(SyncError::remote(path, "unsupported"))
        }

        fn remove_file(&self, path: &str) -> Result<(), SyncError> {
            Err(SyncError::remote(path, "unsupported"))
        }

        fn remove_dir(&self, path: &str) -> Result<(), SyncError> {
            Err(SyncError::remote(path, "unsupported"))
        }

        fn real_path(&self, path: &str) -> Result<String, SyncError> {
            if self.resolve_links {
                Ok("/data".to_string())
            } else {
                Ok(path.to_string())
            }
        }
    }

    #[test]
    fn test_link_back_to_root_is_listed_once() {
        let report = TreeAnalyzer::without_local_diff("/data")
            .analyze(
                &EndlessTree { resolve_links: true },
                &CancellationToken::new(),
                &NullSink,
            )
            .unwrap();

        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].remote_path, "/data/img.jpg");
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].path, "/data/loop");
        assert!(report.warnings[0].message.contains("directory loop"));
    }

    #[test]
    fn test_depth_limit_stops_unresolved_loop() {
        let report = TreeAnalyzer::without_local_diff("/data")
            .analyze(
                &EndlessTree {
                    resolve_links: false,
                },
                &CancellationToken::new(),
                &NullSink,
            )
            .unwrap();

        assert_eq!(report.files.len(), MAX_DEPTH + 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("nested deeper"));
        assert!(!report.cancelled);
    }

    #[test]
    fn test_cancelled_before_start() {
        let remote = MemoryRemote::new().with_sized_file("/data/a.jpg", 1);
        let session = remote.connect().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = TreeAnalyzer::without_local_diff("/data")
            .analyze(&session, &cancel, &NullSink)
            .unwrap();
        assert!(report.cancelled);
        assert!(report.files.is_empty());
    }
}
