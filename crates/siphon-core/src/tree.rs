//! Result of a remote tree analysis and the views derived from it.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::file::{RemoteFile, ScanId, SyncSelection};
use crate::format::format_size;
use crate::remote::relative_parent;
use crate::{ItemError, SyncError};

/// Aggregate counts over a file list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    /// Number of files.
    pub total_files: usize,
    /// Sum of all file sizes.
    pub total_bytes: u64,
    /// Files that would be transferred.
    pub new_files: usize,
    /// Bytes that would be transferred.
    pub new_bytes: u64,
}

/// Flat listing of a remote directory compared against the local mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeReport {
    /// Identifies this traversal.
    pub scan_id: ScanId,
    /// Normalized remote root.
    pub remote_root: String,
    /// Local mirror the files were compared with, if any.
    pub local_root: Option<PathBuf>,
    /// Every file found, in traversal order.
    pub files: Vec<RemoteFile>,
    /// Entries that could not be listed or stat'ed.
    pub warnings: Vec<ItemError>,
    /// Traversal stopped early on request.
    pub cancelled: bool,
}

impl TreeReport {
    /// Create a report for a fresh scan.
    pub fn new(remote_root: impl Into<String>, local_root: Option<PathBuf>) -> Self {
        Self {
            scan_id: ScanId::next(),
            remote_root: remote_root.into(),
            local_root,
            files: Vec::new(),
            warnings: Vec::new(),
            cancelled: false,
        }
    }

    /// Compute aggregate counts.
    pub fn stats(&self) -> TreeStats {
        self.files.iter().fold(TreeStats::default(), |mut stats, file| {
            stats.total_files += 1;
            stats.total_bytes += file.size_bytes;
            if file.is_new {
                stats.new_files += 1;
                stats.new_bytes += file.size_bytes;
            }
            stats
        })
    }

    /// Number of files found.
    pub fn total_files(&self) -> usize {
        self.files.len()
    }

    /// Bytes across all files.
    pub fn total_bytes(&self) -> u64 {
        self.stats().total_bytes
    }

    /// Files that are new or changed.
    pub fn new_files(&self) -> impl Iterator<Item = &RemoteFile> {
        self.files.iter().filter(|f| f.is_new)
    }

    /// Group files by parent relative directory; `""` is the remote root.
    pub fn group_by_directory(&self) -> BTreeMap<&str, Vec<&RemoteFile>> {
        let mut groups: BTreeMap<&str, Vec<&RemoteFile>> = BTreeMap::new();
        for file in &self.files {
            groups
                .entry(relative_parent(&file.relative_path))
                .or_default()
                .push(file);
        }
        groups
    }

    /// Human summary of the scan.
    pub fn summary_message(&self) -> String {
        let stats = self.stats();
        format!(
            "Found {} files ({}). {} new files ({}) will be transferred.",
            stats.total_files,
            format_size(stats.total_bytes),
            stats.new_files,
            format_size(stats.new_bytes)
        )
    }

    /// Select every new or changed file. This is the default selection.
    pub fn select_new(&self) -> SyncSelection {
        self.selection(self.new_files().cloned().collect())
    }

    /// Select every file, including unchanged ones.
    pub fn select_all(&self) -> SyncSelection {
        self.selection(self.files.clone())
    }

    /// Select files by relative path, in the given order.
    ///
    /// Fails if any path is not part of this scan. Duplicates are dropped.
    pub fn select_paths<I, S>(&self, paths: I) -> Result<SyncSelection, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let by_path: BTreeMap<&str, &RemoteFile> = self
            .files
            .iter()
            .map(|f| (f.relative_path.as_str(), f))
            .collect();

        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for path in paths {
            let path = path.as_ref().trim_start_matches('/');
            let file = by_path.get(path).ok_or_else(|| SyncError::StaleSelection {
                message: format!("{path} is not part of the scan of {}", self.display_root()),
            })?;
            if seen.insert(path.to_string()) {
                files.push((*file).clone());
            }
        }

        Ok(self.selection(files))
    }

    /// Check that a selection was produced by this scan.
    pub fn validate(&self, selection: &SyncSelection) -> Result<(), SyncError> {
        if selection.scan_id != self.scan_id || selection.remote_root != self.remote_root {
            return Err(SyncError::StaleSelection {
                message: format!(
                    "selection belongs to another scan (expected scan {} of {})",
                    self.scan_id.0,
                    self.display_root()
                ),
            });
        }
        Ok(())
    }

    fn selection(&self, files: Vec<RemoteFile>) -> SyncSelection {
        SyncSelection {
            scan_id: self.scan_id,
            remote_root: self.remote_root.clone(),
            files,
        }
    }

    fn display_root(&self) -> &str {
        if self.remote_root.is_empty() { "/" } else { &self.remote_root }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> TreeReport {
        let mut report = TreeReport::new("/data", None);
        report.files = vec![
            RemoteFile::new("/data", "img1.jpg", 100, true),
            RemoteFile::new("/data", "img2.jpg", 50, false),
            RemoteFile::new("/data", "2026/img3.jpg", 25, true),
        ];
        report
    }

    #[test]
    fn test_stats() {
        let stats = sample_report().stats();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_bytes, 175);
        assert_eq!(stats.new_files, 2);
        assert_eq!(stats.new_bytes, 125);
    }

    #[test]
    fn test_group_by_directory() {
        let report = sample_report();
        let groups = report.group_by_directory();
        assert_eq!(groups[""].len(), 2);
        assert_eq!(groups["2026"].len(), 1);
    }

    #[test]
    fn test_summary_message() {
        let msg = sample_report().summary_message();
        assert!(msg.starts_with("Found 3 files"));
        assert!(msg.contains("2 new files"));
    }

    #[test]
    fn test_select_paths_rejects_unknown() {
        let report = sample_report();
        let selection = report.select_paths(["2026/img3.jpg", "img1.jpg", "img1.jpg"]).unwrap();
        assert_eq!(selection.len(), 2);
        assert_eq!(selection.files()[0].relative_path, "2026/img3.jpg");

        assert!(matches!(
            report.select_paths(["missing.jpg"]),
            Err(SyncError::StaleSelection { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_other_scan() {
        let first = sample_report();
        let second = sample_report();
        let selection = first.select_new();

        assert!(first.validate(&selection).is_ok());
        assert!(second.validate(&selection).is_err());
    }
}
