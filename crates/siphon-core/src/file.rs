//! Remote file entries and operator selections.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::remote::join_remote;

static NEXT_SCAN_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one traversal of a remote directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanId(pub u64);

impl ScanId {
    /// Allocate a fresh, process-unique scan id.
    pub fn next() -> Self {
        Self(NEXT_SCAN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A file found on the device during one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Path below the remote root, `/`-separated. Unique within a scan.
    pub relative_path: String,
    /// `remote_root + "/" + relative_path`.
    pub remote_path: String,
    /// Size reported by the device.
    pub size_bytes: u64,
    /// Missing locally, or present with a different size.
    pub is_new: bool,
}

impl RemoteFile {
    /// Create an entry under a normalized remote root.
    pub fn new(root: &str, relative_path: impl Into<String>, size_bytes: u64, is_new: bool) -> Self {
        let relative_path = relative_path.into();
        Self {
            remote_path: join_remote(root, &relative_path),
            relative_path,
            size_bytes,
            is_new,
        }
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// Ordered subset of one scan's files chosen for transfer.
///
/// Only [`crate::TreeReport`] hands these out, so every entry belongs to the
/// scan identified by `scan_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSelection {
    pub(crate) scan_id: ScanId,
    pub(crate) remote_root: String,
    pub(crate) files: Vec<RemoteFile>,
}

impl SyncSelection {
    /// The scan this selection was taken from.
    pub fn scan_id(&self) -> ScanId {
        self.scan_id
    }

    /// Normalized remote root of that scan.
    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// Selected files in selection order.
    pub fn files(&self) -> &[RemoteFile] {
        &self.files
    }

    /// Number of selected files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total bytes selected.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    /// Consume into the file list.
    pub fn into_files(self) -> Vec<RemoteFile> {
        self.files
    }
}
