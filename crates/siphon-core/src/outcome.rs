//! Final results of the transfer and deletion stages.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format::{format_duration, format_rate, format_size};
use crate::ItemError;

/// Result of removing remote files and pruning empty directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionOutcome {
    /// Files requested for deletion.
    pub files_total: usize,
    /// Files actually removed.
    pub files_deleted: usize,
    /// Empty directories removed afterwards.
    pub directories_removed: usize,
    /// Per-file failures.
    pub errors: Vec<ItemError>,
    /// Stopped early on request.
    pub cancelled: bool,
    /// Fatal error that prevented the stage from running.
    pub error: Option<String>,
}

impl DeletionOutcome {
    /// Outcome for a stage that could not start.
    pub fn failed(files_total: usize, error: impl Into<String>) -> Self {
        Self {
            files_total,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Ran to completion without a fatal error.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }

    /// Human summary for the operator.
    pub fn summary_message(&self) -> String {
        if let Some(ref error) = self.error {
            return format!("Deletion failed: {error}");
        }
        let mut msg = if self.cancelled {
            format!(
                "Deletion stopped. Deleted {} of {} files",
                self.files_deleted, self.files_total
            )
        } else {
            format!("Deleted {} files", self.files_deleted)
        };
        if !self.errors.is_empty() {
            msg.push_str(&format!(", {} failed", self.errors.len()));
        }
        if self.directories_removed > 0 {
            msg.push_str(&format!(
                ", removed {} empty directories",
                self.directories_removed
            ));
        }
        msg
    }
}

/// Result of copying a selection from the device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Files in the selection.
    pub files_total: usize,
    /// Files handled so far, copied or skipped. Drives progress.
    pub files_processed: usize,
    /// Files actually downloaded.
    pub files_copied: usize,
    /// Files already present locally with a matching size.
    pub files_skipped: usize,
    /// Bytes downloaded.
    pub bytes_copied: u64,
    /// Remote paths confirmed copied; the only candidates for deletion.
    pub successful_remote_paths: Vec<String>,
    /// Per-file failures.
    pub errors: Vec<ItemError>,
    /// Stopped early on request.
    pub cancelled: bool,
    /// Fatal error that stopped the stage.
    pub error: Option<String>,
    /// Post-transfer deletion, when it ran.
    pub deletion: Option<DeletionOutcome>,
    /// Wall-clock time spent.
    pub duration: Duration,
}

impl TransferOutcome {
    /// Outcome for a stage that could not start.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Ran to completion without a fatal error.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }

    /// Human summary for the operator.
    pub fn summary_message(&self) -> String {
        if let Some(ref error) = self.error {
            return format!("Transfer failed: {error}");
        }
        if self.cancelled && !self.deletion_stopped() {
            return format!(
                "Transfer stopped after {} of {} files ({} copied).",
                self.files_processed, self.files_total, self.files_copied
            );
        }

        let mut msg = format!(
            "Transferred {} new files out of {} total files.",
            self.files_copied, self.files_total
        );
        if !self.errors.is_empty() {
            msg.push_str(&format!(" {} files failed.", self.errors.len()));
        }
        if let Some(ref deletion) = self.deletion {
            if deletion.cancelled {
                msg.push_str(&format!(
                    " Deletion stopped after {} of {} files.",
                    deletion.files_deleted, deletion.files_total
                ));
            } else {
                msg.push_str(&format!(
                    " Deleted {} files from the device.",
                    deletion.files_deleted
                ));
            }
        }
        msg
    }

    /// Copying finished but the deletion that followed was stopped.
    pub fn deletion_stopped(&self) -> bool {
        self.deletion.as_ref().is_some_and(|d| d.cancelled)
    }

    /// Summary with size, time and rate.
    pub fn stats_line(&self) -> String {
        format!(
            "{} in {} ({})",
            format_size(self.bytes_copied),
            format_duration(self.duration),
            format_rate(self.bytes_copied, self.duration)
        )
    }
}

/// Aggregate statistics of one transfer, suitable for a history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Device endpoint.
    pub endpoint: String,
    /// Remote directory transferred from.
    pub remote_dir: String,
    /// Local directory transferred to.
    pub local_dir: PathBuf,
    /// Files downloaded.
    pub files_transferred: usize,
    /// Files in the selection.
    pub files_total: usize,
    /// Bytes downloaded.
    pub bytes_transferred: u64,
    /// Seconds spent.
    pub duration_seconds: f64,
    /// Whether deletion was requested.
    pub deleted_after: bool,
    /// Whether the transfer completed.
    pub success: bool,
    /// Failure or cancellation message.
    pub error_message: Option<String>,
    /// When the record was taken.
    pub timestamp: DateTime<Utc>,
}

impl TransferRecord {
    /// Build a record from a finished transfer.
    pub fn from_outcome(
        endpoint: impl Into<String>,
        remote_dir: impl Into<String>,
        local_dir: impl Into<PathBuf>,
        deleted_after: bool,
        outcome: &TransferOutcome,
    ) -> Self {
        let error_message = match (&outcome.error, outcome.cancelled) {
            (Some(error), _) => Some(error.clone()),
            (None, true) if outcome.deletion_stopped() => Some("Deletion stopped".to_string()),
            (None, true) => Some("Transfer stopped".to_string()),
            (None, false) => None,
        };

        Self {
            endpoint: endpoint.into(),
            remote_dir: remote_dir.into(),
            local_dir: local_dir.into(),
            files_transferred: outcome.files_copied,
            files_total: outcome.files_total,
            bytes_transferred: outcome.bytes_copied,
            duration_seconds: outcome.duration.as_secs_f64(),
            deleted_after,
            success: outcome.is_success(),
            error_message,
            timestamp: Utc::now(),
        }
    }

    /// Transfer rate in MiB/s.
    pub fn transfer_rate_mibps(&self) -> f64 {
        if self.duration_seconds == 0.0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / (1024.0 * 1024.0)) / self.duration_seconds
    }

    /// Share of the selection that was downloaded, 0 to 100.
    pub fn files_transferred_percentage(&self) -> f64 {
        if self.files_total == 0 {
            return 0.0;
        }
        (self.files_transferred as f64 / self.files_total as f64) * 100.0
    }
}
