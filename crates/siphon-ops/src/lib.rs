//! Transfer and deletion stages for siphon.
//!
//! Both stages run blocking SFTP work on a tokio blocking thread and report
//! through a bounded channel, following the same `start_*` pattern as the
//! analysis stage. Per-file failures are collected on the outcome; only
//! connection-level failures fail a stage outright.

mod delete;
mod transfer;

pub use delete::{DeletionEvent, DeletionRequest, delete_remote_files, run_deletion, start_deletion};
pub use transfer::{TransferEvent, TransferRequest, run_transfer, start_transfer};

pub use siphon_core::{DeletionOutcome, TransferOutcome};

/// Emit a status line every this many files.
pub(crate) const STATUS_INTERVAL: usize = 10;
