//! Core types and traits for siphon.
//!
//! This crate provides the data model shared by every stage of a device
//! sync (remote files, selections, outcomes), the error taxonomy, the
//! configuration types, and the seams the stages are written against:
//! [`RemoteFs`]/[`Connector`] for the device side and [`EventSink`] for
//! progress reporting.

mod config;
mod error;
mod event;
mod file;
mod format;
mod outcome;
pub mod remote;
mod target;
mod tree;

pub use config::{
    AuthMethod, ConnectionConfig, ConnectionConfigBuilder, DEFAULT_SSH_PORT, ScannerConfig,
    ScannerConfigBuilder, parse_network_range, validate_hostname, validate_password,
    validate_username,
};
pub use error::{ItemError, SyncError};
pub use event::{EVENT_CHANNEL_SIZE, EventSink, NullSink, StageEvent, StatusOnly};
pub use file::{RemoteFile, ScanId, SyncSelection};
pub use format::{format_duration, format_rate, format_size, percent};
pub use outcome::{DeletionOutcome, TransferOutcome, TransferRecord};
pub use remote::{Connector, RemoteFs};
pub use target::ScanTarget;
pub use tree::{TreeReport, TreeStats};
