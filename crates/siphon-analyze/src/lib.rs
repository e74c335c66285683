//! Remote tree analysis for siphon.
//!
//! Lists a directory on the device recursively and compares each file with
//! the local mirror:
//!
//! - A file is **new** when the mirror has no file at the same relative path,
//!   or has one of a different size
//! - Equal size means already transferred; contents are never hashed
//! - Unreadable entries are skipped with a warning, never aborting the walk
//!
//! ```rust,ignore
//! use siphon_analyze::{AnalyzeRequest, start_analysis};
//! use siphon_core::StageEvent;
//!
//! let request = AnalyzeRequest::new("/home/pi/data", Some("/mnt/evidence".into()));
//! let mut rx = start_analysis(connector, request, cancel.clone());
//!
//! while let Some(event) = rx.recv().await {
//!     if let StageEvent::Complete(Ok(report)) = event {
//!         println!("{}", report.summary_message());
//!     }
//! }
//! ```

mod analyzer;
mod stage;

pub use analyzer::{MAX_DEPTH, TreeAnalyzer};
pub use stage::{AnalysisEvent, AnalysisResult, AnalyzeRequest, run_analysis, start_analysis};

// Re-export core types
pub use siphon_core::{RemoteFile, SyncSelection, TreeReport, TreeStats};
