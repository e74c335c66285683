//! Background analysis stage: connect, walk, report.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use siphon_core::{Connector, EVENT_CHANNEL_SIZE, EventSink, StageEvent, SyncError, TreeReport};

use crate::analyzer::TreeAnalyzer;

/// Terminal result of an analysis.
pub type AnalysisResult = Result<TreeReport, SyncError>;

/// Event type of an analysis.
pub type AnalysisEvent = StageEvent<AnalysisResult>;

/// What to analyze.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    /// Directory on the device.
    pub remote_root: String,
    /// Local mirror to diff against; `None` treats every file as new.
    pub local_root: Option<PathBuf>,
}

impl AnalyzeRequest {
    /// Create a new request.
    pub fn new(remote_root: impl Into<String>, local_root: Option<PathBuf>) -> Self {
        Self {
            remote_root: remote_root.into(),
            local_root,
        }
    }
}

/// Open a session, analyze the tree, close the session.
///
/// Connection-level failures are returned as errors; everything else ends up
/// in the report.
pub fn run_analysis<C: Connector>(
    connector: &C,
    request: &AnalyzeRequest,
    cancel: &CancellationToken,
    sink: &dyn EventSink,
) -> AnalysisResult {
    sink.status(format!("Connecting to {}...", connector.endpoint()));
    let session = connector.connect()?;

    sink.status("Analyzing files...".to_string());
    let analyzer = TreeAnalyzer::new(&request.remote_root, request.local_root.clone());
    let report = analyzer.analyze(&session, cancel, sink)?;
    drop(session);

    if report.cancelled {
        sink.status("Preview canceled".to_string());
    } else if report.files.is_empty() {
        sink.status("No files found in remote directory".to_string());
    } else {
        sink.status("Preview complete".to_string());
    }
    sink.progress(100);

    info!(
        endpoint = %connector.endpoint(),
        files = report.files.len(),
        cancelled = report.cancelled,
        "analysis finished"
    );
    Ok(report)
}

/// Start a background analysis.
///
/// Returns a receiver for status updates and the final report.
pub fn start_analysis<C: Connector>(
    connector: C,
    request: AnalyzeRequest,
    cancel: CancellationToken,
) -> mpsc::Receiver<AnalysisEvent> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

    tokio::task::spawn_blocking(move || {
        let result = run_analysis(&connector, &request, &cancel, &tx);
        let _ = tx.blocking_send(StageEvent::Complete(result));
    });

    rx
}
