//! Event sink that records everything for later assertions.

use std::sync::Mutex;

use siphon_core::EventSink;

/// A recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Progress(u8),
    Status(String),
}

/// Collects progress and status events in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far.
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Progress percentages in order.
    pub fn progress_values(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Progress(p) => Some(p),
                Recorded::Status(_) => None,
            })
            .collect()
    }

    /// Status lines in order.
    pub fn statuses(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Status(s) => Some(s),
                Recorded::Progress(_) => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn progress(&self, percent: u8) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Recorded::Progress(percent));
    }

    fn status(&self, message: String) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Recorded::Status(message));
    }
}
