//! Progress, status and completion notifications.

use tokio::sync::mpsc;

/// Default channel buffer size for stage events.
pub const EVENT_CHANNEL_SIZE: usize = 100;

/// Notification emitted by a background stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent<T> {
    /// Percentage complete, 0 to 100.
    Progress(u8),
    /// Human-readable status line.
    Status(String),
    /// Terminal result, sent exactly once.
    Complete(T),
}

/// Receiver side of the progress/status contract used by blocking stage code.
pub trait EventSink {
    /// Report a percentage, 0 to 100.
    fn progress(&self, percent: u8);

    /// Report a status line.
    fn status(&self, message: String);
}

/// Sends into a bounded channel from a blocking thread.
///
/// A closed receiver only means nobody is listening; the stage keeps going.
impl<T: Send> EventSink for mpsc::Sender<StageEvent<T>> {
    fn progress(&self, percent: u8) {
        let _ = self.blocking_send(StageEvent::Progress(percent));
    }

    fn status(&self, message: String) {
        let _ = self.blocking_send(StageEvent::Status(message));
    }
}

/// Forwards status lines and drops progress.
pub struct StatusOnly<'a>(pub &'a dyn EventSink);

impl EventSink for StatusOnly<'_> {
    fn progress(&self, _percent: u8) {}

    fn status(&self, message: String) {
        self.0.status(message);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn progress(&self, _percent: u8) {}

    fn status(&self, _message: String) {}
}
