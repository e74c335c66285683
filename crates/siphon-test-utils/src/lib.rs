//! siphon-test-utils: Test infrastructure for siphon.
//!
//! Provides:
//! - MemoryRemote: In-memory device filesystem implementing `Connector`/`RemoteFs`
//! - RecordingSink: `EventSink` that keeps every progress and status event

mod memory_remote;
mod recording_sink;

pub use memory_remote::{MemoryRemote, MemorySession};
pub use recording_sink::{Recorded, RecordingSink};
