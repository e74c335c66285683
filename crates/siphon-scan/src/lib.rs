//! Network sweep for SSH-enabled devices.
//!
//! # Overview
//!
//! `siphon-scan` probes every usable host address of an IPv4 range for an
//! open SSH port and reports the hosts that look like capture devices.
//!
//! - **Bounded batches**: at most `concurrency` sockets are open at once
//! - **Best-effort names** via reverse DNS; failures are not errors
//! - **Cooperative cancellation** before each batch and each probe
//!
//! # Example
//!
//! ```rust,no_run
//! use siphon_scan::{ScanEvent, ScannerConfig, start_scan};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), siphon_core::SyncError> {
//! let mut rx = start_scan(ScannerConfig::new("192.168.1.0/24"), CancellationToken::new())?;
//! while let Some(event) = rx.recv().await {
//!     if let ScanEvent::DeviceFound(target) = event {
//!         println!("{}", target.display_name());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod scanner;

pub use scanner::{DeviceScanner, ScanEvent, ScanSummary, start_scan};

pub use siphon_core::{ScanTarget, ScannerConfig};
