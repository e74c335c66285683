//! SSH/SFTP transport for siphon.
//!
//! [`SftpConnector`] opens one authenticated SSH session with an SFTP channel
//! per call to [`Connector::connect`](siphon_core::Connector::connect). The
//! returned [`SftpSession`] closes the connection when dropped.

mod sftp;

pub use sftp::{SftpConnector, SftpSession};
