//! Hosts found by a network sweep.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// A host with the probed port open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTarget {
    /// IPv4 address that accepted the connection.
    pub address: Ipv4Addr,
    /// Reverse-DNS name, empty when it did not resolve.
    pub hostname: String,
    /// Hostname matches a device hint, or did not resolve at all.
    pub looks_like_target: bool,
}

impl ScanTarget {
    /// Create a new target.
    pub fn new(address: Ipv4Addr, hostname: impl Into<String>, looks_like_target: bool) -> Self {
        Self {
            address,
            hostname: hostname.into(),
            looks_like_target,
        }
    }

    /// `"name (address)"` when a distinct hostname resolved, else the address.
    pub fn display_name(&self) -> String {
        let address = self.address.to_string();
        if self.hostname.is_empty() || self.hostname == address {
            address
        } else {
            format!("{} ({address})", self.hostname)
        }
    }
}
