//! Batched TCP probe sweep over an IPv4 range.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use ipnet::{Ipv4AddrRange, Ipv4Net};
use siphon_core::{EVENT_CHANNEL_SIZE, ScanTarget, ScannerConfig, SyncError, percent};

/// Notification emitted by a network sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A host accepted a connection on the probed port.
    DeviceFound(ScanTarget),
    /// Probes completed so far as a percentage of the range.
    Progress(u8),
    /// The sweep ended, whether exhausted or cancelled. Sent exactly once.
    Complete(ScanSummary),
}

/// Counters for a finished sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Usable host addresses in the range.
    pub hosts_total: usize,
    /// Hosts actually probed.
    pub hosts_probed: usize,
    /// Devices reported.
    pub devices_found: usize,
    /// Stopped early on request.
    pub cancelled: bool,
}

/// Sweeps a network range for hosts with an open SSH port.
#[derive(Debug, Clone)]
pub struct DeviceScanner {
    config: ScannerConfig,
    network: Ipv4Net,
}

impl DeviceScanner {
    /// Validate the range. Host addresses are produced lazily while probing.
    pub fn new(config: ScannerConfig) -> Result<Self, SyncError> {
        let network = config.network()?;
        if config.concurrency == 0 {
            return Err(SyncError::invalid_config("Concurrency must be at least 1"));
        }
        Ok(Self { config, network })
    }

    /// Host addresses that will be probed, network and broadcast excluded.
    pub fn hosts(&self) -> Ipv4AddrRange {
        self.network.hosts()
    }

    /// Number of addresses [`hosts`](Self::hosts) yields.
    pub fn host_count(&self) -> usize {
        let prefix = u32::from(self.network.prefix_len());
        let size = 1u64 << (32 - prefix);
        let count = if prefix >= 31 { size } else { size - 2 };
        usize::try_from(count).unwrap_or(usize::MAX)
    }

    /// Probe every host, sending events to `tx`.
    ///
    /// Batches of `concurrency` probes run together and each batch finishes
    /// before the next starts. Cancellation is checked before every batch and
    /// every probe; probes already started are left to finish.
    pub async fn run(&self, cancel: &CancellationToken, tx: &mpsc::Sender<ScanEvent>) -> ScanSummary {
        self.sweep(cancel, tx, |address| self.probe(address)).await
    }

    async fn sweep<F, Fut>(
        &self,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<ScanEvent>,
        probe: F,
    ) -> ScanSummary
    where
        F: Fn(Ipv4Addr) -> Fut,
        Fut: Future<Output = Option<ScanTarget>>,
    {
        let total = self.host_count();
        let mut summary = ScanSummary {
            hosts_total: total,
            ..Default::default()
        };

        info!(
            range = %self.config.network_range,
            hosts = total,
            port = self.config.port,
            "starting network scan"
        );

        let mut hosts = self.hosts();
        'batches: loop {
            let batch: Vec<Ipv4Addr> = hosts.by_ref().take(self.config.concurrency).collect();
            if batch.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let mut probes = FuturesUnordered::new();
            for address in batch {
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
                probes.push(probe(address));
            }

            while let Some(found) = probes.next().await {
                summary.hosts_probed += 1;

                if let Some(target) = found {
                    if self.config.include_all_hosts || target.looks_like_target {
                        debug!(host = %target.display_name(), "device found");
                        summary.devices_found += 1;
                        if tx.send(ScanEvent::DeviceFound(target)).await.is_err() {
                            summary.cancelled = true;
                            break 'batches;
                        }
                    }
                }

                let _ = tx
                    .send(ScanEvent::Progress(percent(summary.hosts_probed, total)))
                    .await;
            }

            if summary.cancelled {
                break;
            }
        }

        info!(
            probed = summary.hosts_probed,
            found = summary.devices_found,
            cancelled = summary.cancelled,
            "network scan finished"
        );
        summary
    }

    /// Connect to one host; resolve its name if the port is open.
    async fn probe(&self, address: Ipv4Addr) -> Option<ScanTarget> {
        if !port_open(address, self.config.port, self.config.connect_timeout()).await {
            return None;
        }

        let hostname = if self.config.resolve_hostnames {
            reverse_lookup(address).await
        } else {
            String::new()
        };
        let looks_like_target = self.config.looks_like_target(&hostname);
        Some(ScanTarget::new(address, hostname, looks_like_target))
    }
}

async fn port_open(address: Ipv4Addr, port: u16, limit: Duration) -> bool {
    let socket = SocketAddr::new(IpAddr::V4(address), port);
    match timeout(limit, TcpStream::connect(socket)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            trace!(%socket, error = %err, "probe refused");
            false
        }
        Err(_) => {
            trace!(%socket, "probe timed out");
            false
        }
    }
}

/// Reverse DNS; empty when nothing resolves or the answer is the address itself.
async fn reverse_lookup(address: Ipv4Addr) -> String {
    let ip = IpAddr::V4(address);
    let resolved = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip)).await;
    match resolved {
        Ok(Ok(name)) if name != address.to_string() => name,
        _ => String::new(),
    }
}

/// Start a background sweep.
///
/// The range is validated before anything is spawned, so a malformed range
/// fails here and no events are ever sent.
pub fn start_scan(
    config: ScannerConfig,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<ScanEvent>, SyncError> {
    let scanner = DeviceScanner::new(config)?;
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

    tokio::spawn(async move {
        let summary = scanner.run(&cancel, &tx).await;
        let _ = tx.send(ScanEvent::Complete(summary)).await;
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scanner(range: &str, concurrency: usize) -> DeviceScanner {
        let mut config = ScannerConfig::new(range);
        config.concurrency = concurrency;
        DeviceScanner::new(config).unwrap()
    }

    #[test]
    fn test_hosts_exclude_network_and_broadcast() {
        let scanner = DeviceScanner::new(ScannerConfig::new("10.0.0.0/30")).unwrap();
        let hosts: Vec<_> = scanner.hosts().collect();
        assert_eq!(hosts, vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]);
        assert_eq!(scanner.host_count(), 2);
    }

    #[test]
    fn test_single_host_range() {
        let scanner = DeviceScanner::new(ScannerConfig::new("192.168.1.40/32")).unwrap();
        let hosts: Vec<_> = scanner.hosts().collect();
        assert_eq!(hosts, vec![Ipv4Addr::new(192, 168, 1, 40)]);
        assert_eq!(scanner.host_count(), 1);
    }

    #[test]
    fn test_whole_address_space_is_not_materialized() {
        let scanner = DeviceScanner::new(ScannerConfig::new("0.0.0.0/0")).unwrap();
        assert_eq!(scanner.host_count(), (1usize << 32) - 2);
        assert_eq!(scanner.hosts().next(), Some(Ipv4Addr::new(0, 0, 0, 1)));
    }

    #[tokio::test]
    async fn test_batches_run_one_after_another() {
        let scanner = scanner("10.0.0.0/29", 2);
        let hosts: Vec<Ipv4Addr> = scanner.hosts().collect();
        let hosts = &hosts;
        let in_flight = &AtomicUsize::new(0);
        let max_in_flight = &AtomicUsize::new(0);
        let finished = &AtomicUsize::new(0);
        let early_starts = &Mutex::new(Vec::new());
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let summary = scanner
            .sweep(&CancellationToken::new(), &tx, move |address| async move {
                let index = hosts.iter().position(|h| *h == address).unwrap_or_default();
                // Everything in earlier batches must be done already.
                if finished.load(Ordering::SeqCst) < index / 2 * 2 {
                    early_starts.lock().unwrap().push(address);
                }
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                finished.fetch_add(1, Ordering::SeqCst);
                None
            })
            .await;
        drop(tx);

        assert_eq!(summary.hosts_probed, 6);
        assert!(!summary.cancelled);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 2);
        assert!(early_starts.lock().unwrap().is_empty());

        let mut progress = Vec::new();
        while let Some(ScanEvent::Progress(p)) = rx.recv().await {
            progress.push(p);
        }
        assert_eq!(progress.len(), 6);
    }

    #[tokio::test]
    async fn test_cancel_lets_started_batch_finish() {
        let scanner = scanner("10.0.0.0/29", 2);
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let summary = scanner
            .sweep(&cancel, &tx, |_| {
                let cancel = cancel.clone();
                async move {
                    cancel.cancel();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    None
                }
            })
            .await;

        assert!(summary.cancelled);
        assert_eq!(summary.hosts_probed, 2);
        assert_eq!(summary.hosts_total, 6);
    }

    #[test]
    fn test_malformed_range_rejected() {
        assert!(DeviceScanner::new(ScannerConfig::new("192.168.1.0/33")).is_err());
        assert!(DeviceScanner::new(ScannerConfig::new("not-a-range")).is_err());
        assert!(DeviceScanner::new(ScannerConfig::new("")).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = ScannerConfig::new("10.0.0.0/30");
        config.concurrency = 0;
        assert!(DeviceScanner::new(config).is_err());
    }
}
