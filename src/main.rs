//! siphon - pull capture data off headless devices over SSH/SFTP.
//!
//! Usage:
//!   siphon discover [RANGE]      Find SSH-enabled devices on the network
//!   siphon preview               Show what a pull would copy
//!   siphon pull                  Copy new files, optionally deleting them after
//!   siphon purge PATH...         Delete files from the device
//!   siphon --help                Show help

mod config;
mod logging;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use siphon_analyze::{AnalyzeRequest, start_analysis};
use siphon_core::remote::{join_remote, normalize_remote_root};
use siphon_core::{
    AuthMethod, ConnectionConfig, Connector, ScannerConfig, StageEvent, TransferRecord, TreeReport,
    format_size,
};
use siphon_ops::{DeletionRequest, TransferRequest, start_deletion, start_transfer};
use siphon_remote::SftpConnector;
use siphon_scan::{ScanEvent, start_scan};

use crate::config::{DeviceSettings, Settings};

#[derive(Parser)]
#[command(
    name = "siphon",
    version,
    about = "Pull capture data off headless devices over SSH/SFTP",
    long_about = "siphon finds SSH-enabled devices on the local network, previews what \
                  is new on them, copies it to a local mirror and can remove the copied \
                  files from the device afterwards.\n\n\
                  Passwords are read from the environment (SIPHON_PASSWORD by default)."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Settings file (defaults to $CONFIG_DIR/siphon/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sweep a network range for devices with SSH open
    Discover {
        /// IPv4 range in CIDR notation, e.g. 192.168.1.0/24
        range: Option<String>,

        /// Report every SSH host, not only likely devices
        #[arg(long)]
        all: bool,

        /// Probes in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Per-host connect timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Port to probe
        #[arg(long)]
        port: Option<u16>,

        /// Skip reverse DNS lookups
        #[arg(long)]
        no_dns: bool,
    },

    /// List remote files and mark the ones a pull would copy
    Preview {
        #[command(flatten)]
        device: DeviceArgs,

        /// Print every file grouped by directory
        #[arg(long)]
        list: bool,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy files from the device to the local mirror
    Pull {
        #[command(flatten)]
        device: DeviceArgs,

        /// Copy every file, not only new ones
        #[arg(long, conflicts_with = "only")]
        all: bool,

        /// Copy only these paths, relative to the remote directory
        #[arg(long, value_name = "PATH")]
        only: Vec<String>,

        /// Skip the preview and copy everything under the remote directory
        #[arg(long, conflicts_with_all = ["all", "only"])]
        no_preview: bool,

        /// Delete successfully copied files from the device
        #[arg(long)]
        delete: bool,

        /// Append a JSON line with transfer statistics to this file
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,
    },

    /// Delete files from the device and prune emptied directories
    Purge {
        #[command(flatten)]
        device: DeviceArgs,

        /// Remote files; relative paths are taken under --remote
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

/// Connection and directory flags shared by the device commands.
#[derive(Args)]
struct DeviceArgs {
    /// Device hostname or IP address
    #[arg(long)]
    host: Option<String>,

    /// SSH port
    #[arg(short, long)]
    port: Option<u16>,

    /// Login name
    #[arg(short, long)]
    user: Option<String>,

    /// Environment variable holding the password (or the key passphrase)
    #[arg(long, default_value = "SIPHON_PASSWORD", value_name = "VAR")]
    password_env: String,

    /// Authenticate with this private key
    #[arg(long, value_name = "FILE", conflicts_with = "agent")]
    key: Option<PathBuf>,

    /// Authenticate with ssh-agent
    #[arg(long)]
    agent: bool,

    /// Connect and I/O timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Directory on the device
    #[arg(short, long, value_name = "DIR")]
    remote: Option<String>,

    /// Local mirror directory
    #[arg(short, long, value_name = "DIR")]
    local: Option<PathBuf>,
}

impl DeviceArgs {
    fn connector(&self, settings: &DeviceSettings) -> Result<SftpConnector> {
        let host = self
            .host
            .clone()
            .or_else(|| settings.host.clone())
            .ok_or_else(|| eyre!("No device given (use --host or set device.host)"))?;
        let username = self
            .user
            .clone()
            .or_else(|| settings.username.clone())
            .ok_or_else(|| eyre!("No username given (use --user or set device.username)"))?;

        let auth = if self.agent {
            AuthMethod::Agent
        } else if let Some(path) = self.key.clone().or_else(|| settings.key_file.clone()) {
            AuthMethod::KeyFile {
                path,
                passphrase: std::env::var(&self.password_env).ok(),
            }
        } else {
            let password = std::env::var(&self.password_env).with_context(|| {
                format!(
                    "Set {} to the device password, or use --key/--agent",
                    self.password_env
                )
            })?;
            AuthMethod::Password(password)
        };

        let mut builder = ConnectionConfig::builder();
        builder.host(host).username(username).auth(auth);
        if let Some(port) = self.port.or(settings.port) {
            builder.port(port);
        }
        if let Some(secs) = self.timeout_secs.or(settings.timeout_secs) {
            builder.timeout(Duration::from_secs(secs));
        }
        let config = builder
            .build()
            .map_err(|e| eyre!("Invalid connection settings: {e}"))?;

        Ok(SftpConnector::new(config))
    }

    fn remote_dir(&self, settings: &DeviceSettings) -> Option<String> {
        self.remote.clone().or_else(|| settings.remote_dir.clone())
    }

    fn require_remote_dir(&self, settings: &DeviceSettings) -> Result<String> {
        self.remote_dir(settings)
            .ok_or_else(|| eyre!("No remote directory given (use --remote or set device.remote_dir)"))
    }

    fn local_dir(&self, settings: &DeviceSettings) -> Option<PathBuf> {
        self.local.clone().or_else(|| settings.local_dir.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json)?;
    let settings = Settings::load(cli.config.as_deref())?;
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Command::Discover {
            range,
            all,
            concurrency,
            timeout_ms,
            port,
            no_dns,
        } => {
            let mut config = match (range, settings.scan) {
                (Some(range), Some(mut scan)) => {
                    scan.network_range = range;
                    scan
                }
                (Some(range), None) => ScannerConfig::new(range),
                (None, Some(scan)) => scan,
                (None, None) => bail!("No network range given (e.g. 192.168.1.0/24)"),
            };
            config.include_all_hosts |= all;
            config.resolve_hostnames &= !no_dns;
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            if let Some(timeout_ms) = timeout_ms {
                config.connect_timeout_ms = timeout_ms;
            }
            if let Some(port) = port {
                config.port = port;
            }
            run_discover(config, cancel).await?;
        }
        Command::Preview { device, list, json } => {
            run_preview(&device, &settings.device, list, json, cancel).await?;
        }
        Command::Pull {
            device,
            all,
            only,
            no_preview,
            delete,
            history,
        } => {
            let options = PullOptions {
                all,
                only,
                no_preview,
                delete,
                history,
            };
            run_pull(&device, &settings.device, options, cancel).await?;
        }
        Command::Purge { device, paths } => {
            run_purge(&device, &settings.device, paths, cancel).await?;
        }
    }

    Ok(())
}

/// Cancel the returned token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping at the next safe point...");
            token.cancel();
        }
    });
    cancel
}

/// Print status lines and coarse progress until the stage reports its result.
async fn drain<T>(mut rx: mpsc::Receiver<StageEvent<T>>, label: &str) -> Result<T> {
    let mut last_step = None;
    while let Some(event) = rx.recv().await {
        match event {
            StageEvent::Status(message) => eprintln!("{message}"),
            StageEvent::Progress(percent) => {
                let step = percent / 10;
                if last_step != Some(step) {
                    last_step = Some(step);
                    eprintln!("{label}: {percent}%");
                }
            }
            StageEvent::Complete(result) => return Ok(result),
        }
    }
    Err(eyre!("{label} ended without a result"))
}

async fn run_discover(config: ScannerConfig, cancel: CancellationToken) -> Result<()> {
    eprintln!("Scanning {}...", config.network_range);
    let mut rx = start_scan(config, cancel)?;

    let mut last_step = None;
    while let Some(event) = rx.recv().await {
        match event {
            ScanEvent::DeviceFound(target) => {
                println!("{}\t{}", target.address, target.display_name());
            }
            ScanEvent::Progress(percent) => {
                let step = percent / 10;
                if last_step != Some(step) {
                    last_step = Some(step);
                    eprintln!("Scan: {percent}%");
                }
            }
            ScanEvent::Complete(summary) => {
                let stopped = if summary.cancelled { " (stopped)" } else { "" };
                eprintln!(
                    "Probed {} of {} hosts, found {} devices{stopped}",
                    summary.hosts_probed, summary.hosts_total, summary.devices_found
                );
            }
        }
    }

    Ok(())
}

async fn run_preview(
    device: &DeviceArgs,
    settings: &DeviceSettings,
    list: bool,
    json: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let connector = device.connector(settings)?;
    let request = AnalyzeRequest::new(device.require_remote_dir(settings)?, device.local_dir(settings));

    let report = drain(start_analysis(connector, request, cancel), "Preview").await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, list);
    }
    Ok(())
}

fn print_report(report: &TreeReport, list: bool) {
    println!();
    println!("{}", "─".repeat(60));
    println!(" {}", report.summary_message());
    if !report.warnings.is_empty() {
        println!(" {} entries could not be read", report.warnings.len());
    }
    println!("{}", "─".repeat(60));

    if !list {
        return;
    }

    for (dir, files) in report.group_by_directory() {
        println!();
        println!(" {}/", if dir.is_empty() { "." } else { dir });
        for file in files {
            println!(
                "   {} {:>10}  {}",
                if file.is_new { "+" } else { "=" },
                format_size(file.size_bytes),
                file.name()
            );
        }
    }
    println!();
}

struct PullOptions {
    all: bool,
    only: Vec<String>,
    no_preview: bool,
    delete: bool,
    history: Option<PathBuf>,
}

async fn run_pull(
    device: &DeviceArgs,
    settings: &DeviceSettings,
    options: PullOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let connector = device.connector(settings)?;
    let remote_dir = device.require_remote_dir(settings)?;
    let local_dir = device
        .local_dir(settings)
        .ok_or_else(|| eyre!("No local directory given (use --local or set device.local_dir)"))?;

    let request = if options.no_preview {
        TransferRequest::full_listing(remote_dir.clone(), local_dir.clone())
    } else {
        let analyze = AnalyzeRequest::new(remote_dir.clone(), Some(local_dir.clone()));
        let report =
            drain(start_analysis(connector.clone(), analyze, cancel.clone()), "Preview").await??;
        if report.cancelled {
            return Ok(());
        }
        eprintln!("{}", report.summary_message());

        let selection = if !options.only.is_empty() {
            report.select_paths(&options.only)?
        } else if options.all {
            report.select_all()
        } else {
            report.select_new()
        };
        if selection.is_empty() {
            println!("Nothing to transfer.");
            return Ok(());
        }
        TransferRequest::with_selection(remote_dir.clone(), local_dir.clone(), selection)
            .latest_scan(report.scan_id)
    }
    .delete_after_success(options.delete);

    let endpoint = connector.endpoint();
    let outcome = drain(start_transfer(connector, request, cancel), "Transfer").await?;

    println!("{}", outcome.summary_message());
    if outcome.files_copied > 0 {
        println!("{}", outcome.stats_line());
    }
    for error in &outcome.errors {
        eprintln!("  failed: {error}");
    }

    if let Some(ref path) = options.history {
        let record =
            TransferRecord::from_outcome(endpoint, remote_dir, local_dir, options.delete, &outcome);
        append_history(path, &record)?;
    }

    if let Some(error) = outcome.error {
        bail!("{error}");
    }
    Ok(())
}

async fn run_purge(
    device: &DeviceArgs,
    settings: &DeviceSettings,
    paths: Vec<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let connector = device.connector(settings)?;
    let root = device.remote_dir(settings);
    let files = absolute_paths(paths, root.as_deref())?;

    let request = DeletionRequest::new(files, root);
    let outcome = drain(start_deletion(connector, request, cancel), "Deletion").await?;

    println!("{}", outcome.summary_message());
    for error in &outcome.errors {
        eprintln!("  failed: {error}");
    }
    if let Some(error) = outcome.error {
        bail!("{error}");
    }
    Ok(())
}

/// Resolve relative purge targets under the remote directory.
fn absolute_paths(paths: Vec<String>, root: Option<&str>) -> Result<Vec<String>> {
    paths
        .into_iter()
        .map(|path| {
            if path.starts_with('/') {
                return Ok(path);
            }
            match root {
                Some(root) => Ok(join_remote(&normalize_remote_root(root), &path)),
                None => bail!("{path} is relative and no remote directory was given"),
            }
        })
        .collect()
}

fn append_history(path: &Path, record: &TransferRecord) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot open history file {}", path.display()))?;
    writeln!(file, "{}", serde_json::to_string(record)?)
        .with_context(|| format!("Cannot write history file {}", path.display()))?;
    Ok(())
}
