//! Subscriber setup for the command line.

use color_eyre::eyre::{Result, eyre};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a stderr subscriber.
///
/// `RUST_LOG` overrides the level derived from `verbosity`
/// (0=warn, 1=info, 2=debug, 3+=trace).
pub fn init(verbosity: u8, json: bool) -> Result<()> {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "siphon={level},siphon_core={level},siphon_scan={level},siphon_analyze={level},\
             siphon_ops={level},siphon_remote={level}"
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbosity >= 2)
                    .with_file(verbosity >= 3)
                    .with_line_number(verbosity >= 3),
            )
            .try_init()
    };

    result.map_err(|e| eyre!("Cannot initialize logging: {e}"))
}
