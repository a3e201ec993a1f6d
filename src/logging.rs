//! Tracing setup
//!
//! Logs go to stderr so `--json` output on stdout stays parseable.
//! `RUST_LOG` wins over the verbosity flag when set.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Filter directive for a `-v` count
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "streamplay=info",
        1 => "streamplay=debug",
        _ => "streamplay=trace",
    }
}

/// Install the global subscriber
///
/// Returns an error if a subscriber was already installed.
pub fn init_tracing(verbosity: u8, quiet: bool) -> anyhow::Result<()> {
    let directive = if quiet { "streamplay=warn" } else { default_directive(verbosity) };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let console_layer = fmt::layer()
        .with_target(verbosity > 0)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    tracing_subscriber::registry().with(console_layer).try_init()?;

    tracing::debug!("Tracing initialized with {}", directive);
    Ok(())
}
