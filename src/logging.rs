use anyhow::{Context, Result};
use std::io;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Initialize logging for the invoking binary.
///
/// Everything of level info and higher is logged to stderr. These binaries
/// run unattended, so the output is meant for the supervisor's logs; export
/// `RUST_LOG` to change what is shown.
pub fn init() -> Result<()> {
    // The filter layer controls which log levels to display.
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    Registry::default()
        .with(filter_layer)
        .with(log_layer)
        .try_init()
        .context("unable to initialize logger")?;

    Ok(())
}
