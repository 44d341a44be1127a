//! Configure tracing subscribers for socksrelay

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, fmt, registry};

use crate::cfg::LoggingConfig;

/// As [`EnvFilter::new`], but print a message if any directive in the
/// log is invalid.
#[allow(clippy::print_stderr)]
fn filt_from_str_verbose(s: &str, source: &str) -> EnvFilter {
    match EnvFilter::try_new(s) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Problem in {}: {}", source, e);
            EnvFilter::new(s)
        }
    }
}

/// Pick the filter to log with: the command line wins over the
/// configuration.
fn choose_filter(config: &LoggingConfig, cli: Option<&str>) -> EnvFilter {
    match cli.map(|s| filt_from_str_verbose(s, "--log-level command line parameter")) {
        Some(f) => f,
        None => filt_from_str_verbose(config.console.as_str(), "logging.console"),
    }
}

/// Set up logging to stderr.
///
/// Fails if a global subscriber was already installed.
pub(crate) fn setup_logging(config: &LoggingConfig, cli: Option<&str>) -> Result<()> {
    let env_filter = choose_filter(config, cli);
    registry()
        .with(fmt::Layer::default().with_writer(std::io::stderr))
        .with(env_filter)
        .try_init()
        .context("Unable to install tracing subscriber")
}
