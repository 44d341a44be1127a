//! A small SOCKS5 proxy that relays `CONNECT` requests over plain TCP.
//!
//! `socksrelay` accepts SOCKS5 clients, performs the "no authentication"
//! handshake, connects to the requested destination, and then copies bytes
//! in both directions until either side closes the connection.
//!
//! Only `CONNECT` to IPv4 addresses and domain names is supported; `BIND`,
//! `UDP ASSOCIATE`, IPv6 destinations and any form of authentication are
//! rejected with the appropriate SOCKS reply.
//!
//! # Command-line interface
//!
//! `socksrelay` uses the [`clap`](https://docs.rs/clap/) crate for
//! command-line argument parsing; run `socksrelay --help` to get it to print
//! its documentation.
//!
//! # Configuration
//!
//! The configuration file is TOML, passed with `-c`.  For the defaults see
//! [`socksrelay_defaults.toml`](./socksrelay_defaults.toml).
#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
// @@ begin lint list @@
#![warn(missing_docs)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::cargo_common_metadata)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::checked_conversions)]
#![warn(clippy::cognitive_complexity)]
#![deny(clippy::debug_assert_with_mut_call)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::expl_impl_clone_on_copy)]
#![deny(clippy::fallible_impl_from)]
#![deny(clippy::implicit_clone)]
#![deny(clippy::large_stack_arrays)]
#![warn(clippy::manual_ok_or)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::option_option)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![deny(clippy::ref_option_ref)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::trait_duplication_in_bounds)]
#![deny(clippy::unnecessary_wraps)]
#![warn(clippy::unseparated_literal_suffix)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::let_unit_value)] // This can reasonably be done for explicitness
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::result_large_err)]
//! <!-- @@ end lint list @@ -->

pub mod cfg;
mod exit;
mod logging;
mod process;
mod proxy;
mod relay;
mod timeout;

pub use cfg::{
    ConfigBuildError, LoggingConfig, LoggingConfigBuilder, ProxyConfig, ProxyConfigBuilder,
    SocksRelayConfig, SocksRelayConfigBuilder, SystemConfig, SystemConfigBuilder, TimeoutConfig,
    TimeoutConfigBuilder, load_config,
};
pub use proxy::socks::{DestinationStream, Negotiated, handle_socks_conn, negotiate};
pub use proxy::{SessionConfig, run_socks_proxy, serve};
pub use relay::{Direction, RELAY_BUF_LEN, RelayOutcome, relay};
pub use timeout::TimeoutStream;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::info;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "socksrelay", version, about = "A small SOCKS5 proxy.")]
struct Cli {
    /// Specify which config file(s) to read.  Later files override earlier
    /// ones.
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config_files: Vec<PathBuf>,

    /// Override the log level (usually one of 'trace', 'debug', 'info',
    /// 'warn', 'error').
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,

    /// Port to listen on for SOCKS connections (overrides the port in the
    /// config if specified).
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    port: Option<u16>,

    /// Address to listen on for SOCKS connections (overrides the address in
    /// the config if specified).
    #[arg(short = 'i', long = "listen-addr", value_name = "IP")]
    listen_addr: Option<IpAddr>,
}

/// Run the proxy until it fails or we're told to stop.
async fn run(config: SocksRelayConfig) -> Result<()> {
    let session = SessionConfig::from(config.timeouts());
    let listen = config.proxy().listen();
    tokio::select! {
        r = exit::wait_for_ctrl_c() => r.context("waiting for termination signal"),
        r = run_socks_proxy(listen, session) => r.context("SOCKS proxy failure"),
    }
}

/// Inner function, to handle a set of CLI arguments and return a single
/// `Result<()>` for convenient handling.
fn main_main<I, T>(cli_args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::try_parse_from(cli_args)?;

    let mut config = load_config(&cli.config_files)?;
    config.override_listen(cli.listen_addr, cli.port);

    logging::setup_logging(config.logging(), cli.log_level.as_deref())?;
    info!("Starting socksrelay {}", env!("CARGO_PKG_VERSION"));
    process::use_max_file_limit(&config.system);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Unable to start tokio runtime")?;
    runtime.block_on(run(config))
}

/// Main program, callable directly from a binary crate's `main`
///
/// This function behaves the same as `main_main()`, except:
///   * It takes command-line arguments from `std::env::args_os` rather than
///     from an argument.
///   * It exits the process with an appropriate error code on error.
#[allow(clippy::print_stderr)]
pub fn main() {
    match main_main(std::env::args_os()) {
        Ok(()) => {}
        Err(e) => match e.downcast_ref::<clap::Error>() {
            Some(clap_err) => clap_err.exit(),
            None => {
                eprintln!("socksrelay: error: {:#}", e);
                std::process::exit(1);
            }
        },
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list @@ -->
    use super::*;

    #[test]
    fn parse_cli() {
        let cli = Cli::try_parse_from([
            "socksrelay",
            "-c",
            "a.toml",
            "--config",
            "b.toml",
            "-l",
            "debug",
            "-p",
            "1080",
            "-i",
            "127.0.0.1",
        ])
        .unwrap();
        assert_eq!(
            cli.config_files,
            vec![PathBuf::from("a.toml"), PathBuf::from("b.toml")]
        );
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.port, Some(1080));
        assert_eq!(cli.listen_addr, Some("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn bad_cli_is_clap_error() {
        let e = main_main(["socksrelay", "-p", "notaport"]).unwrap_err();
        assert!(e.downcast_ref::<clap::Error>().is_some());
    }

    #[test]
    fn missing_config_file_is_error() {
        let e = main_main(["socksrelay", "-c", "/nonexistent/socksrelay.toml"]).unwrap_err();
        assert!(e.downcast_ref::<clap::Error>().is_none());
        assert!(format!("{:#}", e).contains("not found"));
    }
}
