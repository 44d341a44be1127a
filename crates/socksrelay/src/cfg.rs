//! Configuration for the socksrelay command line application
//!
//! The configuration is TOML.  Our built-in defaults (see
//! `socksrelay_defaults.toml`) are loaded first; each configuration file
//! named on the command line is then layered over them, in order, by the
//! `config` crate.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;

/// Default options to use for our configuration.
pub(crate) const SOCKSRELAY_DEFAULTS: &str = include_str!("./socksrelay_defaults.toml");

/// An error related to an option passed to socksrelay via a configuration
/// builder.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigBuildError {
    /// A mandatory field was not present.
    #[error("Field was not provided: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },
    /// A single field had a value that proved to be unusable.
    #[error("Value of {field} was incorrect: {problem}")]
    Invalid {
        /// The name of the invalid field
        field: String,
        /// A description of the problem.
        problem: String,
    },
}

impl From<derive_builder::UninitializedFieldError> for ConfigBuildError {
    fn from(val: derive_builder::UninitializedFieldError) -> Self {
        ConfigBuildError::MissingField {
            field: val.field_name().to_string(),
        }
    }
}

impl From<derive_builder::SubfieldBuildError<ConfigBuildError>> for ConfigBuildError {
    fn from(e: derive_builder::SubfieldBuildError<ConfigBuildError>) -> Self {
        let (field, problem) = e.into_parts();
        problem.within(field)
    }
}

impl ConfigBuildError {
    /// Return a new ConfigBuildError that prefixes its field name with
    /// `prefix` and a dot.
    #[must_use]
    pub fn within(&self, prefix: &str) -> Self {
        use ConfigBuildError::*;
        let addprefix = |field: &str| format!("{}.{}", prefix, field);
        match self {
            MissingField { field } => MissingField {
                field: addprefix(field),
            },
            Invalid { field, problem } => Invalid {
                field: addprefix(field),
                problem: problem.clone(),
            },
        }
    }
}

/// Where to listen for SOCKS connections.
#[derive(Debug, Clone, Builder, Eq, PartialEq)]
#[builder(build_fn(error = "ConfigBuildError"))]
#[builder(derive(Debug, Serialize, Deserialize))]
pub struct ProxyConfig {
    /// Address and port to accept SOCKS connections on.
    #[builder(default = "default_listen()")]
    pub(crate) listen: SocketAddr,
}

/// Return the default value for `proxy.listen`.
fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 10800))
}

impl ProxyConfig {
    /// Return a new [`ProxyConfigBuilder`].
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::default()
    }

    /// Return the address we listen on.
    pub fn listen(&self) -> SocketAddr {
        self.listen
    }
}

/// Timeouts that apply to every session.
#[derive(Debug, Clone, Builder, Eq, PartialEq)]
#[builder(build_fn(private, name = "build_unvalidated", error = "ConfigBuildError"))]
#[builder(derive(Debug, Serialize, Deserialize))]
pub struct TimeoutConfig {
    /// How long any single read or write may stall before the session is
    /// abandoned.  This includes reads while relaying, so it is also an
    /// idle timeout.
    #[builder(default = "default_timeout()")]
    #[builder_field_attr(serde(default, with = "humantime_serde::option"))]
    io: Duration,

    /// How long resolving and connecting to a destination may take.
    #[builder(default = "default_timeout()")]
    #[builder_field_attr(serde(default, with = "humantime_serde::option"))]
    connect: Duration,
}

/// Return the default for both timeouts.
fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

impl TimeoutConfigBuilder {
    /// Build the [`TimeoutConfig`].
    pub fn build(&self) -> Result<TimeoutConfig, ConfigBuildError> {
        let config = self.build_unvalidated()?;
        for (field, value) in [("io", config.io), ("connect", config.connect)] {
            if value.is_zero() {
                return Err(ConfigBuildError::Invalid {
                    field: field.into(),
                    problem: "timeout must be nonzero".into(),
                });
            }
        }
        Ok(config)
    }
}

impl TimeoutConfig {
    /// Return a new [`TimeoutConfigBuilder`].
    pub fn builder() -> TimeoutConfigBuilder {
        TimeoutConfigBuilder::default()
    }

    /// Return the I/O timeout.
    pub fn io(&self) -> Duration {
        self.io
    }

    /// Return the connect timeout.
    pub fn connect(&self) -> Duration {
        self.connect
    }
}

/// Structure to hold our logging configuration options
#[derive(Debug, Clone, Builder, Eq, PartialEq)]
#[builder(build_fn(error = "ConfigBuildError"))]
#[builder(derive(Debug, Serialize, Deserialize))]
pub struct LoggingConfig {
    /// Filtering directives that determine tracing levels as described at
    /// <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html>
    ///
    /// You can override this setting with the -l, --log-level command line parameter.
    ///
    /// Example: "info,socksrelay::relay=trace"
    #[builder(default = "default_console_filter()", setter(into))]
    pub(crate) console: String,
}

/// Return a default tracing filter value for `logging.console`.
fn default_console_filter() -> String {
    "info".to_owned()
}

impl LoggingConfig {
    /// Return a new [`LoggingConfigBuilder`].
    pub fn builder() -> LoggingConfigBuilder {
        LoggingConfigBuilder::default()
    }
}

/// Configuration for system resources used by socksrelay.
#[derive(Debug, Clone, Builder, Eq, PartialEq)]
#[builder(build_fn(error = "ConfigBuildError"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[non_exhaustive]
pub struct SystemConfig {
    /// Maximum number of file descriptors we should launch with
    #[builder(setter(into), default = "default_max_files()")]
    pub(crate) max_files: u64,
}

/// Return the default maximum number of file descriptors to launch with.
fn default_max_files() -> u64 {
    16384
}

impl SystemConfig {
    /// Return a new SystemConfigBuilder.
    pub fn builder() -> SystemConfigBuilder {
        SystemConfigBuilder::default()
    }
}

/// Structure to hold socksrelay's configuration options, whether from a
/// configuration file or the command line.
#[derive(Debug, Builder, Clone, Eq, PartialEq)]
#[builder(derive(Serialize, Deserialize, Debug))]
#[builder(build_fn(error = "ConfigBuildError"))]
pub struct SocksRelayConfig {
    /// Where to listen.
    #[builder(sub_builder)]
    #[builder_field_attr(serde(default))]
    pub(crate) proxy: ProxyConfig,

    /// Session timeouts.
    #[builder(sub_builder)]
    #[builder_field_attr(serde(default))]
    pub(crate) timeouts: TimeoutConfig,

    /// Logging configuration.
    #[builder(sub_builder)]
    #[builder_field_attr(serde(default))]
    pub(crate) logging: LoggingConfig,

    /// Process-level resources.
    #[builder(sub_builder)]
    #[builder_field_attr(serde(default))]
    pub(crate) system: SystemConfig,
}

impl SocksRelayConfig {
    /// Return a new [`SocksRelayConfigBuilder`].
    pub fn builder() -> SocksRelayConfigBuilder {
        SocksRelayConfigBuilder::default()
    }

    /// Return the proxy configuration.
    pub fn proxy(&self) -> &ProxyConfig {
        &self.proxy
    }

    /// Return the session timeouts.
    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Return the logging configuration.
    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    /// Replace the listen address and/or port with values given on the
    /// command line.
    pub fn override_listen(&mut self, addr: Option<IpAddr>, port: Option<u16>) {
        if let Some(addr) = addr {
            self.proxy.listen.set_ip(addr);
        }
        if let Some(port) = port {
            self.proxy.listen.set_port(port);
        }
    }
}

/// The configuration builder type we use.
type ConfigBuilder = config::builder::ConfigBuilder<config::builder::DefaultState>;

/// Return a config builder that starts from our built-in defaults.
fn defaults_builder() -> ConfigBuilder {
    config::Config::builder().add_source(config::File::from_str(
        SOCKSRELAY_DEFAULTS,
        config::FileFormat::Toml,
    ))
}

/// Load every source in `builder` and turn the result into a validated
/// configuration.
fn build_config(builder: ConfigBuilder) -> anyhow::Result<SocksRelayConfig> {
    let cfg = builder.build().context("Couldn't load configuration")?;
    let builder: SocksRelayConfigBuilder = cfg
        .try_deserialize()
        .context("Invalid configuration")?;
    Ok(builder.build()?)
}

/// Build a configuration from our defaults plus the text of zero or more
/// TOML documents, later ones taking precedence.
pub fn config_from_strs<'a, I>(sources: I) -> anyhow::Result<SocksRelayConfig>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut builder = defaults_builder();
    for text in sources {
        builder = builder.add_source(config::File::from_str(text, config::FileFormat::Toml));
    }
    build_config(builder)
}

/// Load our configuration from the given files, later ones taking
/// precedence.
pub fn load_config<P: AsRef<Path>>(files: &[P]) -> anyhow::Result<SocksRelayConfig> {
    let mut builder = defaults_builder();
    for f in files {
        // Not using File::with_name: it would guess at extensions.
        let f: config::File<_, _> = f.as_ref().into();
        builder = builder.add_source(f.format(config::FileFormat::Toml).required(true));
    }
    build_config(builder)
}
