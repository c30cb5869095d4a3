use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;

// ============================================================================
// Configuration - flags with environment fallbacks
// ============================================================================
//
// Both roles share logging, debug and web flags. Defaults that differ per
// role (name, listen addresses) are left unset by clap and filled in when the
// arguments are resolved into `Settings`.
//
// ============================================================================

/// Prometheus remote-write receiver and load-balancing proxy
#[derive(Debug, Parser)]
#[command(name = "remote-write-relay", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept remote-write requests and log every series
    Receiver(ReceiverArgs),

    /// Forward remote-write requests to a set of receivers
    Proxy(ProxyArgs),
}

#[derive(Debug, Args)]
pub struct ReceiverArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct ProxyArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Receiver base URLs, comma separated (e.g. http://10.0.0.1:8080)
    #[arg(long, env = "BACKENDS", value_delimiter = ',', required = true)]
    pub backends: Vec<String>,

    /// Timeout for one request to a backend
    #[arg(long, env = "BACKEND_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub backend_timeout: Duration,
}

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// The log filtering level
    #[arg(long, env = "LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// The log format to use
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Logfmt)]
    pub log_format: LogFormat,

    /// A name attached to every log line
    #[arg(long, env = "DEBUG_NAME")]
    pub debug_name: Option<String>,

    /// Expose runtime introspection under /debug/pprof/ on the internal server
    #[arg(long, env = "DEBUG")]
    pub debug_profiling: bool,

    /// The address on which the public server listens
    #[arg(long, env = "WEB_LISTEN")]
    pub web_listen: Option<String>,

    /// The address on which the internal server listens
    #[arg(long, env = "WEB_INTERNAL_LISTEN")]
    pub web_internal_listen: Option<String>,

    /// The URL polled to determine liveness, usually the public listener
    #[arg(long, env = "WEB_HEALTHCHECK_URL")]
    pub web_healthcheck_url: Option<String>,

    /// How long each listener may take to drain on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_PERIOD", default_value = "10s", value_parser = parse_duration)]
    pub shutdown_grace_period: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Logfmt,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    Receiver,
    Proxy {
        backends: Vec<String>,
        backend_timeout: Duration,
    },
}

impl Role {
    pub fn default_name(&self) -> &'static str {
        match self {
            Role::Receiver => "remote-write-receiver",
            Role::Proxy { .. } => "remote-write-proxy",
        }
    }

    /// Prefix of the build info metric.
    pub fn metrics_prefix(&self) -> &'static str {
        match self {
            Role::Receiver => "remote_write_receiver",
            Role::Proxy { .. } => "remote_write_proxy",
        }
    }

    fn default_listen(&self) -> &'static str {
        match self {
            Role::Receiver => "0.0.0.0:8080",
            Role::Proxy { .. } => "0.0.0.0:8090",
        }
    }

    fn default_internal_listen(&self) -> &'static str {
        match self {
            Role::Receiver => "0.0.0.0:8081",
            Role::Proxy { .. } => "0.0.0.0:8091",
        }
    }
}

/// Fully resolved configuration of one process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub role: Role,
    pub name: String,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub profiling: bool,
    pub listen: String,
    pub internal_listen: String,
    pub healthcheck_url: Option<String>,
    pub grace_period: Duration,
}

impl Cli {
    pub fn into_settings(self) -> anyhow::Result<Settings> {
        let (common, role) = match self.command {
            Command::Receiver(args) => (args.common, Role::Receiver),
            Command::Proxy(args) => {
                let backends = args
                    .backends
                    .iter()
                    .map(|backend| backend.trim())
                    .filter(|backend| !backend.is_empty())
                    .map(validate_url)
                    .collect::<anyhow::Result<Vec<_>>>()
                    .context("invalid --backends")?;
                if backends.is_empty() {
                    bail!("--backends requires at least one backend URL");
                }
                (
                    args.common,
                    Role::Proxy {
                        backends,
                        backend_timeout: args.backend_timeout,
                    },
                )
            }
        };

        let healthcheck_url = common
            .web_healthcheck_url
            .as_deref()
            .map(validate_url)
            .transpose()
            .context("invalid --web-healthcheck-url")?;

        Ok(Settings {
            name: common
                .debug_name
                .unwrap_or_else(|| role.default_name().to_owned()),
            listen: common
                .web_listen
                .unwrap_or_else(|| role.default_listen().to_owned()),
            internal_listen: common
                .web_internal_listen
                .unwrap_or_else(|| role.default_internal_listen().to_owned()),
            log_level: common.log_level,
            log_format: common.log_format,
            profiling: common.debug_profiling,
            healthcheck_url,
            grace_period: common.shutdown_grace_period,
            role,
        })
    }
}

/// Absolute http(s) URL with a host.
fn validate_url(raw: &str) -> anyhow::Result<String> {
    let url = reqwest::Url::parse(raw).with_context(|| format!("{:?} is not a URL", raw))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        bail!("{:?} must be an http(s) URL with a host", raw);
    }
    Ok(raw.to_owned())
}

/// Parse `250ms`, `10s` or `2m`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (value, unit) = raw
        .find(|c: char| !c.is_ascii_digit())
        .map(|at| raw.split_at(at))
        .ok_or_else(|| format!("missing unit in {:?} (use ms, s or m)", raw))?;
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid number in {:?}", raw))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        _ => Err(format!("unknown unit {:?} in {:?} (use ms, s or m)", unit, raw)),
    }
}
