use std::ffi::OsString;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use webproc_peer::{HandshakeConfig, Role, VersionRange};

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod host;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run as the web process over inherited descriptors.
    Run(RunArgs),
    /// Spawn a web process over a socket pair and exercise it.
    Host(HostArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args),
        Command::Host(args) => host::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Protocol options shared by both sides of the handshake.
#[derive(Args, Debug, Clone)]
pub struct ProtocolArgs {
    /// Lowest protocol version to accept.
    #[arg(long, default_value_t = 1)]
    pub min_version: u16,
    /// Highest protocol version to offer.
    #[arg(long, default_value_t = 1)]
    pub max_version: u16,
    /// Capabilities to advertise (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub capabilities: Vec<String>,
    /// Handshake deadline (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
}

impl ProtocolArgs {
    pub fn handshake_config(&self, role: Role) -> CliResult<HandshakeConfig> {
        if self.min_version > self.max_version {
            return Err(CliError::usage(format!(
                "--min-version {} is above --max-version {}",
                self.min_version, self.max_version
            )));
        }
        Ok(HandshakeConfig {
            role,
            versions: VersionRange::new(self.min_version, self.max_version),
            capabilities: self.capabilities.clone(),
            timeout: parse_duration(&self.handshake_timeout)?,
            ..HandshakeConfig::default()
        })
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// One bidirectional socket used for both directions.
    #[arg(long, env = "WEBPROC_FD", conflicts_with_all = ["read_fd", "write_fd"])]
    pub fd: Option<RawFd>,
    /// Descriptor to read messages from.
    #[arg(long, env = "WEBPROC_READ_FD", requires = "write_fd")]
    pub read_fd: Option<RawFd>,
    /// Descriptor to write messages to.
    #[arg(long, env = "WEBPROC_WRITE_FD", requires = "read_fd")]
    pub write_fd: Option<RawFd>,
    /// XDG cache directory, created if missing.
    #[arg(long, env = "WEBPROC_XDG_CACHE_HOME", value_name = "DIR")]
    pub xdg_cache_home: Option<PathBuf>,
    /// Fontconfig directory or configuration file.
    #[arg(long, env = "WEBPROC_FONTCONFIG_PATH", value_name = "PATH")]
    pub fontconfig_path: Option<PathBuf>,
    /// Extra GIO module directory.
    #[arg(long, env = "WEBPROC_GIO_EXTRA_MODULES", value_name = "DIR")]
    pub gio_extra_modules: Option<PathBuf>,
    #[command(flatten)]
    pub protocol: ProtocolArgs,
    /// Open the handshake instead of waiting for the peer.
    #[arg(long)]
    pub initiator: bool,
    /// Run handlers on a pool of this many worker threads.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,
    /// Pending messages the worker pool may queue.
    #[arg(long, default_value_t = 64)]
    pub queue_depth: usize,
    /// Largest accepted frame payload, in bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_frame_size: Option<usize>,
    /// How often an idle loop checks for Ctrl-C (e.g. 100ms).
    #[arg(long, default_value = "100ms")]
    pub idle_poll: String,
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Pings to exchange after the handshake.
    #[arg(long, default_value_t = 3)]
    pub pings: u32,
    /// Deadline for each reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub reply_timeout: String,
    #[command(flatten)]
    pub protocol: ProtocolArgs,
    /// Child command; receives its end of the pair in WEBPROC_FD.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<OsString>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
