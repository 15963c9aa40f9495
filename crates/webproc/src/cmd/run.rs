use std::os::fd::RawFd;

use tracing::{error, info};
use webproc_bootstrap::{exit_status, Bootstrap, BootstrapConfig};
use webproc_frame::FrameConfig;
use webproc_peer::{DispatchConfig, DispatchMode, Role, ShutdownHandle};

use crate::cmd::{parse_duration, RunArgs};
use crate::exit::{bootstrap_error, CliError, CliResult, INTERNAL};

pub fn run(args: RunArgs) -> CliResult<i32> {
    let (read_fd, write_fd) = descriptors(&args)?;
    let bootstrap = Bootstrap::new(bootstrap_config(&args)?);
    install_ctrlc_handler(bootstrap.shutdown_handle())?;

    // SAFETY: the descriptors were inherited from the parent for this process
    // alone; nothing else here has opened or wrapped them.
    let result = unsafe { bootstrap.run(read_fd, write_fd) };
    let status = exit_status(&result);
    match result {
        Ok(summary) => {
            let failed_steps = summary
                .configuration
                .iter()
                .filter(|report| report.result.is_err())
                .count();
            info!(
                exit = ?summary.exit,
                version = summary.handshake.version,
                received = summary.stats.received,
                replies = summary.stats.replies,
                failed_steps,
                "web process finished"
            );
            Ok(status.code())
        }
        Err(err) => {
            error!(status = status.code(), error = %err, "web process failed");
            Err(bootstrap_error(&err))
        }
    }
}

fn descriptors(args: &RunArgs) -> CliResult<(RawFd, RawFd)> {
    match (args.fd, args.read_fd, args.write_fd) {
        (Some(fd), None, None) => Ok((fd, fd)),
        (None, Some(read), Some(write)) => Ok((read, write)),
        _ => Err(CliError::usage(
            "pass --fd, or both --read-fd and --write-fd",
        )),
    }
}

fn bootstrap_config(args: &RunArgs) -> CliResult<BootstrapConfig> {
    let role = if args.initiator {
        Role::Initiator
    } else {
        Role::Responder
    };

    let mut frame = FrameConfig::default();
    if let Some(max) = args.max_frame_size {
        frame.max_frame_size = max;
    }

    let mode = match args.workers {
        Some(0) => return Err(CliError::usage("--workers must be at least 1")),
        Some(workers) => DispatchMode::Pool {
            workers,
            queue_depth: args.queue_depth.max(1),
        },
        None => DispatchMode::Inline,
    };

    Ok(BootstrapConfig {
        xdg_cache_home: args.xdg_cache_home.clone(),
        fontconfig_path: args.fontconfig_path.clone(),
        gio_extra_modules: args.gio_extra_modules.clone(),
        frame,
        handshake: args.protocol.handshake_config(role)?,
        dispatch: DispatchConfig {
            mode,
            idle_poll_interval: parse_duration(&args.idle_poll)?,
        },
    })
}

fn install_ctrlc_handler(shutdown: ShutdownHandle) -> CliResult<()> {
    ctrlc::set_handler(move || shutdown.request()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cmd::Command;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Command,
    }

    fn parse(args: &[&str]) -> RunArgs {
        let argv = ["webprocess", "run"].iter().chain(args);
        match TestCli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn single_descriptor_serves_both_directions() {
        let args = parse(&["--fd", "7"]);
        assert_eq!(descriptors(&args).unwrap(), (7, 7));
    }

    #[test]
    fn split_descriptors() {
        let args = parse(&["--read-fd", "3", "--write-fd", "4"]);
        assert_eq!(descriptors(&args).unwrap(), (3, 4));
    }

    #[test]
    fn pool_mode_and_protocol_options() {
        let args = parse(&[
            "--fd",
            "3",
            "--workers",
            "4",
            "--queue-depth",
            "8",
            "--max-version",
            "3",
            "--capabilities",
            "a,b",
            "--initiator",
        ]);
        let config = bootstrap_config(&args).unwrap();
        assert_eq!(
            config.dispatch.mode,
            DispatchMode::Pool {
                workers: 4,
                queue_depth: 8
            }
        );
        assert_eq!(config.handshake.role, Role::Initiator);
        assert_eq!(config.handshake.versions.max, 3);
        assert_eq!(config.handshake.capabilities, ["a", "b"]);
    }

    #[test]
    fn rejects_zero_workers_and_inverted_versions() {
        let args = parse(&["--fd", "3", "--workers", "0"]);
        assert_eq!(bootstrap_config(&args).unwrap_err().code, crate::exit::USAGE);

        let args = parse(&["--fd", "3", "--min-version", "2", "--max-version", "1"]);
        assert_eq!(bootstrap_config(&args).unwrap_err().code, crate::exit::USAGE);
    }
}
