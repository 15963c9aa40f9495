mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "webprocess", version, about = "Web process bootstrap and host harness")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_with_child_command() {
        let cli = Cli::try_parse_from([
            "webprocess",
            "host",
            "--pings",
            "5",
            "--",
            "/bin/child",
            "run",
            "--log-level",
            "debug",
        ])
        .expect("host args should parse");

        match cli.command {
            Command::Host(args) => {
                assert_eq!(args.pings, 5);
                assert_eq!(args.command.len(), 4);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_fd_with_split_descriptors() {
        let err = Cli::try_parse_from([
            "webprocess",
            "run",
            "--fd",
            "3",
            "--read-fd",
            "4",
            "--write-fd",
            "5",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn read_fd_requires_write_fd() {
        let err = Cli::try_parse_from(["webprocess", "run", "--read-fd", "4"])
            .expect_err("missing write fd should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
