use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::net::UnixStream;
use std::process::{Command, ExitStatus as ChildStatus};
use std::time::{Duration, Instant};

use tracing::{info, warn};
use webproc_bootstrap::ExitStatus;
use webproc_frame::Channel;
use webproc_peer::{control, handshake, HandshakeConfig, HandshakeResult, Message, Role, PONG};
use webproc_transport::{set_inheritable, ChannelEndpoint};

use crate::cmd::{parse_duration, HostArgs};
use crate::exit::{
    channel_error, handshake_error, io_error, transport_error, CliError, CliResult, INTERNAL,
    TRANSPORT_FAILURE,
};
use crate::output::{print_report, HostReport, OutputFormat};

/// Outcome of the conversation with the child.
#[derive(Debug)]
struct Exchange {
    handshake: HandshakeResult,
    sent: u32,
    received: u32,
    rtt: Duration,
}

pub fn run(args: HostArgs, format: OutputFormat) -> CliResult<i32> {
    let reply_timeout = parse_duration(&args.reply_timeout)?;
    let config = args.protocol.handshake_config(Role::Initiator)?;
    let (program, rest) = args
        .command
        .split_first()
        .ok_or_else(|| CliError::usage("missing child command"))?;

    let (local, remote) =
        UnixStream::pair().map_err(|err| io_error("socketpair failed", err))?;
    set_inheritable(remote.as_fd(), true)
        .map_err(|err| io_error("cannot share descriptor", err))?;
    let fd = remote.as_raw_fd();

    let mut child = Command::new(program)
        .args(rest)
        .env("WEBPROC_FD", fd.to_string())
        .env_remove("WEBPROC_READ_FD")
        .env_remove("WEBPROC_WRITE_FD")
        .spawn()
        .map_err(|err| io_error("spawn failed", err))?;
    // The child holds its own copy now.
    drop(remote);
    let child_pid = child.id();
    info!(pid = child_pid, fd, "child started");

    let exchange = ChannelEndpoint::from_stream(local)
        .map(Channel::new)
        .map_err(|err| transport_error("channel setup failed", err))
        .and_then(|channel| {
            let exchange = converse(&channel, config, args.pings, reply_timeout);
            channel.close();
            exchange
        });

    let status = child
        .wait()
        .map_err(|err| io_error("waiting for child failed", err))?;
    info!(pid = child_pid, %status, "child exited");
    let exchange = exchange?;

    let report = HostReport {
        child_pid,
        protocol_version: exchange.handshake.version,
        capabilities: exchange.handshake.capabilities,
        pings_sent: exchange.sent,
        pongs_received: exchange.received,
        mean_rtt_us: (exchange.received > 0)
            .then(|| (exchange.rtt / exchange.received).as_micros() as u64),
        child_exit_code: status.code(),
        child_exit: describe(status),
    };
    print_report(&report, format);

    Ok(status.code().unwrap_or(INTERNAL))
}

fn converse(
    channel: &Channel,
    config: HandshakeConfig,
    pings: u32,
    reply_timeout: Duration,
) -> CliResult<Exchange> {
    let handshake = handshake(channel, config)
        .map_err(|err| handshake_error("handshake failed", err))?;
    let mut exchange = Exchange {
        handshake,
        sent: 0,
        received: 0,
        rtt: Duration::ZERO,
    };

    for request_id in 1..=pings {
        let started = Instant::now();
        channel
            .send(&control::ping(request_id).encode())
            .map_err(|err| channel_error("ping failed", err))?;
        exchange.sent += 1;

        let payload = channel
            .receive_timeout(reply_timeout)
            .map_err(|err| channel_error("no reply", err))?;
        let reply = Message::decode(payload).map_err(|err| {
            CliError::new(TRANSPORT_FAILURE, format!("malformed reply: {err}"))
        })?;
        if reply.tag != PONG || reply.request_id != request_id {
            warn!(tag = reply.tag, request_id = reply.request_id, "unexpected reply");
            continue;
        }
        exchange.received += 1;
        exchange.rtt += started.elapsed();
    }

    let shutdown = control::shutdown(Some("host finished")).map_err(|err| {
        CliError::new(INTERNAL, format!("cannot encode shutdown: {err}"))
    })?;
    channel
        .send(&shutdown.encode())
        .map_err(|err| channel_error("shutdown failed", err))?;
    Ok(exchange)
}

fn describe(status: ChildStatus) -> &'static str {
    match status.code() {
        Some(code) => ExitStatus::from_code(code)
            .map(ExitStatus::describe)
            .unwrap_or("unrecognized status"),
        None => "killed by signal",
    }
}
