use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};
use webproc_frame::{Channel, ChannelError};

use crate::control::{self, ErrorBody};
use crate::dispatch::{DispatchTable, Outcome};
use crate::error::DispatchError;
use crate::message::{tag_name, Message, ERROR, HELLO, HELLO_ACK, PING, PONG, SHUTDOWN};

/// How handlers are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Handlers run on the loop thread, strictly in arrival order.
    Inline,
    /// Handlers run on `workers` threads fed by a queue of `queue_depth`
    /// messages. Completion order is not guaranteed.
    Pool { workers: usize, queue_depth: usize },
}

/// Configuration for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    /// How often an idle loop wakes to check for a shutdown request.
    pub idle_poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Inline,
            idle_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Why the loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The peer closed the channel.
    PeerClosed,
    /// A `SHUTDOWN` message, a handler, or a [`ShutdownHandle`] asked to stop.
    ShutdownRequested,
}

/// Cooperative stop flag, checked between dispatches.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop. A handler already running is allowed to finish.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Counters describing one loop run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub received: u64,
    pub dispatched: u64,
    pub replies: u64,
    pub dropped: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    dispatched: AtomicU64,
    replies: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LoopStats {
        LoopStats {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Routes one decoded message: application handlers first, then built-ins.
struct Router {
    channel: Arc<Channel>,
    table: Arc<DispatchTable>,
    counters: Arc<Counters>,
}

impl Router {
    fn route(&self, message: Message) -> Result<Flow, ChannelError> {
        let tag = message.tag;
        trace!(tag, request_id = message.request_id, size = message.body.len(), "dispatching");

        if self.table.contains(tag) {
            return self.run_handler(&message);
        }

        match tag {
            PING => {
                self.send(&control::pong(&message))?;
                Counters::bump(&self.counters.replies);
            }
            PONG => debug!(request_id = message.request_id, "pong received"),
            SHUTDOWN => {
                info!(reason = ?control::shutdown_reason(&message), "shutdown requested by peer");
                return Ok(Flow::Stop);
            }
            ERROR => match message.parse_json::<ErrorBody>() {
                Ok(body) => warn!(
                    request_id = message.request_id,
                    code = %body.code,
                    failed_tag = ?body.tag,
                    "peer reported error: {}",
                    body.message
                ),
                Err(err) => warn!(error = %err, "peer sent an unreadable error"),
            },
            HELLO | HELLO_ACK => {
                warn!(tag = tag_name(tag), "handshake message after handshake, dropped");
                Counters::bump(&self.counters.dropped);
            }
            _ => {
                warn!(tag, "unknown message, dropped");
                Counters::bump(&self.counters.dropped);
                self.fail(&message, &DispatchError::UnknownMessage(tag))?;
            }
        }
        Ok(Flow::Continue)
    }

    fn run_handler(&self, message: &Message) -> Result<Flow, ChannelError> {
        match self.table.dispatch(message) {
            Ok(outcome) => {
                Counters::bump(&self.counters.dispatched);
                match outcome {
                    Outcome::Done => Ok(Flow::Continue),
                    Outcome::Reply(body) => {
                        self.send(&message.reply(message.tag, body))?;
                        Counters::bump(&self.counters.replies);
                        Ok(Flow::Continue)
                    }
                    Outcome::Shutdown => {
                        info!(tag = message.tag, "handler requested shutdown");
                        Ok(Flow::Stop)
                    }
                }
            }
            Err(err) => {
                Counters::bump(&self.counters.failed);
                warn!(tag = message.tag, error = %err, "handler failed");
                self.fail(message, &err)?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Answer a failed request with `ERROR`; one-way messages only get the log line.
    fn fail(&self, message: &Message, err: &DispatchError) -> Result<(), ChannelError> {
        if !message.expects_reply() {
            return Ok(());
        }
        match control::error_reply(message, err.code(), &err.to_string()) {
            Ok(reply) => {
                self.send(&reply)?;
                Counters::bump(&self.counters.replies);
            }
            Err(encode) => warn!(error = %encode, "could not encode error reply"),
        }
        Ok(())
    }

    fn send(&self, message: &Message) -> Result<(), ChannelError> {
        self.channel.send(&message.encode())
    }

    fn decode(&self, payload: Bytes) -> Option<Message> {
        Counters::bump(&self.counters.received);
        match Message::decode(payload) {
            Ok(message) => Some(message),
            Err(err) => {
                let err = DispatchError::from(err);
                warn!(code = err.code(), error = %err, "message dropped");
                Counters::bump(&self.counters.dropped);
                None
            }
        }
    }

    /// Whether the loop thread should act on `message` itself instead of
    /// queueing it for a worker.
    fn stops_reader(&self, message: &Message) -> bool {
        message.tag == SHUTDOWN && !self.table.contains(SHUTDOWN)
    }
}

/// The steady-state read, decode, route, respond cycle.
///
/// Runs until the peer closes the channel, a shutdown is requested, or the
/// channel fails. A channel failure is returned as the error; deciding what
/// to do about it belongs to the caller.
pub struct DispatchLoop {
    router: Arc<Router>,
    config: DispatchConfig,
    shutdown: ShutdownHandle,
}

impl DispatchLoop {
    pub fn new(channel: Arc<Channel>, table: DispatchTable, config: DispatchConfig) -> Self {
        Self {
            router: Arc::new(Router {
                channel,
                table: Arc::new(table),
                counters: Arc::new(Counters::default()),
            }),
            config,
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Share an existing stop flag, e.g. one a signal handler already holds.
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Handle for stopping the loop from another thread or a signal handler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> LoopStats {
        self.router.counters.snapshot()
    }

    pub fn run(&self) -> Result<LoopExit, ChannelError> {
        let exit = match self.config.mode {
            DispatchMode::Inline => self.run_inline(),
            DispatchMode::Pool {
                workers,
                queue_depth,
            } => self.run_pool(workers.max(1), queue_depth.max(1)),
        };

        match &exit {
            Ok(exit) => info!(exit = ?exit, stats = ?self.stats(), "dispatch loop finished"),
            Err(err) => error!(error = %err, stats = ?self.stats(), "dispatch loop failed"),
        }
        exit
    }

    fn run_inline(&self) -> Result<LoopExit, ChannelError> {
        debug!("dispatch loop started (inline)");
        while let Some(payload) = self.next_payload()? {
            let Some(message) = self.router.decode(payload) else {
                continue;
            };
            if let Flow::Stop = self.router.route(message)? {
                self.shutdown.request();
            }
        }
        Ok(self.exit_reason())
    }

    fn run_pool(&self, workers: usize, queue_depth: usize) -> Result<LoopExit, ChannelError> {
        debug!(workers, queue_depth, "dispatch loop started (pool)");
        let (tx, rx) = mpsc::sync_channel::<Message>(queue_depth);
        let rx = Arc::new(Mutex::new(rx));
        let fatal: Arc<Mutex<Option<ChannelError>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = Worker {
                id,
                router: Arc::clone(&self.router),
                jobs: Arc::clone(&rx),
                shutdown: self.shutdown.clone(),
                fatal: Arc::clone(&fatal),
            };
            let spawned = thread::Builder::new()
                .name(format!("webproc-dispatch-{id}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    self.shutdown.request();
                    drop(tx);
                    join_workers(handles);
                    return Err(ChannelError::Io(err));
                }
            }
        }

        let read = self.feed(&tx);
        // Closing the queue lets workers drain what is already in it, then exit.
        drop(tx);
        join_workers(handles);

        read?;
        if let Some(err) = fatal.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Err(err);
        }
        Ok(self.exit_reason())
    }

    fn feed(&self, tx: &SyncSender<Message>) -> Result<(), ChannelError> {
        while let Some(payload) = self.next_payload()? {
            let Some(message) = self.router.decode(payload) else {
                continue;
            };
            if self.router.stops_reader(&message) {
                self.router.route(message)?;
                self.shutdown.request();
                break;
            }
            // Blocks while the queue is full, so the reader stops pulling frames.
            if tx.send(message).is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Next frame, or `None` once the loop should stop.
    fn next_payload(&self) -> Result<Option<Bytes>, ChannelError> {
        loop {
            if self.shutdown.is_requested() {
                return Ok(None);
            }
            match self
                .router
                .channel
                .receive_timeout(self.config.idle_poll_interval)
            {
                Ok(payload) => return Ok(Some(payload)),
                Err(err) if err.is_timeout() => continue,
                Err(ChannelError::Closed) => return Ok(None),
                Err(err) => return Err(err),
            }
        }
    }

    fn exit_reason(&self) -> LoopExit {
        if self.shutdown.is_requested() {
            LoopExit::ShutdownRequested
        } else {
            LoopExit::PeerClosed
        }
    }
}

impl std::fmt::Debug for DispatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchLoop")
            .field("config", &self.config)
            .field("table", &self.router.table)
            .field("shutdown_requested", &self.shutdown.is_requested())
            .finish()
    }
}

struct Worker {
    id: usize,
    router: Arc<Router>,
    jobs: Arc<Mutex<Receiver<Message>>>,
    shutdown: ShutdownHandle,
    fatal: Arc<Mutex<Option<ChannelError>>>,
}

impl Worker {
    fn run(self) {
        loop {
            let job = self
                .jobs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
            let Ok(message) = job else {
                trace!(worker = self.id, "job queue closed");
                return;
            };

            match self.router.route(message) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => self.shutdown.request(),
                Err(err) => {
                    self.shutdown.request();
                    let mut slot = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
                    slot.get_or_insert(err);
                }
            }
        }
    }
}

fn join_workers(handles: Vec<thread::JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            error!("dispatch worker panicked");
        }
    }
}
