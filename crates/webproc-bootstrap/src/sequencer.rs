use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};
use webproc_frame::{Channel, FrameConfig};
use webproc_peer::{
    DispatchConfig, DispatchLoop, DispatchTable, Handshake, HandshakeConfig, HandshakeResult,
    LoopExit, LoopStats, ShutdownHandle,
};
use webproc_transport::ChannelEndpoint;

use crate::environment;
use crate::error::{BootstrapError, ConfigurationError, Result};
use crate::exit::ExitStatus;
use crate::process::init_process;

/// Everything the web process needs to start.
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    pub xdg_cache_home: Option<PathBuf>,
    pub fontconfig_path: Option<PathBuf>,
    pub gio_extra_modules: Option<PathBuf>,
    pub frame: FrameConfig,
    pub handshake: HandshakeConfig,
    pub dispatch: DispatchConfig,
}

/// A one-shot environment setup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    XdgCache,
    Fontconfig,
    GioExtraModules,
}

impl Step {
    pub fn name(self) -> &'static str {
        match self {
            Self::XdgCache => "xdg_cache",
            Self::Fontconfig => "fontconfig",
            Self::GioExtraModules => "gio_extra_modules",
        }
    }

    fn apply(self, path: &Path) -> std::result::Result<(), ConfigurationError> {
        match self {
            Self::XdgCache => environment::initialize_xdg(path),
            Self::Fontconfig => environment::initialize_fontconfig(path),
            Self::GioExtraModules => environment::initialize_gio_extra_modules_path(path),
        }
    }
}

#[derive(Debug)]
pub struct StepReport {
    pub step: Step,
    pub path: PathBuf,
    pub result: std::result::Result<(), ConfigurationError>,
}

/// What a completed run looked like.
#[derive(Debug)]
pub struct RunSummary {
    pub configuration: Vec<StepReport>,
    pub handshake: HandshakeResult,
    pub exit: LoopExit,
    pub stats: LoopStats,
}

/// Orders startup: environment steps, channel, handshake, dispatch loop.
///
/// Environment failures are logged and skipped. Everything after them is
/// fatal and maps to a distinct [`ExitStatus`].
#[derive(Debug)]
pub struct Bootstrap {
    config: BootstrapConfig,
    table: DispatchTable,
    shutdown: ShutdownHandle,
}

impl Bootstrap {
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            config,
            table: DispatchTable::default(),
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Application handlers served after the handshake.
    pub fn with_table(mut self, table: DispatchTable) -> Self {
        self.table = table;
        self
    }

    /// Stops the dispatch loop once it is running.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Run the configured environment steps in order. Failures are logged, not returned.
    pub fn configure(&self) -> Vec<StepReport> {
        let steps = [
            (Step::XdgCache, &self.config.xdg_cache_home),
            (Step::Fontconfig, &self.config.fontconfig_path),
            (Step::GioExtraModules, &self.config.gio_extra_modules),
        ];

        steps
            .into_iter()
            .filter_map(|(step, path)| path.as_ref().map(|path| (step, path.clone())))
            .map(|(step, path)| {
                let result = step.apply(&path);
                if let Err(err) = &result {
                    warn!(
                        step = step.name(),
                        error = %err,
                        "configuration step failed, continuing"
                    );
                }
                StepReport { step, path, result }
            })
            .collect()
    }

    /// Full startup over two parent-supplied descriptors.
    ///
    /// # Safety
    /// Ownership of both descriptors moves to this call, whatever the outcome:
    /// each must be open and owned by nothing else in the process, and the
    /// caller must not use or close them afterwards. Equal numbers denote one
    /// bidirectional socket.
    pub unsafe fn run(self, read_fd: RawFd, write_fd: RawFd) -> Result<RunSummary> {
        init_process();
        let configuration = self.configure();

        info!(read_fd, write_fd, "taking over channel descriptors");
        // SAFETY: forwarded from this function's contract.
        let endpoint = unsafe { ChannelEndpoint::from_raw_fds(read_fd, write_fd) }?;
        self.serve(endpoint, configuration)
    }

    /// Startup over an endpoint the caller already built.
    pub fn run_endpoint(self, endpoint: ChannelEndpoint) -> Result<RunSummary> {
        init_process();
        let configuration = self.configure();
        self.serve(endpoint, configuration)
    }

    fn serve(
        self,
        endpoint: ChannelEndpoint,
        configuration: Vec<StepReport>,
    ) -> Result<RunSummary> {
        let channel = Arc::new(Channel::with_config(endpoint, self.config.frame.clone()));

        let handshake = Handshake::new(self.config.handshake.clone()).run(&channel)?;

        let event_loop = DispatchLoop::new(Arc::clone(&channel), self.table, self.config.dispatch)
            .with_shutdown(self.shutdown);
        let exit = event_loop.run();
        let stats = event_loop.stats();
        channel.close();

        Ok(RunSummary {
            configuration,
            handshake,
            exit: exit?,
            stats,
        })
    }
}

/// Exit status for the outcome of a run.
pub fn exit_status(result: &Result<RunSummary>) -> ExitStatus {
    match result {
        Ok(_) => ExitStatus::Graceful,
        Err(err) => err.exit_status(),
    }
}

/// Build the channel over `fd1` (read) and `fd2` (write), handshake, and
/// serve until the channel ends, with default configuration.
///
/// A panic becomes [`BootstrapError::Internal`]. The outcome is logged.
///
/// # Safety
/// Same contract as [`Bootstrap::run`].
pub unsafe fn run_main(fd1: RawFd, fd2: RawFd) -> Result<RunSummary> {
    // SAFETY: forwarded from this function's contract.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        Bootstrap::new(BootstrapConfig::default()).run(fd1, fd2)
    }));
    let result = outcome.unwrap_or_else(|_| {
        Err(BootstrapError::Internal(
            "panic during web process startup".to_string(),
        ))
    });

    match &result {
        Ok(summary) => info!(exit = ?summary.exit, "web process finished"),
        Err(err) => error!(
            status = err.exit_status().code(),
            error = %err,
            "web process failed"
        ),
    }
    result
}

/// The web process main entry: [`run_main`] reduced to its exit status.
///
/// Never panics.
///
/// # Safety
/// Same contract as [`Bootstrap::run`].
pub unsafe fn initialize_main(fd1: RawFd, fd2: RawFd) -> i32 {
    // SAFETY: forwarded from this function's contract.
    exit_status(&unsafe { run_main(fd1, fd2) }).code()
}
