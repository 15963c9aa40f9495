//! Startup of a spawned web process.
//!
//! The parent launches the process with two open descriptors and a handful of
//! paths. [`Bootstrap`] applies the paths to the environment (failures only
//! degrade the subsystem they configure), builds the channel over the
//! descriptors, runs the handshake and serves the dispatch loop. Each fatal
//! category ends the process with its own [`ExitStatus`].

pub mod environment;
pub mod error;
pub mod exit;
pub mod process;
pub mod sequencer;

pub use environment::{initialize_fontconfig, initialize_gio_extra_modules_path, initialize_xdg};
pub use error::{BootstrapError, ConfigurationError, Result};
pub use exit::ExitStatus;
pub use process::init_process;
pub use sequencer::{
    exit_status, initialize_main, run_main, Bootstrap, BootstrapConfig, RunSummary, Step,
    StepReport,
};
