//! Startup and IPC plumbing for a spawned web process.
//!
//! A UI process launches the web process with an already-open descriptor
//! pair. The web process configures its environment, negotiates a protocol
//! version over the pair and then serves messages until the channel ends.
//!
//! # Crate Structure
//!
//! - [`transport`]: ownership of the parent-supplied descriptors
//! - [`frame`]: length-prefixed framing and the duplex [`frame::Channel`]
//! - [`peer`]: messages, the handshake and the dispatch loop
//! - [`bootstrap`]: environment setup, startup order and exit statuses

/// Re-export transport types.
pub mod transport {
    pub use webproc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use webproc_frame::*;
}

/// Re-export peer types.
pub mod peer {
    pub use webproc_peer::*;
}

/// Re-export bootstrap types.
pub mod bootstrap {
    pub use webproc_bootstrap::*;
}
