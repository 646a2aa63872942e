//! Unified error type for pinio.
//!
//! Every fallible operation in the crate funnels into [`Error`].  Hardware
//! ports report plain [`std::io::Error`]s; the device layer attaches the
//! device key when lifting them into [`Error::Io`] so the caller always
//! knows which pin failed.
//!
//! Timeouts are deliberately absent: waiting for a value that never
//! arrives is an expected outcome and is reported as `false`.

use std::io;

use crate::pins::Capability;

// ---------------------------------------------------------------------------
// Crate error
// ---------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The registry already holds a live device under this key.
    #[error("device {key} is already provisioned")]
    AlreadyProvisioned { key: String },

    /// A raw read/write/close on the underlying collaborator failed.
    #[error("I/O error on device {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    /// The pin does not advertise the capability the device needs.
    #[error("pin {pin} does not support {capability}")]
    UnsupportedCapability { pin: String, capability: Capability },

    /// The device factory has no implementation for this device kind.
    #[error("device factory {factory} does not support {what}")]
    Unsupported { factory: String, what: &'static str },

    /// No pin with this GPIO / ADC number on the board.
    #[error("no pin {0} on this board")]
    UnknownPin(u32),

    /// Operation attempted on a device that has been closed.
    #[error("device {key} is closed")]
    DeviceClosed { key: String },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The scheduler no longer accepts work, so delivery cannot start.
    #[error("device {key}: scheduler is shut down")]
    SchedulerShutdown { key: String },

    /// A scheduler worker thread could not be started.
    #[error("failed to spawn scheduler worker: {0}")]
    Spawn(#[source] io::Error),
}

impl Error {
    /// Lift a port-level I/O error into a keyed device error.
    pub fn io(key: &str, source: io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            source,
        }
    }

    /// True for the registry key-conflict error.
    pub fn is_already_provisioned(&self) -> bool {
        matches!(self, Self::AlreadyProvisioned { .. })
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
