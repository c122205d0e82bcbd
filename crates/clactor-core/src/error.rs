//! Error types for clactor.

use std::time::Duration;

use thiserror::Error;

use crate::status::Status;

/// Result type for clactor operations.
pub type Result<T> = std::result::Result<T, ComputeError>;

/// Errors that can occur while discovering devices, building programs,
/// spawning compute actors or talking to them.
///
/// A message that does not match an actor's argument descriptors is not an
/// error; see [`ComputeActor::accept`](crate::facade::ComputeActor::accept).
#[derive(Error, Debug)]
pub enum ComputeError {
    /// Invalid spawn or runtime configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kernel source failed to build.
    #[error("Kernel compilation failed ({status}): {diagnostic}")]
    Compile {
        /// Status reported by the build call.
        status: Status,
        /// Compiler diagnostic, verbatim.
        diagnostic: String,
    },

    /// The program does not define the requested entry point.
    #[error("Kernel not found: {0}")]
    KernelNotFound(String),

    /// A backend resource or enqueue call failed.
    #[error("{call} failed: {status}")]
    Resource {
        /// Name of the backend call that failed.
        call: &'static str,
        /// Status returned by the backend.
        status: Status,
    },

    /// The requested device id is not known to the registry.
    #[error("Device not found: {0}")]
    DeviceNotFound(usize),

    /// Discovery produced no usable device.
    #[error("No compute devices available: {0}")]
    NoDevices(String),

    /// Spawning requires a tokio runtime.
    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    /// The actor's mailbox is closed.
    #[error("Actor mailbox closed")]
    MailboxClosed,

    /// The actor's mailbox is at capacity.
    #[error("Actor mailbox full")]
    MailboxFull,

    /// A request did not receive a reply in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// A request was dropped by the actor without a reply.
    #[error("Request was dropped without a reply")]
    NoReply,

    /// Backend not compiled in or not present on this host.
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),
}

impl ComputeError {
    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a compile error carrying a build log.
    pub fn compile(status: Status, diagnostic: impl Into<String>) -> Self {
        Self::Compile {
            status,
            diagnostic: diagnostic.into(),
        }
    }

    /// Create a kernel-not-found error.
    pub fn kernel_not_found(name: impl Into<String>) -> Self {
        Self::KernelNotFound(name.into())
    }

    /// Create a resource error for a failed backend call.
    pub fn resource(call: &'static str, status: Status) -> Self {
        Self::Resource { call, status }
    }

    /// Create a no-devices error.
    pub fn no_devices(msg: impl Into<String>) -> Self {
        Self::NoDevices(msg.into())
    }

    /// Check if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Backend status carried by this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Compile { status, .. } | Self::Resource { status, .. } => Some(*status),
            _ => None,
        }
    }
}
