//! Error types for the hypervisor control layer.

use thiserror::Error;

/// Errors surfaced by hypervisor control operations.
///
/// Each variant corresponds to one HTTP mapping in the API layer:
/// `NotFound` → 404, `InvalidArgument` → 400, `Conflict`/`Precondition` → 409,
/// everything else → 500.
#[derive(Error, Debug)]
pub enum HypervisorError {
    /// A referenced domain, pool, volume, snapshot, network or image does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed identifier, unknown action, empty name or out-of-range value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The hypervisor rejected the operation in the current state, or a name collides.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation requires a different lifecycle state.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Connection or session error talking to the hypervisor; callers may retry.
    #[error("hypervisor error: {0}")]
    Hypervisor(String),

    /// XML or guest-agent payload could not be parsed or spliced.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Filesystem, download, or subprocess failure.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for HypervisorError {
    fn from(e: std::io::Error) -> Self {
        HypervisorError::Io(e.to_string())
    }
}

#[cfg(feature = "libvirt")]
impl From<virt::error::Error> for HypervisorError {
    fn from(e: virt::error::Error) -> Self {
        HypervisorError::Hypervisor(e.to_string())
    }
}

/// Result type alias for hypervisor control operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;
