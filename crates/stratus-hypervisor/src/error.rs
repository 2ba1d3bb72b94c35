//! Error types for stratus-hypervisor.

use crate::hypervisor::HypervisorHandle;
use thiserror::Error;

/// Result type alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;

/// Errors reported by a hypervisor backend.
#[derive(Debug, Error)]
pub enum HypervisorError {
    /// The backend refused or failed to start provisioning
    #[error("failed to provision instance: {0}")]
    Provision(String),

    /// The backend could not report machine status
    #[error("failed to query status: {0}")]
    Status(String),

    /// The backend failed to tear the machine down
    #[error("failed to terminate instance: {0}")]
    Terminate(String),

    /// The handle is not known to the backend
    #[error("unknown hypervisor handle: {0}")]
    UnknownHandle(HypervisorHandle),

    /// Instance specification is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error talking to a remote agent
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Timeout waiting for the backend
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}
