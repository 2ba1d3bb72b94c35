//! The hypervisor collaborator trait.

use crate::builder::InstanceSpec;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference to a machine, issued by the hypervisor on provision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HypervisorHandle(String);

impl HypervisorHandle {
    /// Wrap a backend-issued handle.
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Get the handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HypervisorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provisioning status as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ProvisionStatus {
    /// Machine is still being allocated or booting
    Pending,
    /// Machine is running and attached to its network
    Active,
    /// Machine failed to come up
    Failed(String),
}

impl fmt::Display for ProvisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionStatus::Pending => write!(f, "pending"),
            ProvisionStatus::Active => write!(f, "active"),
            ProvisionStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// External virtualization layer that allocates compute and network
/// attachments for instances.
///
/// `provision` is expected to return quickly with a handle; completion is
/// observed through `status`. Implementations must be safe to call from
/// many tasks at once.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Start allocating a machine for the given spec.
    ///
    /// Idempotent per `spec.instance_id`: repeating the call for an instance
    /// that already has a machine returns the existing handle.
    ///
    /// # Errors
    /// Returns an error if the backend rejects the request outright.
    async fn provision(&self, spec: &InstanceSpec) -> Result<HypervisorHandle>;

    /// Report the current provisioning status of a machine.
    ///
    /// # Errors
    /// Returns an error if the handle is unknown or the backend is unreachable.
    async fn status(&self, handle: &HypervisorHandle) -> Result<ProvisionStatus>;

    /// Tear the machine down and release its resources.
    ///
    /// Terminating an already-terminated machine is not an error.
    async fn terminate(&self, handle: &HypervisorHandle) -> Result<()>;
}
