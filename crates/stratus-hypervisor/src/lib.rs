//! # stratus-hypervisor
//!
//! Boundary between the Stratus control plane and the virtualization layer
//! that actually allocates compute.
//!
//! The control plane never boots machines itself. It describes what it wants
//! with an [`InstanceSpec`], hands it to a [`Hypervisor`], and then polls the
//! returned [`HypervisorHandle`] until the machine is up or has failed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use stratus_hypervisor::{Hypervisor, InstanceSpec, ProvisionStatus, SimulatedHypervisor};
//!
//! # async fn example() -> stratus_hypervisor::Result<()> {
//! let hypervisor = SimulatedHypervisor::new();
//!
//! let spec = InstanceSpec::builder("i-0123456789abcdef0")
//!     .vcpus(2)
//!     .memory_mib(4096)
//!     .image("/var/lib/stratus/images/cirros.img")
//!     .network("br-0123456789ab", "10.0.1.4".parse().unwrap(), 24)
//!     .build()?;
//!
//! let handle = hypervisor.provision(&spec).await?;
//! while hypervisor.status(&handle).await? == ProvisionStatus::Pending {
//!     tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//! }
//!
//! hypervisor.terminate(&handle).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! - **SimulatedHypervisor**: in-process machines with a configurable boot
//!   delay and failure injection, for development and tests
//! - **RemoteHypervisor**: JSON/HTTP client for a hypervisor agent running on
//!   a compute host

mod builder;
mod error;
mod hypervisor;
mod remote;
mod simulated;

pub use builder::{InstanceSpec, InstanceSpecBuilder, NetworkAttachment};
pub use error::{HypervisorError, Result};
pub use hypervisor::{Hypervisor, HypervisorHandle, ProvisionStatus};
pub use remote::{RemoteHypervisor, IDEMPOTENCY_KEY};
pub use simulated::{SimulatedBehavior, SimulatedHypervisor};
