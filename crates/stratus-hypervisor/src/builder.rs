//! Instance specification and its builder.

use crate::error::{HypervisorError, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Network attachment for a machine: which bridge to plug into and the
/// address the guest should use on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachment {
    /// Bridge (virtual switch) the subnet is realised on
    pub bridge_name: String,
    /// Guest IPv4 address
    pub ip_address: Ipv4Addr,
    /// Prefix length of the subnet
    pub prefix_len: u8,
}

/// Everything the hypervisor needs to allocate a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// Control-plane instance ID, used as the machine name
    pub instance_id: String,
    /// Number of virtual CPUs
    pub vcpu_count: u8,
    /// Memory size in MiB
    pub memory_mib: u32,
    /// Path or URI of the boot image
    pub image_location: String,
    /// Network attachment, if any
    pub network: Option<NetworkAttachment>,
}

impl InstanceSpec {
    /// Start building a spec for the given instance.
    pub fn builder(instance_id: impl Into<String>) -> InstanceSpecBuilder {
        InstanceSpecBuilder::new(instance_id)
    }

    /// Validate the specification.
    pub fn validate(&self) -> Result<()> {
        if self.instance_id.is_empty() {
            return Err(HypervisorError::Config("instance_id is required".into()));
        }
        if self.vcpu_count == 0 || self.vcpu_count > 32 {
            return Err(HypervisorError::Config(format!(
                "vcpu_count must be 1-32, got {}",
                self.vcpu_count
            )));
        }
        if !(128..=32768).contains(&self.memory_mib) {
            return Err(HypervisorError::Config(format!(
                "memory_mib must be 128-32768, got {}",
                self.memory_mib
            )));
        }
        if self.image_location.is_empty() {
            return Err(HypervisorError::Config("image_location is required".into()));
        }
        if let Some(net) = &self.network {
            if net.bridge_name.is_empty() {
                return Err(HypervisorError::Config("bridge_name is required".into()));
            }
            if net.prefix_len > 32 {
                return Err(HypervisorError::Config(format!(
                    "prefix_len must be <= 32, got {}",
                    net.prefix_len
                )));
            }
        }
        Ok(())
    }
}

/// Fluent builder for [`InstanceSpec`].
///
/// # Example
///
/// ```
/// use stratus_hypervisor::InstanceSpec;
///
/// let spec = InstanceSpec::builder("i-0123456789abcdef0")
///     .vcpus(1)
///     .memory_mib(512)
///     .image("/images/cirros.img")
///     .build()
///     .unwrap();
/// assert!(spec.network.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct InstanceSpecBuilder {
    spec: InstanceSpec,
}

impl InstanceSpecBuilder {
    /// Create a builder with 1 vCPU and 512 MiB.
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            spec: InstanceSpec {
                instance_id: instance_id.into(),
                vcpu_count: 1,
                memory_mib: 512,
                image_location: String::new(),
                network: None,
            },
        }
    }

    /// Set the number of virtual CPUs (1-32).
    pub fn vcpus(mut self, count: u8) -> Self {
        self.spec.vcpu_count = count;
        self
    }

    /// Set the memory size in MiB (128-32768).
    pub fn memory_mib(mut self, mib: u32) -> Self {
        self.spec.memory_mib = mib;
        self
    }

    /// Set the boot image location.
    pub fn image(mut self, location: impl Into<String>) -> Self {
        self.spec.image_location = location.into();
        self
    }

    /// Attach the machine to a bridge with a fixed address.
    pub fn network(mut self, bridge: impl Into<String>, ip: Ipv4Addr, prefix_len: u8) -> Self {
        self.spec.network = Some(NetworkAttachment {
            bridge_name: bridge.into(),
            ip_address: ip,
            prefix_len,
        });
        self
    }

    /// Build the spec, validating all fields.
    pub fn build(self) -> Result<InstanceSpec> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}
