//! In-process hypervisor that pretends to boot machines.
//!
//! Machines become active after a fixed boot delay measured on the tokio
//! clock, so tests can drive it with a paused runtime.

use crate::builder::InstanceSpec;
use crate::error::{HypervisorError, Result};
use crate::hypervisor::{Hypervisor, HypervisorHandle, ProvisionStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// How simulated machines behave.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SimulatedBehavior {
    /// Machines boot after the configured delay
    #[default]
    Boot,
    /// `provision` itself fails with the given reason
    RejectProvision(String),
    /// Machines report `Failed` with the given reason once the delay elapses
    FailBoot(String),
    /// Machines stay `Pending` forever
    Hang,
    /// `terminate` fails with the given reason
    RejectTerminate(String),
}

#[derive(Debug)]
struct SimMachine {
    spec: InstanceSpec,
    provisioned_at: Instant,
}

/// A hypervisor that keeps its machines in memory.
#[derive(Debug)]
pub struct SimulatedHypervisor {
    boot_delay: Duration,
    behavior: Mutex<SimulatedBehavior>,
    machines: Mutex<HashMap<HypervisorHandle, SimMachine>>,
    provisioned: AtomicU64,
    terminated: AtomicU64,
}

impl Default for SimulatedHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHypervisor {
    /// Create a simulated hypervisor with a 500ms boot delay.
    pub fn new() -> Self {
        Self::with_boot_delay(Duration::from_millis(500))
    }

    /// Create a simulated hypervisor with a custom boot delay.
    pub fn with_boot_delay(boot_delay: Duration) -> Self {
        tracing::info!(boot_delay_ms = boot_delay.as_millis() as u64, "Creating simulated hypervisor");
        Self {
            boot_delay,
            behavior: Mutex::new(SimulatedBehavior::default()),
            machines: Mutex::new(HashMap::new()),
            provisioned: AtomicU64::new(0),
            terminated: AtomicU64::new(0),
        }
    }

    /// Change behavior for subsequent calls.
    pub fn set_behavior(&self, behavior: SimulatedBehavior) {
        tracing::debug!(?behavior, "Simulated hypervisor behavior changed");
        *self.behavior.lock() = behavior;
    }

    /// Number of machines currently allocated.
    pub fn machine_count(&self) -> usize {
        self.machines.lock().len()
    }

    /// Spec a machine was provisioned with.
    pub fn spec_of(&self, handle: &HypervisorHandle) -> Option<InstanceSpec> {
        self.machines.lock().get(handle).map(|m| m.spec.clone())
    }

    /// Total successful provision calls.
    pub fn provisioned_total(&self) -> u64 {
        self.provisioned.load(Ordering::Relaxed)
    }

    /// Total successful terminate calls.
    pub fn terminated_total(&self) -> u64 {
        self.terminated.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Hypervisor for SimulatedHypervisor {
    async fn provision(&self, spec: &InstanceSpec) -> Result<HypervisorHandle> {
        spec.validate()?;
        if let SimulatedBehavior::RejectProvision(reason) = &*self.behavior.lock() {
            tracing::debug!(instance_id = %spec.instance_id, %reason, "Rejecting provision");
            return Err(HypervisorError::Provision(reason.clone()));
        }

        let mut machines = self.machines.lock();
        if let Some((handle, _)) = machines
            .iter()
            .find(|(_, m)| m.spec.instance_id == spec.instance_id)
        {
            tracing::debug!(instance_id = %spec.instance_id, handle = %handle, "Machine already provisioned");
            return Ok(handle.clone());
        }

        let handle = HypervisorHandle::new(format!("sim-{}", Uuid::new_v4().simple()));
        machines.insert(
            handle.clone(),
            SimMachine {
                spec: spec.clone(),
                provisioned_at: Instant::now(),
            },
        );
        drop(machines);
        self.provisioned.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            instance_id = %spec.instance_id,
            handle = %handle,
            vcpus = spec.vcpu_count,
            memory_mib = spec.memory_mib,
            "Simulated machine provisioned"
        );
        Ok(handle)
    }

    async fn status(&self, handle: &HypervisorHandle) -> Result<ProvisionStatus> {
        let provisioned_at = self
            .machines
            .lock()
            .get(handle)
            .map(|m| m.provisioned_at)
            .ok_or_else(|| HypervisorError::UnknownHandle(handle.clone()))?;

        if provisioned_at.elapsed() < self.boot_delay {
            return Ok(ProvisionStatus::Pending);
        }

        let status = match &*self.behavior.lock() {
            SimulatedBehavior::FailBoot(reason) => ProvisionStatus::Failed(reason.clone()),
            SimulatedBehavior::Hang => ProvisionStatus::Pending,
            _ => ProvisionStatus::Active,
        };
        tracing::trace!(handle = %handle, %status, "Simulated status");
        Ok(status)
    }

    async fn terminate(&self, handle: &HypervisorHandle) -> Result<()> {
        if let SimulatedBehavior::RejectTerminate(reason) = &*self.behavior.lock() {
            return Err(HypervisorError::Terminate(reason.clone()));
        }
        if self.machines.lock().remove(handle).is_some() {
            self.terminated.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(handle = %handle, "Simulated machine terminated");
        }
        Ok(())
    }
}
