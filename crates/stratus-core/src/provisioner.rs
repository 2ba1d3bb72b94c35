//! Image/instance provisioner.
//!
//! Binds an image and a subnet placement into an [`InstanceSpec`] and hands
//! it to the [`Hypervisor`]. Instance creation returns as soon as the record
//! is written in `Pending`; the provision call runs in a background task and
//! the [`StatusPoller`](crate::StatusPoller) drives the instance to `Active`
//! or `Failed`.

use crate::artifact;
use crate::cidr;
use crate::config::{ImageValidation, ManagerConfig};
use crate::error::{CoreError, Result};
use crate::id::{ResourceId, ResourceKind};
use crate::model::{Image, Instance, Record, ResourceMeta, Subnet};
use crate::params::NewInstance;
use crate::state::ResourceState;
use crate::store::ResourceStore;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stratus_hypervisor::{
    Hypervisor, HypervisorError, HypervisorHandle, InstanceSpec, ProvisionStatus,
};
use tokio::time::Instant;

// ============================================================================
// Statistics
// ============================================================================

/// Provisioner counters.
///
/// All counters are atomic and can be read without locking.
#[derive(Debug, Default)]
pub struct ProvisionerStats {
    /// Instances accepted and handed to the hypervisor.
    pub launched: AtomicU64,
    /// Instances that reached `Active`.
    pub activated: AtomicU64,
    /// Instances that ended in `Failed`.
    pub failed: AtomicU64,
    /// Machines released through `terminate`.
    pub terminated: AtomicU64,
}

impl ProvisionerStats {
    pub fn launched(&self) -> u64 {
        self.launched.load(Ordering::Relaxed)
    }

    pub fn activated(&self) -> u64 {
        self.activated.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn terminated(&self) -> u64 {
        self.terminated.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Provisioner
// ============================================================================

#[derive(Debug, Clone)]
struct Tracked {
    handle: HypervisorHandle,
    deadline: Instant,
}

/// Creates, watches and tears down instances.
pub struct Provisioner {
    store: ResourceStore,
    hypervisor: Arc<dyn Hypervisor>,
    config: ManagerConfig,
    /// Pending instances with an acknowledged handle.
    tracked: Mutex<HashMap<ResourceId, Tracked>>,
    stats: Arc<ProvisionerStats>,
}

impl Provisioner {
    pub fn new(store: ResourceStore, hypervisor: Arc<dyn Hypervisor>, config: ManagerConfig) -> Self {
        Self {
            store,
            hypervisor,
            config,
            tracked: Mutex::new(HashMap::new()),
            stats: Arc::new(ProvisionerStats::default()),
        }
    }

    pub fn stats(&self) -> &ProvisionerStats {
        &self.stats
    }

    /// Number of instances the poller is waiting on.
    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Launch an instance.
    ///
    /// Validates the placement, allocates a private address and writes the
    /// instance in `Pending`, then returns. Provisioning continues in the
    /// background.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if the subnet or image is missing or not
    ///   `Active`; no record is created
    /// - [`CoreError::Validation`] if lazy image validation fails
    /// - [`CoreError::Conflict`] if the subnet has no free address
    pub async fn create_instance(self: &Arc<Self>, params: NewInstance) -> Result<Instance> {
        let _guard = self
            .store
            .lock(&[&params.subnet_id, &params.image_id])
            .await;

        let subnet: Subnet = self.require_active(&params.subnet_id)?;
        let image: Image = self.require_active(&params.image_id)?;

        if self.config.image_validation == ImageValidation::Lazy {
            artifact::verify_artifact(&image.location).await?;
        }

        let subnet_id = subnet.meta.id.clone();
        let in_use: HashSet<_> = self
            .store
            .list(move |i: &Instance| i.subnet_id == subnet_id)
            .map(|i| i.private_ip_address)
            .collect();
        let address = cidr::allocate_host(&subnet.cidr_block, &in_use).ok_or_else(|| {
            CoreError::Conflict(format!(
                "subnet {} ({}) has no free addresses",
                subnet.meta.id, subnet.cidr_block
            ))
        })?;

        let id = ResourceId::generate(ResourceKind::Instance);
        let spec = InstanceSpec::builder(id.as_str())
            .vcpus(params.instance_type.vcpus())
            .memory_mib(params.instance_type.memory_mib())
            .image(image.location.clone())
            .network(
                subnet.bridge_name.clone(),
                address,
                subnet.cidr_block.prefix_len(),
            )
            .build()?;

        let instance = self.store.put(Instance {
            meta: ResourceMeta::new(id, params.tags),
            subnet_id: subnet.meta.id.clone(),
            vpc_id: subnet.vpc_id.clone(),
            image_id: image.meta.id.clone(),
            instance_type: params.instance_type,
            private_ip_address: address,
            hypervisor_handle: None,
            failure_reason: None,
        })?;
        self.stats.launched.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            instance_id = %instance.meta.id,
            subnet_id = %instance.subnet_id,
            image_id = %instance.image_id,
            instance_type = %instance.instance_type,
            private_ip = %instance.private_ip_address,
            "Instance launch accepted"
        );

        let deadline = Instant::now() + self.config.provision_timeout;
        let this = Arc::clone(self);
        let instance_id = instance.meta.id.clone();
        tokio::spawn(async move {
            this.run_provision(instance_id, spec, deadline).await;
        });

        Ok(instance)
    }

    fn require_active<T: Record>(&self, id: &ResourceId) -> Result<T> {
        let record: T = self.store.get_as(id)?;
        if record.state() != ResourceState::Active {
            tracing::debug!(id = %id, state = %record.state(), "Referenced resource not active");
            return Err(CoreError::NotFound(id.clone()));
        }
        Ok(record)
    }

    /// Background half of instance creation.
    async fn run_provision(&self, id: ResourceId, spec: InstanceSpec, deadline: Instant) {
        let start = Instant::now();
        let result = tokio::time::timeout_at(deadline, self.hypervisor.provision(&spec)).await;

        match result {
            Ok(Ok(handle)) => {
                let recorded = self.store.update(&id, |i: &mut Instance| {
                    i.hypervisor_handle = Some(handle.clone());
                    Ok(())
                });
                match recorded {
                    Ok(_) => {
                        tracing::debug!(
                            instance_id = %id,
                            handle = %handle,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Provision acknowledged"
                        );
                        self.tracked
                            .lock()
                            .insert(id, Tracked { handle, deadline });
                    }
                    Err(e) => {
                        tracing::warn!(instance_id = %id, error = %e, "Instance vanished during provision");
                        self.spawn_terminate(handle);
                    }
                }
            }
            Ok(Err(e)) => self.mark_failed(&id, e.to_string()),
            Err(_) => {
                self.mark_failed(
                    &id,
                    format!("provisioning timed out after {:?}", self.config.provision_timeout),
                );
                tracing::warn!(
                    instance_id = %id,
                    "Provision call abandoned, the hypervisor may hold an orphaned machine"
                );
                self.spawn_reclaim(spec);
            }
        }
    }

    /// Find and release a machine whose provision call was abandoned.
    ///
    /// Provisioning is idempotent per instance ID, so repeating the call
    /// returns the handle of the machine the first call created, if any.
    fn spawn_reclaim(&self, spec: InstanceSpec) {
        let hypervisor = Arc::clone(&self.hypervisor);
        let stats = Arc::clone(&self.stats);
        let timeout = self.config.provision_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, hypervisor.provision(&spec)).await {
                Ok(Ok(handle)) => {
                    tracing::info!(
                        instance_id = %spec.instance_id,
                        handle = %handle,
                        "Reclaiming machine of abandoned provision"
                    );
                    terminate_detached(hypervisor.as_ref(), &stats, &handle, timeout).await;
                }
                Ok(Err(e)) => tracing::warn!(
                    instance_id = %spec.instance_id,
                    error = %e,
                    "Could not look up machine of abandoned provision"
                ),
                Err(_) => tracing::warn!(
                    instance_id = %spec.instance_id,
                    "Hypervisor unresponsive, machine may be orphaned"
                ),
            }
        });
    }

    /// Start watching a pending instance that already has a handle.
    pub fn track(&self, id: ResourceId, handle: HypervisorHandle) {
        let deadline = Instant::now() + self.config.provision_timeout;
        tracing::debug!(instance_id = %id, handle = %handle, "Tracking instance");
        self.tracked.lock().insert(id, Tracked { handle, deadline });
    }

    /// One status sweep over every tracked instance.
    ///
    /// Each status call is bounded by `status_timeout`. An instance is only
    /// timed out when the hypervisor cannot confirm it after its deadline; a
    /// late `Active` report still activates it. Best-effort terminates of
    /// timed-out machines run in their own tasks.
    ///
    /// Returns the number of instances that left `Pending`.
    pub async fn poll_once(&self) -> usize {
        let tracked: Vec<(ResourceId, Tracked)> = self
            .tracked
            .lock()
            .iter()
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect();
        if tracked.is_empty() {
            return 0;
        }

        let status_timeout = self.config.status_timeout;
        let checks = tracked.into_iter().map(|(id, t)| async move {
            let status = tokio::time::timeout(status_timeout, self.hypervisor.status(&t.handle)).await;
            (id, t, status)
        });

        let mut settled = 0;
        for (id, t, status) in join_all(checks).await {
            let timed_out = Instant::now() >= t.deadline;
            match status {
                Ok(Ok(ProvisionStatus::Active)) => {
                    self.untrack(&id);
                    self.activate(&id);
                    settled += 1;
                }
                Ok(Ok(ProvisionStatus::Failed(reason))) => {
                    self.untrack(&id);
                    self.mark_failed(&id, reason);
                    settled += 1;
                }
                Ok(Err(HypervisorError::UnknownHandle(_))) => {
                    self.untrack(&id);
                    self.mark_failed(&id, format!("hypervisor lost machine {}", t.handle));
                    settled += 1;
                }
                Ok(Ok(ProvisionStatus::Pending)) | Ok(Err(_)) | Err(_) if timed_out => {
                    self.untrack(&id);
                    self.mark_failed(
                        &id,
                        format!("provisioning timed out after {:?}", self.config.provision_timeout),
                    );
                    self.spawn_terminate(t.handle);
                    settled += 1;
                }
                Ok(Ok(ProvisionStatus::Pending)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(instance_id = %id, error = %e, "Status check failed, will retry");
                }
                Err(_) => {
                    tracing::warn!(
                        instance_id = %id,
                        timeout_ms = status_timeout.as_millis() as u64,
                        "Status check timed out, will retry"
                    );
                }
            }
        }
        settled
    }

    fn untrack(&self, id: &ResourceId) {
        self.tracked.lock().remove(id);
    }

    fn activate(&self, id: &ResourceId) {
        let instance: Instance = match self.store.get_as(id) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::warn!(instance_id = %id, error = %e, "Activated instance not in store");
                return;
            }
        };

        // placement must still be live
        for dep in [&instance.subnet_id, &instance.image_id] {
            let live = self
                .store
                .get(dep)
                .map(|r| r.meta().state == ResourceState::Active)
                .unwrap_or(false);
            if !live {
                self.mark_failed(id, format!("{dep} is no longer available"));
                return;
            }
        }

        match self
            .store
            .update(id, |i: &mut Instance| i.meta.transition(ResourceState::Active))
        {
            Ok(instance) => {
                self.stats.activated.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    instance_id = %id,
                    private_ip = %instance.private_ip_address,
                    "Instance active"
                );
            }
            Err(e) => tracing::warn!(instance_id = %id, error = %e, "Could not activate instance"),
        }
    }

    fn mark_failed(&self, id: &ResourceId, reason: String) {
        let result = self.store.update(id, |i: &mut Instance| {
            i.meta.transition(ResourceState::Failed)?;
            i.failure_reason = Some(reason.clone());
            Ok(())
        });
        match result {
            Ok(_) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(instance_id = %id, %reason, "Instance failed");
            }
            Err(e) => tracing::warn!(instance_id = %id, error = %e, "Could not mark instance failed"),
        }
    }

    fn spawn_terminate(&self, handle: HypervisorHandle) {
        let hypervisor = Arc::clone(&self.hypervisor);
        let stats = Arc::clone(&self.stats);
        let timeout = self.config.provision_timeout;
        tokio::spawn(async move {
            terminate_detached(hypervisor.as_ref(), &stats, &handle, timeout).await;
        });
    }

    /// Tear down an instance and remove its record.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidTransition`] while the instance is `Pending` or
    ///   already `Deleting`
    /// - [`CoreError::Provision`] if the hypervisor fails to release the
    ///   machine; the instance is left `Failed`
    pub async fn delete_instance(&self, id: &ResourceId) -> Result<Instance> {
        let _guard = self.store.lock(&[id]).await;

        let instance = self
            .store
            .update(id, |i: &mut Instance| i.meta.transition(ResourceState::Deleting))?;
        self.untrack(id);

        if let Some(handle) = &instance.hypervisor_handle {
            let timeout = self.config.provision_timeout;
            let outcome = match tokio::time::timeout(timeout, self.hypervisor.terminate(handle)).await {
                Ok(result) => result,
                Err(_) => Err(HypervisorError::Timeout(timeout)),
            };
            if let Err(e) = outcome {
                self.mark_failed(id, format!("terminate failed: {e}"));
                return Err(CoreError::Provision(e));
            }
            self.stats.terminated.fetch_add(1, Ordering::Relaxed);
        }

        let removed = self.store.delete(id)?;
        let mut instance = Instance::from_resource(removed).ok_or_else(|| CoreError::NotFound(id.clone()))?;
        instance.meta.transition(ResourceState::Deleted)?;

        tracing::info!(instance_id = %id, "Instance deleted");
        Ok(instance)
    }
}

/// Best-effort terminate; failures are only logged.
async fn terminate_detached(
    hypervisor: &dyn Hypervisor,
    stats: &ProvisionerStats,
    handle: &HypervisorHandle,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, hypervisor.terminate(handle)).await {
        Ok(Ok(())) => {
            stats.terminated.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => tracing::warn!(handle = %handle, error = %e, "Best-effort terminate failed"),
        Err(_) => tracing::warn!(handle = %handle, "Best-effort terminate timed out"),
    }
}
