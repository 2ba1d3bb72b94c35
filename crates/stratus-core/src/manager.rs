//! Lifecycle manager.
//!
//! Entry point for every control-plane operation. Each operation takes the
//! per-ID locks of the records it reads and writes, validates everything
//! against the store, and only then commits. A failed operation leaves the
//! store untouched.

use crate::artifact;
use crate::cidr;
use crate::config::{ImageValidation, ManagerConfig};
use crate::error::{CoreError, Result};
use crate::id::{ResourceId, ResourceKind};
use crate::model::{Image, Instance, Record, ResourceMeta, Subnet, Vpc};
use crate::params::{NewImage, NewInstance, NewSubnet, NewVpc, SubnetUpdate, VpcUpdate};
use crate::poller::StatusPoller;
use crate::provisioner::{Provisioner, ProvisionerStats};
use crate::state::ResourceState;
use crate::store::{Listing, ResourceStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use stratus_hypervisor::Hypervisor;
use tokio::sync::Mutex;

/// What [`LifecycleManager::recover`] changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Non-instance records whose interrupted delete was rolled back.
    pub reverted: usize,
    /// Pending instances handed back to the poller.
    pub retracked: usize,
    /// Instances marked `Failed` because their operation was interrupted.
    pub failed: usize,
}

/// Owns the lifecycle of VPCs, subnets, images and instances.
///
/// # Thread Safety
///
/// All methods take `&self`; share the manager behind an `Arc`. Operations
/// on different IDs run concurrently, operations on the same ID are
/// serialized by the store's per-ID locks.
pub struct LifecycleManager {
    store: ResourceStore,
    config: ManagerConfig,
    provisioner: Arc<Provisioner>,
    poller: Mutex<StatusPoller>,
}

impl LifecycleManager {
    /// Create a manager over `store`, provisioning through `hypervisor`.
    ///
    /// The status poller is not started; call [`start()`](Self::start).
    pub fn new(
        store: ResourceStore,
        hypervisor: Arc<dyn Hypervisor>,
        config: ManagerConfig,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            provision_timeout_secs = config.provision_timeout.as_secs(),
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            image_validation = %config.image_validation,
            "Creating lifecycle manager"
        );

        let provisioner = Arc::new(Provisioner::new(store.clone(), hypervisor, config.clone()));
        let poller = StatusPoller::new(Arc::clone(&provisioner), config.poll_interval);
        Ok(Self {
            store,
            config,
            provisioner,
            poller: Mutex::new(poller),
        })
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    pub fn provisioner_stats(&self) -> &ProvisionerStats {
        self.provisioner.stats()
    }

    /// Record counts per kind.
    pub fn counts(&self) -> BTreeMap<ResourceKind, usize> {
        ResourceKind::ALL
            .into_iter()
            .map(|kind| (kind, self.store.count(kind)))
            .collect()
    }

    /// Start the background status poller.
    pub async fn start(&self) {
        self.poller.lock().await.start();
    }

    /// Stop the poller and flush the store.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down lifecycle manager");
        self.poller.lock().await.shutdown().await;
        self.store.clone().close().await
    }

    /// Repair records left mid-operation by a previous process.
    ///
    /// - `Deleting` VPCs, subnets and images go back to `Active`
    /// - `Pending` instances with a hypervisor handle are polled again
    /// - `Pending` instances without a handle, and `Deleting` instances,
    ///   become `Failed`
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport {
            reverted: self.revert_deleting::<Vpc>()?
                + self.revert_deleting::<Subnet>()?
                + self.revert_deleting::<Image>()?,
            ..Default::default()
        };

        let stuck = self.store.list(|i: &Instance| {
            matches!(i.meta.state, ResourceState::Pending | ResourceState::Deleting)
        });
        for instance in stuck {
            let id = instance.meta.id.clone();
            let _guard = self.store.lock(&[&id]).await;

            match (instance.meta.state, instance.hypervisor_handle) {
                (ResourceState::Pending, Some(handle)) => {
                    self.provisioner.track(id, handle);
                    report.retracked += 1;
                }
                (state, _) => {
                    let reason = if state == ResourceState::Pending {
                        "provisioning interrupted"
                    } else {
                        "teardown interrupted"
                    };
                    self.store.update(&id, |i: &mut Instance| {
                        i.meta.transition(ResourceState::Failed)?;
                        i.failure_reason = Some(reason.to_string());
                        Ok(())
                    })?;
                    tracing::warn!(instance_id = %id, reason, "Instance failed during recovery");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            reverted = report.reverted,
            retracked = report.retracked,
            failed = report.failed,
            "Recovery complete"
        );
        Ok(report)
    }

    fn revert_deleting<T: Record>(&self) -> Result<usize> {
        let stuck: Vec<ResourceId> = self
            .store
            .list(|r: &T| r.state() == ResourceState::Deleting)
            .map(|r| r.id().clone())
            .collect();
        for id in &stuck {
            self.store
                .update(id, |r: &mut T| r.meta_mut().transition(ResourceState::Active))?;
            tracing::warn!(id = %id, kind = %T::KIND, "Interrupted delete rolled back");
        }
        Ok(stuck.len())
    }

    // ------------------------------------------------------------------------
    // VPCs
    // ------------------------------------------------------------------------

    /// Create a VPC. VPC blocks may overlap each other.
    pub async fn create_vpc(&self, params: NewVpc) -> Result<Vpc> {
        require_name(&params.name)?;

        let id = ResourceId::generate(ResourceKind::Vpc);
        let _guard = self.store.lock(&[&id]).await;

        let mut vpc = Vpc {
            meta: ResourceMeta::new(id, params.tags),
            name: params.name,
            description: params.description,
            cidr_block: params.cidr_block,
        };
        vpc.meta.transition(ResourceState::Active)?;
        let vpc = self.store.put(vpc)?;

        tracing::info!(vpc_id = %vpc.meta.id, cidr = %vpc.cidr_block, name = %vpc.name, "VPC created");
        Ok(vpc)
    }

    pub fn get_vpc(&self, id: &ResourceId) -> Result<Vpc> {
        self.store.get_as(id)
    }

    pub fn list_vpcs(&self) -> Listing<Vpc> {
        self.store.list_all()
    }

    /// Change a VPC's name, description or tags. The CIDR block is immutable.
    pub async fn update_vpc(&self, id: &ResourceId, update: VpcUpdate) -> Result<Vpc> {
        if let Some(name) = &update.name {
            require_name(name)?;
        }

        let _guard = self.store.lock(&[id]).await;
        if update.is_empty() {
            return self.store.get_as(id);
        }

        let vpc = self.store.update(id, |v: &mut Vpc| {
            if v.meta.state != ResourceState::Active {
                return Err(CoreError::Conflict(format!(
                    "vpc {} is {} and cannot be modified",
                    v.meta.id, v.meta.state
                )));
            }
            if let Some(name) = update.name {
                v.name = name;
            }
            if let Some(description) = update.description {
                v.description = description;
            }
            if let Some(tags) = update.tags {
                v.meta.tags = tags;
            }
            Ok(())
        })?;

        tracing::info!(vpc_id = %id, "VPC updated");
        Ok(vpc)
    }

    /// Delete a VPC that has no subnets.
    pub async fn delete_vpc(&self, id: &ResourceId) -> Result<Vpc> {
        let _guard = self.store.lock(&[id]).await;

        let vpc_id = id.clone();
        let dependents = self
            .store
            .list(move |s: &Subnet| s.vpc_id == vpc_id)
            .map(|s| s.meta.id)
            .collect();
        self.teardown(id, dependents)
    }

    // ------------------------------------------------------------------------
    // Subnets
    // ------------------------------------------------------------------------

    /// Create a subnet inside a VPC.
    ///
    /// The parent VPC is locked for the whole check-and-commit, so two
    /// overlapping creates in one VPC cannot both succeed.
    pub async fn create_subnet(&self, params: NewSubnet) -> Result<Subnet> {
        require_name(&params.name)?;

        let id = ResourceId::generate(ResourceKind::Subnet);
        let _guard = self.store.lock(&[&params.vpc_id, &id]).await;

        let vpc: Vpc = self.store.get_as(&params.vpc_id)?;
        if vpc.meta.state != ResourceState::Active {
            return Err(CoreError::NotFound(vpc.meta.id));
        }

        let vpc_id = vpc.meta.id.clone();
        let siblings: Vec<_> = self
            .store
            .list(move |s: &Subnet| s.vpc_id == vpc_id && s.meta.state != ResourceState::Deleted)
            .map(|s| (s.meta.id, s.cidr_block))
            .collect();
        let cidr_block = cidr::validate_subnet_cidr(&vpc.cidr_block, &params.cidr_block, &siblings)?;

        let mut subnet = Subnet {
            bridge_name: Subnet::bridge_name_for(&id),
            meta: ResourceMeta::new(id, params.tags),
            name: params.name,
            description: params.description,
            cidr_block,
            vpc_id: vpc.meta.id,
        };
        subnet.meta.transition(ResourceState::Active)?;
        let subnet = self.store.put(subnet)?;

        tracing::info!(
            subnet_id = %subnet.meta.id,
            vpc_id = %subnet.vpc_id,
            cidr = %subnet.cidr_block,
            bridge = %subnet.bridge_name,
            "Subnet created"
        );
        Ok(subnet)
    }

    pub fn get_subnet(&self, id: &ResourceId) -> Result<Subnet> {
        self.store.get_as(id)
    }

    /// List subnets, optionally only those of one VPC.
    pub fn list_subnets(&self, vpc_id: Option<ResourceId>) -> Listing<Subnet> {
        self.store
            .list(move |s: &Subnet| vpc_id.as_ref().map_or(true, |v| &s.vpc_id == v))
    }

    /// Change a subnet's name, description or tags.
    pub async fn update_subnet(&self, id: &ResourceId, update: SubnetUpdate) -> Result<Subnet> {
        if let Some(name) = &update.name {
            require_name(name)?;
        }

        let _guard = self.store.lock(&[id]).await;
        if update.is_empty() {
            return self.store.get_as(id);
        }

        let subnet = self.store.update(id, |s: &mut Subnet| {
            if s.meta.state != ResourceState::Active {
                return Err(CoreError::Conflict(format!(
                    "subnet {} is {} and cannot be modified",
                    s.meta.id, s.meta.state
                )));
            }
            if let Some(name) = update.name {
                s.name = name;
            }
            if let Some(description) = update.description {
                s.description = description;
            }
            if let Some(tags) = update.tags {
                s.meta.tags = tags;
            }
            Ok(())
        })?;

        tracing::info!(subnet_id = %id, "Subnet updated");
        Ok(subnet)
    }

    /// Delete a subnet that has no instances.
    pub async fn delete_subnet(&self, id: &ResourceId) -> Result<Subnet> {
        let _guard = self.store.lock(&[id]).await;

        let subnet_id = id.clone();
        let dependents = self
            .store
            .list(move |i: &Instance| i.subnet_id == subnet_id)
            .map(|i| i.meta.id)
            .collect();
        self.teardown(id, dependents)
    }

    // ------------------------------------------------------------------------
    // Images
    // ------------------------------------------------------------------------

    /// Register an image.
    ///
    /// In eager mode the artifact must be readable now; in lazy mode the
    /// check is deferred to instance launch.
    pub async fn create_image(&self, params: NewImage) -> Result<Image> {
        match self.config.image_validation {
            ImageValidation::Eager => artifact::verify_artifact(&params.location).await?,
            ImageValidation::Lazy if params.location.trim().is_empty() => {
                return Err(CoreError::field("location", "is required"));
            }
            ImageValidation::Lazy => {}
        }

        let id = ResourceId::generate(ResourceKind::Image);
        let _guard = self.store.lock(&[&id]).await;

        let mut image = Image {
            meta: ResourceMeta::new(id, params.tags),
            description: params.description,
            location: params.location,
            operating_system: params.operating_system,
        };
        image.meta.transition(ResourceState::Active)?;
        let image = self.store.put(image)?;

        tracing::info!(image_id = %image.meta.id, location = %image.location, "Image registered");
        Ok(image)
    }

    pub fn get_image(&self, id: &ResourceId) -> Result<Image> {
        self.store.get_as(id)
    }

    pub fn list_images(&self) -> Listing<Image> {
        self.store.list_all()
    }

    /// Delete an image that no instance boots from.
    pub async fn delete_image(&self, id: &ResourceId) -> Result<Image> {
        let _guard = self.store.lock(&[id]).await;

        let image_id = id.clone();
        let dependents = self
            .store
            .list(move |i: &Instance| i.image_id == image_id)
            .map(|i| i.meta.id)
            .collect();
        self.teardown(id, dependents)
    }

    // ------------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------------

    /// Launch an instance. Returns the record in `Pending`.
    pub async fn create_instance(&self, params: NewInstance) -> Result<Instance> {
        self.provisioner.create_instance(params).await
    }

    pub fn get_instance(&self, id: &ResourceId) -> Result<Instance> {
        self.store.get_as(id)
    }

    /// List instances, optionally only those of one subnet.
    pub fn list_instances(&self, subnet_id: Option<ResourceId>) -> Listing<Instance> {
        self.store
            .list(move |i: &Instance| subnet_id.as_ref().map_or(true, |s| &i.subnet_id == s))
    }

    /// Terminate an instance and remove it.
    pub async fn delete_instance(&self, id: &ResourceId) -> Result<Instance> {
        self.provisioner.delete_instance(id).await
    }

    // ------------------------------------------------------------------------
    // Shared teardown
    // ------------------------------------------------------------------------

    /// Delete a record that needs no external cleanup. Caller holds the lock.
    fn teardown<T: Record>(&self, id: &ResourceId, dependents: Vec<ResourceId>) -> Result<T> {
        let current: T = self.store.get_as(id)?;
        current.state().check_transition(id, ResourceState::Deleting)?;
        if !dependents.is_empty() {
            tracing::debug!(id = %id, dependents = dependents.len(), "Delete blocked by dependents");
            return Err(CoreError::Dependency {
                id: id.clone(),
                dependents,
            });
        }

        self.store
            .update(id, |r: &mut T| r.meta_mut().transition(ResourceState::Deleting))?;
        let removed = self.store.delete(id)?;
        let mut record = T::from_resource(removed).ok_or_else(|| CoreError::NotFound(id.clone()))?;
        record.meta_mut().transition(ResourceState::Deleted)?;

        tracing::info!(id = %id, kind = %T::KIND, "Resource deleted");
        Ok(record)
    }
}

fn require_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CoreError::field("name", "must not be empty"));
    }
    Ok(())
}
