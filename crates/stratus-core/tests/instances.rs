//! Integration tests for instance provisioning against the simulated
//! hypervisor. Time is paused, so boot delays and timeouts run instantly.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use stratus_core::{
    CoreError, ImageValidation, Instance, InstanceType, LifecycleManager, ManagerConfig, NewImage,
    NewInstance, NewSubnet, NewVpc, ResourceId, ResourceKind, ResourceMeta, ResourceState,
    ResourceStore, Tags,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use stratus_hypervisor::{
    Hypervisor, HypervisorError, HypervisorHandle, InstanceSpec, ProvisionStatus,
    SimulatedBehavior, SimulatedHypervisor,
};

const IMAGE_URL: &str = "https://images.example.com/cirros-0.6.2.img";

struct Fixture {
    manager: Arc<LifecycleManager>,
    hypervisor: Arc<SimulatedHypervisor>,
    subnet_id: ResourceId,
    image_id: ResourceId,
}

async fn fixture() -> Fixture {
    let hypervisor = Arc::new(SimulatedHypervisor::with_boot_delay(Duration::from_millis(500)));
    let config = ManagerConfig::builder()
        .provision_timeout(Duration::from_secs(2))
        .poll_interval(Duration::from_millis(100))
        .build()
        .unwrap();
    let manager = Arc::new(
        LifecycleManager::new(ResourceStore::in_memory(), hypervisor.clone(), config).unwrap(),
    );
    manager.start().await;

    let (subnet_id, image_id) = place(&manager).await;
    Fixture {
        manager,
        hypervisor,
        subnet_id,
        image_id,
    }
}

/// Create a VPC, a subnet and an image to launch into.
async fn place(manager: &LifecycleManager) -> (ResourceId, ResourceId) {
    let vpc = manager
        .create_vpc(NewVpc {
            name: "autovpc".into(),
            description: String::new(),
            cidr_block: "10.0.0.0/16".parse().unwrap(),
            tags: Tags::new(),
        })
        .await
        .unwrap();
    let subnet = manager
        .create_subnet(NewSubnet {
            name: "autosubnet".into(),
            description: String::new(),
            cidr_block: "10.0.1.0/24".into(),
            vpc_id: vpc.meta.id,
            tags: Tags::new(),
        })
        .await
        .unwrap();
    let image = manager
        .create_image(NewImage {
            description: "cirros".into(),
            location: IMAGE_URL.into(),
            operating_system: Some("cirros".into()),
            tags: Tags::new(),
        })
        .await
        .unwrap();

    (subnet.meta.id, image.meta.id)
}

impl Fixture {
    async fn launch(&self) -> stratus_core::Result<Instance> {
        self.manager
            .create_instance(NewInstance {
                subnet_id: self.subnet_id.clone(),
                image_id: self.image_id.clone(),
                instance_type: InstanceType::Small,
                tags: Tags::new(),
            })
            .await
    }

    fn state(&self, id: &ResourceId) -> ResourceState {
        self.manager.get_instance(id).unwrap().meta.state
    }
}

#[tokio::test(start_paused = true)]
async fn test_instance_becomes_active() {
    let f = fixture().await;

    let instance = f.launch().await.unwrap();
    assert_eq!(instance.meta.state, ResourceState::Pending);
    assert_eq!(instance.private_ip_address, Ipv4Addr::new(10, 0, 1, 2));
    assert_eq!(instance.instance_type, InstanceType::Small);
    assert!(instance.meta.id.as_str().starts_with("i-"));

    tokio::time::sleep(Duration::from_secs(1)).await;

    let active = f.manager.get_instance(&instance.meta.id).unwrap();
    assert_eq!(active.meta.state, ResourceState::Active);
    let handle = active.hypervisor_handle.expect("handle recorded");

    let spec = f.hypervisor.spec_of(&handle).unwrap();
    assert_eq!(spec.vcpu_count, 1);
    assert_eq!(spec.memory_mib, 2048);
    assert_eq!(spec.image_location, IMAGE_URL);
    let network = spec.network.unwrap();
    assert_eq!(network.ip_address, Ipv4Addr::new(10, 0, 1, 2));
    assert_eq!(network.prefix_len, 24);

    assert_eq!(f.manager.provisioner_stats().activated(), 1);
    f.manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_addresses_are_unique_per_subnet() {
    let f = fixture().await;

    let a = f.launch().await.unwrap();
    let b = f.launch().await.unwrap();
    assert_eq!(a.private_ip_address, Ipv4Addr::new(10, 0, 1, 2));
    assert_eq!(b.private_ip_address, Ipv4Addr::new(10, 0, 1, 3));

    let listed: Vec<_> = f
        .manager
        .list_instances(Some(f.subnet_id.clone()))
        .map(|i| i.meta.id)
        .collect();
    assert_eq!(listed, [a.meta.id, b.meta.id]);
    f.manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hung_boot_times_out() {
    let f = fixture().await;
    f.hypervisor.set_behavior(SimulatedBehavior::Hang);

    let instance = f.launch().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let failed = f.manager.get_instance(&instance.meta.id).unwrap();
    assert_eq!(failed.meta.state, ResourceState::Failed);
    assert!(failed.failure_reason.unwrap().contains("timed out"));
    // best-effort cleanup released the machine
    assert_eq!(f.hypervisor.machine_count(), 0);
    f.manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rejected_provision_fails_instance() {
    let f = fixture().await;
    f.hypervisor
        .set_behavior(SimulatedBehavior::RejectProvision("no capacity".into()));

    let instance = f.launch().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let failed = f.manager.get_instance(&instance.meta.id).unwrap();
    assert_eq!(failed.meta.state, ResourceState::Failed);
    assert!(failed.failure_reason.unwrap().contains("no capacity"));
    assert!(failed.hypervisor_handle.is_none());

    // a failed instance can still be deleted
    let deleted = f.manager.delete_instance(&instance.meta.id).await.unwrap();
    assert_eq!(deleted.meta.state, ResourceState::Deleted);
    f.manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_boot_reported_by_poller() {
    let f = fixture().await;
    f.hypervisor
        .set_behavior(SimulatedBehavior::FailBoot("kernel panic".into()));

    let instance = f.launch().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let failed = f.manager.get_instance(&instance.meta.id).unwrap();
    assert_eq!(failed.meta.state, ResourceState::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("kernel panic"));
    f.manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_delete_while_pending_conflicts() {
    let f = fixture().await;

    let instance = f.launch().await.unwrap();
    let err = f.manager.delete_instance(&instance.meta.id).await.unwrap_err();
    assert_eq!(err.code(), "ConflictError");
    assert_eq!(f.state(&instance.meta.id), ResourceState::Pending);
    f.manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_delete_active_instance_then_subnet() {
    let f = fixture().await;

    let instance = f.launch().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(f.state(&instance.meta.id), ResourceState::Active);

    let err = f.manager.delete_subnet(&f.subnet_id).await.unwrap_err();
    match err {
        CoreError::Dependency { dependents, .. } => assert_eq!(dependents, [instance.meta.id.clone()]),
        other => panic!("expected dependency error, got {other:?}"),
    }
    let err = f.manager.delete_image(&f.image_id).await.unwrap_err();
    assert_eq!(err.code(), "DependencyError");

    let deleted = f.manager.delete_instance(&instance.meta.id).await.unwrap();
    assert_eq!(deleted.meta.state, ResourceState::Deleted);
    assert_eq!(f.hypervisor.machine_count(), 0);
    assert!(f.manager.get_instance(&instance.meta.id).unwrap_err().is_not_found());

    f.manager.delete_subnet(&f.subnet_id).await.unwrap();
    f.manager.delete_image(&f.image_id).await.unwrap();
    f.manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_terminate_surfaces_provision_error() {
    let f = fixture().await;

    let instance = f.launch().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    f.hypervisor
        .set_behavior(SimulatedBehavior::RejectTerminate("host unreachable".into()));
    let err = f.manager.delete_instance(&instance.meta.id).await.unwrap_err();
    assert_eq!(err.code(), "ProvisionError");

    let failed = f.manager.get_instance(&instance.meta.id).unwrap();
    assert_eq!(failed.meta.state, ResourceState::Failed);
    assert!(failed.failure_reason.unwrap().contains("host unreachable"));

    // retry once the host is back
    f.hypervisor.set_behavior(SimulatedBehavior::Boot);
    f.manager.delete_instance(&instance.meta.id).await.unwrap();
    f.manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_missing_image_creates_nothing() {
    let f = fixture().await;

    let err = f
        .manager
        .create_instance(NewInstance {
            subnet_id: f.subnet_id.clone(),
            image_id: ResourceId::from("image-00000000000000000"),
            instance_type: InstanceType::Nano,
            tags: Tags::new(),
        })
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(f.manager.list_instances(None).count(), 0);
    assert_eq!(f.hypervisor.provisioned_total(), 0);
    f.manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_full_subnet_is_conflict() {
    let f = fixture().await;
    let tiny = f
        .manager
        .create_subnet(NewSubnet {
            name: "tiny".into(),
            description: String::new(),
            cidr_block: "10.0.9.0/30".into(),
            vpc_id: f.manager.get_subnet(&f.subnet_id).unwrap().vpc_id,
            tags: Tags::new(),
        })
        .await
        .unwrap();

    let params = NewInstance {
        subnet_id: tiny.meta.id.clone(),
        image_id: f.image_id.clone(),
        instance_type: InstanceType::Nano,
        tags: Tags::new(),
    };

    // a /30 has a single allocatable host after the gateway
    let only = f.manager.create_instance(params.clone()).await.unwrap();
    assert_eq!(only.private_ip_address, Ipv4Addr::new(10, 0, 9, 2));
    let err = f.manager.create_instance(params).await.unwrap_err();
    assert_eq!(err.code(), "ConflictError");
    f.manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lazy_validation_checks_at_launch() {
    let hypervisor = Arc::new(SimulatedHypervisor::new());
    let config = ManagerConfig::builder()
        .image_validation(ImageValidation::Lazy)
        .build()
        .unwrap();
    let manager = LifecycleManager::new(ResourceStore::in_memory(), hypervisor.clone(), config).unwrap();

    let vpc = manager
        .create_vpc(NewVpc {
            name: "v".into(),
            description: String::new(),
            cidr_block: "10.0.0.0/16".parse().unwrap(),
            tags: Tags::new(),
        })
        .await
        .unwrap();
    let subnet = manager
        .create_subnet(NewSubnet {
            name: "s".into(),
            description: String::new(),
            cidr_block: "10.0.0.0/24".into(),
            vpc_id: vpc.meta.id,
            tags: Tags::new(),
        })
        .await
        .unwrap();

    // registration succeeds even though the artifact is missing
    let image = manager
        .create_image(NewImage {
            description: String::new(),
            location: "/nonexistent/stratus/lazy.img".into(),
            operating_system: None,
            tags: Tags::new(),
        })
        .await
        .unwrap();

    let err = manager
        .create_instance(NewInstance {
            subnet_id: subnet.meta.id,
            image_id: image.meta.id,
            instance_type: InstanceType::Micro,
            tags: Tags::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ValidationError");
    assert_eq!(manager.list_instances(None).count(), 0);
    assert_eq!(hypervisor.provisioned_total(), 0);
}

#[tokio::test]
async fn test_recover_pending_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    let orphan = ResourceId::generate(ResourceKind::Instance);
    {
        let store = ResourceStore::open(&path).await.unwrap();
        store
            .put(Instance {
                meta: ResourceMeta::new(orphan.clone(), Tags::new()),
                subnet_id: ResourceId::from("subnet-00000000000000000"),
                vpc_id: ResourceId::from("vpc-00000000000000000"),
                image_id: ResourceId::from("image-00000000000000000"),
                instance_type: InstanceType::Nano,
                private_ip_address: Ipv4Addr::new(10, 0, 0, 2),
                hypervisor_handle: None,
                failure_reason: None,
            })
            .unwrap();
        store.close().await.unwrap();
    }

    let manager = LifecycleManager::new(
        ResourceStore::open(&path).await.unwrap(),
        Arc::new(SimulatedHypervisor::new()),
        ManagerConfig::default(),
    )
    .unwrap();
    let report = manager.recover().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.retracked, 0);

    let instance = manager.get_instance(&orphan).unwrap();
    assert_eq!(instance.meta.state, ResourceState::Failed);
    assert_eq!(instance.failure_reason.as_deref(), Some("provisioning interrupted"));
}

// ============================================================================
// Misbehaving hypervisors
// ============================================================================

/// The first machine never boots and cannot be terminated; every later
/// machine reports `Active` after a short status round trip.
#[derive(Default)]
struct StuckFirstMachine {
    provisioned: Mutex<u32>,
}

#[async_trait]
impl Hypervisor for StuckFirstMachine {
    async fn provision(&self, _spec: &InstanceSpec) -> stratus_hypervisor::Result<HypervisorHandle> {
        let mut n = self.provisioned.lock();
        let handle = HypervisorHandle::new(format!("h{}", *n));
        *n += 1;
        Ok(handle)
    }

    async fn status(&self, handle: &HypervisorHandle) -> stratus_hypervisor::Result<ProvisionStatus> {
        if handle.as_str() == "h0" {
            return Ok(ProvisionStatus::Pending);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(ProvisionStatus::Active)
    }

    async fn terminate(&self, _handle: &HypervisorHandle) -> stratus_hypervisor::Result<()> {
        std::future::pending().await
    }
}

/// Creates the machine but never answers the first provision call for an
/// instance; repeating the call returns the existing handle.
#[derive(Default)]
struct SilentAck {
    machines: Mutex<HashMap<String, HypervisorHandle>>,
}

#[async_trait]
impl Hypervisor for SilentAck {
    async fn provision(&self, spec: &InstanceSpec) -> stratus_hypervisor::Result<HypervisorHandle> {
        let existing = {
            let mut machines = self.machines.lock();
            match machines.get(&spec.instance_id) {
                Some(handle) => Some(handle.clone()),
                None => {
                    let handle = HypervisorHandle::new(format!("m-{}", spec.instance_id));
                    machines.insert(spec.instance_id.clone(), handle);
                    None
                }
            }
        };
        match existing {
            Some(handle) => Ok(handle),
            None => std::future::pending().await,
        }
    }

    async fn status(&self, handle: &HypervisorHandle) -> stratus_hypervisor::Result<ProvisionStatus> {
        Err(HypervisorError::UnknownHandle(handle.clone()))
    }

    async fn terminate(&self, handle: &HypervisorHandle) -> stratus_hypervisor::Result<()> {
        self.machines.lock().retain(|_, h| h != handle);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_hung_terminate_does_not_stall_polling() {
    let hypervisor = Arc::new(StuckFirstMachine::default());
    let config = ManagerConfig::builder()
        .provision_timeout(Duration::from_secs(10))
        .poll_interval(Duration::from_secs(1))
        .build()
        .unwrap();
    let manager = Arc::new(
        LifecycleManager::new(ResourceStore::in_memory(), hypervisor, config).unwrap(),
    );
    manager.start().await;
    let (subnet_id, image_id) = place(&manager).await;
    let launch = || NewInstance {
        subnet_id: subnet_id.clone(),
        image_id: image_id.clone(),
        instance_type: InstanceType::Nano,
        tags: Tags::new(),
    };

    let a = manager.create_instance(launch()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    let b = manager.create_instance(launch()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    let a = manager.get_instance(&a.meta.id).unwrap();
    let b = manager.get_instance(&b.meta.id).unwrap();
    assert_eq!(a.meta.state, ResourceState::Failed);
    assert_eq!(b.meta.state, ResourceState::Active);

    // still active once its own deadline has passed
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(manager.get_instance(&b.meta.id).unwrap().meta.state, ResourceState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_provision_is_reclaimed() {
    let hypervisor = Arc::new(SilentAck::default());
    let config = ManagerConfig::builder()
        .provision_timeout(Duration::from_secs(2))
        .poll_interval(Duration::from_millis(100))
        .build()
        .unwrap();
    let manager = Arc::new(
        LifecycleManager::new(ResourceStore::in_memory(), hypervisor.clone(), config).unwrap(),
    );
    manager.start().await;
    let (subnet_id, image_id) = place(&manager).await;

    let instance = manager
        .create_instance(NewInstance {
            subnet_id,
            image_id,
            instance_type: InstanceType::Nano,
            tags: Tags::new(),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hypervisor.machines.lock().len(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let failed = manager.get_instance(&instance.meta.id).unwrap();
    assert_eq!(failed.meta.state, ResourceState::Failed);
    assert!(failed.failure_reason.unwrap().contains("timed out"));
    assert!(hypervisor.machines.lock().is_empty());
}
