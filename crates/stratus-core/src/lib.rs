//! # stratus-core
//!
//! Control-plane core for Stratus: the resource store, CIDR validation and
//! address allocation, the lifecycle state machine, and instance
//! provisioning.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   stratus-core (host)                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌──────────────────┐     ┌──────────────────────────┐   │
//! │  │ LifecycleManager │────▶│  ResourceStore           │   │
//! │  │  - create_*()    │     │   HashMap<ResourceId,    │   │
//! │  │  - delete_*()    │     │           Resource>      │   │
//! │  │  - recover()     │     │   per-ID locks, snapshot │   │
//! │  └──────────────────┘     └──────────────────────────┘   │
//! │     │           │                     ▲                  │
//! │     ▼           ▼                     │                  │
//! │  ┌────────┐  ┌──────────────────┐     │                  │
//! │  │  cidr  │  │   Provisioner    │─────┘                  │
//! │  │validate│  │ - create_instance│◀──── StatusPoller      │
//! │  │allocate│  │ - poll_once      │      (interval task)   │
//! │  └────────┘  └──────────────────┘                        │
//! │                       │                                  │
//! └───────────────────────┼──────────────────────────────────┘
//!                         ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │           dyn Hypervisor (stratus-hypervisor)            │
//! │          provision / status / terminate                  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use stratus_core::{LifecycleManager, ManagerConfig, NewSubnet, NewVpc, ResourceStore, Tags};
//! use stratus_hypervisor::SimulatedHypervisor;
//!
//! # async fn example() -> stratus_core::Result<()> {
//! let manager = LifecycleManager::new(
//!     ResourceStore::open("/var/lib/stratus/store.json").await?,
//!     Arc::new(SimulatedHypervisor::new()),
//!     ManagerConfig::default(),
//! )?;
//! manager.recover().await?;
//! manager.start().await;
//!
//! let vpc = manager
//!     .create_vpc(NewVpc {
//!         name: "autovpc".into(),
//!         description: "automation vpc".into(),
//!         cidr_block: "10.0.0.0/16".parse()?,
//!         tags: Tags::new(),
//!     })
//!     .await?;
//!
//! let subnet = manager
//!     .create_subnet(NewSubnet {
//!         name: "autosubnet".into(),
//!         description: String::new(),
//!         cidr_block: "10.0.1.0/24".into(),
//!         vpc_id: vpc.meta.id.clone(),
//!         tags: Tags::new(),
//!     })
//!     .await?;
//! println!("{} on {}", subnet.meta.id, subnet.bridge_name);
//!
//! manager.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Resource Store**: atomic record replacement, lazy restartable listings,
//!   per-ID locks and JSON snapshots
//! - **CIDR Checks**: subnet containment and sibling overlap on numeric ranges
//! - **Dependency-Aware Deletes**: instances block subnets and images,
//!   subnets block their VPC
//! - **Asynchronous Provisioning**: instances go `Pending → Active` through a
//!   background poller with a bounded wait

mod artifact;
mod cidr;
mod config;
mod error;
mod id;
mod manager;
mod model;
mod params;
mod poller;
mod provisioner;
mod state;
mod store;

pub use artifact::{is_remote, verify_artifact};
pub use cidr::{allocate_host, validate_subnet_cidr, CidrError, Ipv4Cidr};
pub use config::{ImageValidation, ManagerConfig, ManagerConfigBuilder};
pub use error::{CoreError, FieldError, Result};
pub use id::{ResourceId, ResourceKind};
pub use manager::{LifecycleManager, RecoveryReport};
pub use model::{Image, Instance, InstanceType, Record, Resource, ResourceMeta, Subnet, Tags, Vpc};
pub use params::{NewImage, NewInstance, NewSubnet, NewVpc, SubnetUpdate, VpcUpdate};
pub use poller::StatusPoller;
pub use provisioner::{Provisioner, ProvisionerStats};
pub use state::ResourceState;
pub use store::{Listing, LockGuard, ResourceStore};
