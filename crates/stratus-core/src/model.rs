//! Resource records.

use crate::cidr::Ipv4Cidr;
use crate::error::{CoreError, Result};
use crate::id::{ResourceId, ResourceKind};
use crate::state::ResourceState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use stratus_hypervisor::HypervisorHandle;

/// Free-form key/value labels.
pub type Tags = BTreeMap<String, String>;

/// Fields shared by every record.
///
/// `created_at` and `updated_at` are written by the
/// [`ResourceStore`](crate::ResourceStore) only; values set elsewhere are
/// overwritten on commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMeta {
    pub id: ResourceId,
    pub state: ResourceState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
}

impl ResourceMeta {
    /// Metadata for a record that has not been committed yet.
    pub fn new(id: ResourceId, tags: Tags) -> Self {
        Self {
            id,
            state: ResourceState::Pending,
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            tags,
        }
    }

    /// Move to `next` if the state machine allows it.
    pub fn transition(&mut self, next: ResourceState) -> Result<()> {
        self.state.check_transition(&self.id, next)?;
        tracing::trace!(id = %self.id, from = %self.state, to = %next, "State transition");
        self.state = next;
        Ok(())
    }
}

/// Isolated virtual network bounding a CIDR address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vpc {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cidr_block: Ipv4Cidr,
}

/// Sub-range of a VPC's address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cidr_block: Ipv4Cidr,
    pub vpc_id: ResourceId,
    /// Virtual switch the subnet is realised on.
    pub bridge_name: String,
}

impl Subnet {
    /// Bridge name for a subnet, kept within the 15-byte interface name limit.
    pub fn bridge_name_for(id: &ResourceId) -> String {
        let mut name = format!("br-{}", id.suffix());
        name.truncate(15);
        name
    }
}

/// Boot artifact for instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub description: String,
    /// Path or URI of the backing artifact.
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<String>,
}

/// Compute unit attached to a subnet and booted from an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub subnet_id: ResourceId,
    pub vpc_id: ResourceId,
    pub image_id: ResourceId,
    pub instance_type: InstanceType,
    pub private_ip_address: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor_handle: Option<HypervisorHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Size class of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceType {
    #[serde(rename = "t4.nano")]
    Nano,
    #[serde(rename = "t4.micro")]
    Micro,
    #[serde(rename = "t4.small")]
    Small,
    #[serde(rename = "t4.medium")]
    Medium,
    #[serde(rename = "t4.large")]
    Large,
    #[serde(rename = "t4.xlarge")]
    XLarge,
}

impl InstanceType {
    pub const ALL: [InstanceType; 6] = [
        Self::Nano,
        Self::Micro,
        Self::Small,
        Self::Medium,
        Self::Large,
        Self::XLarge,
    ];

    /// Wire name, e.g. `t4.small`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nano => "t4.nano",
            Self::Micro => "t4.micro",
            Self::Small => "t4.small",
            Self::Medium => "t4.medium",
            Self::Large => "t4.large",
            Self::XLarge => "t4.xlarge",
        }
    }

    pub fn vcpus(&self) -> u8 {
        match self {
            Self::Nano | Self::Micro | Self::Small => 1,
            Self::Medium | Self::Large => 2,
            Self::XLarge => 4,
        }
    }

    pub fn memory_mib(&self) -> u32 {
        match self {
            Self::Nano => 512,
            Self::Micro => 1024,
            Self::Small => 2048,
            Self::Medium => 4096,
            Self::Large => 8192,
            Self::XLarge => 16384,
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InstanceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = Self::ALL.iter().map(|t| t.name()).collect();
                CoreError::field(
                    "instanceType",
                    format!("unknown instance type {:?}, expected one of {}", s, valid.join(", ")),
                )
            })
    }
}

/// Any record held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Resource {
    Vpc(Vpc),
    Subnet(Subnet),
    Image(Image),
    Instance(Instance),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Vpc(_) => ResourceKind::Vpc,
            Self::Subnet(_) => ResourceKind::Subnet,
            Self::Image(_) => ResourceKind::Image,
            Self::Instance(_) => ResourceKind::Instance,
        }
    }

    pub fn meta(&self) -> &ResourceMeta {
        match self {
            Self::Vpc(r) => &r.meta,
            Self::Subnet(r) => &r.meta,
            Self::Image(r) => &r.meta,
            Self::Instance(r) => &r.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ResourceMeta {
        match self {
            Self::Vpc(r) => &mut r.meta,
            Self::Subnet(r) => &mut r.meta,
            Self::Image(r) => &mut r.meta,
            Self::Instance(r) => &mut r.meta,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.meta().id
    }
}

/// A concrete record type that can be stored and fetched by type.
pub trait Record: Clone + Send + Sync + 'static {
    /// Kind stored under.
    const KIND: ResourceKind;

    fn meta(&self) -> &ResourceMeta;

    fn meta_mut(&mut self) -> &mut ResourceMeta;

    fn into_resource(self) -> Resource;

    /// Downcast, returning `None` for a record of another kind.
    fn from_resource(resource: Resource) -> Option<Self>;

    fn id(&self) -> &ResourceId {
        &self.meta().id
    }

    fn state(&self) -> ResourceState {
        self.meta().state
    }
}

macro_rules! impl_record {
    ($ty:ident, $kind:ident) => {
        impl Record for $ty {
            const KIND: ResourceKind = ResourceKind::$kind;

            fn meta(&self) -> &ResourceMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ResourceMeta {
                &mut self.meta
            }

            fn into_resource(self) -> Resource {
                Resource::$kind(self)
            }

            fn from_resource(resource: Resource) -> Option<Self> {
                match resource {
                    Resource::$kind(r) => Some(r),
                    _ => None,
                }
            }
        }
    };
}

impl_record!(Vpc, Vpc);
impl_record!(Subnet, Subnet);
impl_record!(Image, Image);
impl_record!(Instance, Instance);
