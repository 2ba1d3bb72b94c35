//! Validated inputs to lifecycle operations.
//!
//! These are produced by the API layer after request-shape validation. The
//! manager still checks everything that needs the store (references, CIDR
//! containment, overlaps).

use crate::cidr::Ipv4Cidr;
use crate::id::ResourceId;
use crate::model::{InstanceType, Tags};

/// Parameters for creating a VPC.
#[derive(Debug, Clone)]
pub struct NewVpc {
    pub name: String,
    pub description: String,
    pub cidr_block: Ipv4Cidr,
    pub tags: Tags,
}

/// Mutable VPC fields. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct VpcUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Replaces the whole tag map.
    pub tags: Option<Tags>,
}

impl VpcUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.tags.is_none()
    }
}

/// Mutable subnet fields. The CIDR block and the parent VPC are fixed.
#[derive(Debug, Clone, Default)]
pub struct SubnetUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Replaces the whole tag map.
    pub tags: Option<Tags>,
}

impl SubnetUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.tags.is_none()
    }
}

/// Parameters for creating a subnet.
///
/// The CIDR is kept as submitted so a malformed block is reported by the
/// allocator with the offending text.
#[derive(Debug, Clone)]
pub struct NewSubnet {
    pub name: String,
    pub description: String,
    pub cidr_block: String,
    pub vpc_id: ResourceId,
    pub tags: Tags,
}

/// Parameters for registering an image.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub description: String,
    pub location: String,
    pub operating_system: Option<String>,
    pub tags: Tags,
}

/// Parameters for launching an instance.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub subnet_id: ResourceId,
    pub image_id: ResourceId,
    pub instance_type: InstanceType,
    pub tags: Tags,
}
