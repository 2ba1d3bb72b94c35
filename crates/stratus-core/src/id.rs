//! Resource identifiers and kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of hex characters after the kind prefix.
const ID_SUFFIX_LEN: usize = 17;

/// The four resource types managed by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Vpc,
    Subnet,
    Image,
    Instance,
}

impl ResourceKind {
    /// All kinds, parents before children.
    pub const ALL: [ResourceKind; 4] = [Self::Vpc, Self::Subnet, Self::Image, Self::Instance];

    /// ID prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::Image => "image",
            Self::Instance => "i",
        }
    }

    /// Plural name used as the key of list responses.
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Vpc => "vpcs",
            Self::Subnet => "subnets",
            Self::Image => "images",
            Self::Instance => "instances",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vpc => write!(f, "vpc"),
            Self::Subnet => write!(f, "subnet"),
            Self::Image => write!(f, "image"),
            Self::Instance => write!(f, "instance"),
        }
    }
}

/// Opaque, server-generated resource identifier such as `vpc-0a1b2c3d4e5f67890`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Generate a fresh ID for the given kind.
    pub fn generate(kind: ResourceKind) -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", kind.prefix(), &hex[..ID_SUFFIX_LEN]))
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The random part of the ID, without the kind prefix.
    pub fn suffix(&self) -> &str {
        self.0.split_once('-').map(|(_, s)| s).unwrap_or(&self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_format() {
        let id = ResourceId::generate(ResourceKind::Vpc);
        assert!(id.as_str().starts_with("vpc-"));
        assert_eq!(id.suffix().len(), ID_SUFFIX_LEN);

        let id = ResourceId::generate(ResourceKind::Instance);
        assert!(id.as_str().starts_with("i-"));
    }

    #[test]
    fn test_generate_unique() {
        let a = ResourceId::generate(ResourceKind::Subnet);
        let b = ResourceId::generate(ResourceKind::Subnet);
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ResourceKind::Vpc.plural(), "vpcs");
        assert_eq!(ResourceKind::Instance.plural(), "instances");
        assert_eq!(ResourceKind::Image.to_string(), "image");
    }
}
