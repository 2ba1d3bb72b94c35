//! Resource lifecycle states.

use crate::error::{CoreError, Result};
use crate::id::ResourceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state shared by every resource type.
///
/// ```text
/// Pending ──▶ Active ──▶ Deleting ──▶ Deleted
///    │                      │
///    └──────▶ Failed ◀──────┘
/// ```
///
/// VPCs, subnets and images go `Pending → Active` inside the create call.
/// Instances wait in `Pending` for the hypervisor. `Failed` ends
/// provisioning; a failed instance can still be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceState {
    Pending,
    Active,
    Deleting,
    Deleted,
    Failed,
}

impl ResourceState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ResourceState) -> bool {
        use ResourceState::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Failed)
                | (Active, Deleting)
                | (Failed, Deleting)
                | (Deleting, Deleted)
                | (Deleting, Failed)
                // teardown aborted before anything was released
                | (Deleting, Active)
        )
    }

    /// Check a transition, producing a conflict error naming the resource.
    pub fn check_transition(self, id: &ResourceId, next: ResourceState) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                id: id.clone(),
                from: self,
                to: next,
            })
        }
    }

    /// No further provisioning progress is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted | Self::Failed)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Active => write!(f, "Active"),
            Self::Deleting => write!(f, "Deleting"),
            Self::Deleted => write!(f, "Deleted"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
