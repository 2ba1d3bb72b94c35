//! IPv4 CIDR blocks, subnet validation and host address allocation.
//!
//! Blocks wrap [`ipnet::Ipv4Net`]. Containment and overlap work on the
//! numeric range `[network, broadcast]` derived from the prefix length.

use crate::error::{CoreError, FieldError};
use crate::id::ResourceId;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Errors from CIDR parsing and subnet validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidrError {
    /// Not a well-formed IPv4 CIDR block
    #[error("invalid CIDR block {input:?}: {reason}")]
    Malformed { input: String, reason: String },

    /// Block is well formed but falls outside the parent
    #[error("{cidr} is not within {parent}")]
    NotWithin { cidr: Ipv4Cidr, parent: Ipv4Cidr },

    /// Block intersects a sibling
    #[error("{cidr} overlaps {sibling_cidr} of subnet {sibling}")]
    Overlap {
        cidr: Ipv4Cidr,
        sibling: ResourceId,
        sibling_cidr: Ipv4Cidr,
    },
}

impl CidrError {
    fn malformed(input: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<CidrError> for CoreError {
    fn from(err: CidrError) -> Self {
        match err {
            CidrError::Overlap {
                cidr,
                sibling,
                sibling_cidr,
            } => CoreError::Overlap {
                cidr: cidr.to_string(),
                sibling,
                sibling_cidr: sibling_cidr.to_string(),
            },
            other => CoreError::Validation(vec![FieldError::new("cidrBlock", other.to_string())]),
        }
    }
}

/// An IPv4 network in CIDR notation, e.g. `10.0.0.0/16`.
///
/// Host bits must be zero; `10.0.0.1/16` is rejected rather than silently
/// truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    net: Ipv4Net,
}

impl Ipv4Cidr {
    /// Build a block from a network address and prefix length.
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self, CidrError> {
        let net = Ipv4Net::new(network, prefix_len).map_err(|_| {
            CidrError::malformed(&format!("{network}/{prefix_len}"), "prefix length must be 0-32")
        })?;
        Self::from_net(net)
    }

    fn from_net(net: Ipv4Net) -> Result<Self, CidrError> {
        if net != net.trunc() {
            return Err(CidrError::malformed(
                &net.to_string(),
                format!("host bits are set (network address is {})", net.network()),
            ));
        }
        Ok(Self { net })
    }

    /// Network address.
    pub fn network(&self) -> Ipv4Addr {
        self.net.network()
    }

    /// Broadcast (last) address.
    pub fn broadcast(&self) -> Ipv4Addr {
        self.net.broadcast()
    }

    /// Prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    /// Number of addresses in the block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len()))
    }

    /// Whether `other` lies entirely inside this block.
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        self.net.contains(&other.net)
    }

    /// Whether the address lies inside this block.
    pub fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        self.net.contains(&addr)
    }

    /// Whether the two blocks share at least one address.
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.network() <= other.broadcast() && other.network() <= self.broadcast()
    }

    /// Conventional gateway address (first host), if the block has hosts.
    pub fn gateway(&self) -> Option<Ipv4Addr> {
        if self.prefix_len() > 30 {
            return None;
        }
        self.net.hosts().next()
    }

    /// Usable host addresses, excluding network and broadcast.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        self.net.hosts()
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| CidrError::malformed(s, "expected <address>/<prefix>"))?;

        if prefix.is_empty() || prefix.len() > 2 || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CidrError::malformed(s, "prefix length must be 0-32"));
        }

        let net: Ipv4Net = s.parse().map_err(|_| {
            if addr.parse::<Ipv4Addr>().is_err() {
                CidrError::malformed(s, format!("{:?} is not an IPv4 address", addr))
            } else {
                CidrError::malformed(s, "prefix length must be 0-32")
            }
        })?;

        Self::from_net(net).map_err(|e| match e {
            CidrError::Malformed { reason, .. } => CidrError::malformed(s, reason),
            other => other,
        })
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = CidrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.net, f)
    }
}

/// Validate a proposed subnet block against its VPC and its siblings.
///
/// `siblings` must only contain live subnets of the same VPC; a block freed by
/// a deleted subnet can be reused.
///
/// # Errors
///
/// - [`CidrError::Malformed`] if `proposed` does not parse
/// - [`CidrError::NotWithin`] if it is not a subset of `vpc_cidr`
/// - [`CidrError::Overlap`] naming the first sibling it intersects
pub fn validate_subnet_cidr(
    vpc_cidr: &Ipv4Cidr,
    proposed: &str,
    siblings: &[(ResourceId, Ipv4Cidr)],
) -> Result<Ipv4Cidr, CidrError> {
    let cidr: Ipv4Cidr = proposed.trim().parse()?;

    if !vpc_cidr.contains(&cidr) {
        return Err(CidrError::NotWithin {
            cidr,
            parent: *vpc_cidr,
        });
    }

    if let Some((sibling, sibling_cidr)) = siblings.iter().find(|(_, s)| s.overlaps(&cidr)) {
        return Err(CidrError::Overlap {
            cidr,
            sibling: sibling.clone(),
            sibling_cidr: *sibling_cidr,
        });
    }

    Ok(cidr)
}

/// Pick the lowest free host address in a subnet.
///
/// The network address, the gateway (first host) and the broadcast address
/// are never handed out. Returns `None` when the subnet is full or too small
/// to have allocatable hosts (`/31`, `/32`).
pub fn allocate_host(subnet: &Ipv4Cidr, in_use: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    if subnet.prefix_len() > 30 {
        return None;
    }
    subnet.hosts().skip(1).find(|addr| !in_use.contains(addr))
}
