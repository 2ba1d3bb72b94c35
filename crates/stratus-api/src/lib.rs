//! # stratus-api
//!
//! HTTP/JSON front end for the Stratus control plane.
//!
//! ## Quick Start
//!
//! Run the server with the simulated hypervisor and an in-memory store:
//!
//! ```bash
//! cargo run -p stratus-api
//! ```
//!
//! Persist state and talk to a real hypervisor agent:
//!
//! ```bash
//! export STRATUS_DATA_DIR=/var/lib/stratus
//! export STRATUS_HYPERVISOR=remote
//! export STRATUS_HYPERVISOR_URL=http://10.0.0.5:7070
//! cargo run -p stratus-api
//! ```
//!
//! ## Resources
//!
//! | Collection | Operations |
//! |------------|------------|
//! | `/vpcs` | create, list, get, update, delete |
//! | `/subnets` | create, list (`?vpcId=`), get, update, delete |
//! | `/images` | create, list, get, delete |
//! | `/instances` | launch (`202`), list (`?subnetId=`), get, terminate |
//!
//! Errors come back as `{"error": {"code", "message", ...}}`.

mod config;
mod error;
mod handlers;
pub mod http;
mod server;
mod types;

pub use config::{ApiConfig, ConfigError, HypervisorBackend, SNAPSHOT_FILE};
pub use error::{ApiError, ErrorDetail, ErrorResponse};
pub use server::{ServerError, StratusServer};
pub use types::*;
