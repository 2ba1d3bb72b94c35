//! JSON/HTTP client for a hypervisor agent running on a compute host.
//!
//! ## Agent protocol
//!
//! - `POST /machines` with an [`InstanceSpec`] body, answers `{"handle": "..."}`.
//!   The `Idempotency-Key` header carries the instance ID; the agent answers
//!   a repeated key with the handle of the machine it already created.
//! - `GET /machines/{handle}` answers `{"status": "pending|active|failed", "reason": "..."}`
//! - `DELETE /machines/{handle}` answers any 2xx; 404 means already gone

use crate::builder::InstanceSpec;
use crate::error::{HypervisorError, Result};
use crate::hypervisor::{Hypervisor, HypervisorHandle, ProvisionStatus};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Timeout for a single agent request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Header naming the instance a provision request is for.
pub const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

#[derive(Debug, Deserialize)]
struct ProvisionResponse {
    handle: String,
}

/// Hypervisor backed by a remote agent.
#[derive(Debug, Clone)]
pub struct RemoteHypervisor {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteHypervisor {
    /// Create a client for the agent at `base_url` (e.g. `http://10.0.0.3:7070`).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(HypervisorError::Config(format!(
                "hypervisor URL must be http(s): {}",
                base_url
            )));
        }
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        tracing::info!(%base_url, "Using remote hypervisor agent");
        Ok(Self { client, base_url })
    }

    /// Base URL of the agent.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn machine_url(&self, handle: &HypervisorHandle) -> String {
        format!("{}/machines/{}", self.base_url, handle)
    }

    async fn error_body(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        format!("agent returned {}: {}", status, body.trim())
    }
}

#[async_trait]
impl Hypervisor for RemoteHypervisor {
    async fn provision(&self, spec: &InstanceSpec) -> Result<HypervisorHandle> {
        spec.validate()?;
        tracing::debug!(instance_id = %spec.instance_id, base_url = %self.base_url, "Provisioning via agent");

        let response = self
            .client
            .post(format!("{}/machines", self.base_url))
            .header(IDEMPOTENCY_KEY, &spec.instance_id)
            .json(spec)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HypervisorError::Provision(Self::error_body(response).await));
        }

        let body: ProvisionResponse = response.json().await?;
        Ok(HypervisorHandle::new(body.handle))
    }

    async fn status(&self, handle: &HypervisorHandle) -> Result<ProvisionStatus> {
        let response = self.client.get(self.machine_url(handle)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(HypervisorError::UnknownHandle(handle.clone())),
            s if s.is_success() => Ok(response.json().await?),
            _ => Err(HypervisorError::Status(Self::error_body(response).await)),
        }
    }

    async fn terminate(&self, handle: &HypervisorHandle) -> Result<()> {
        tracing::debug!(handle = %handle, "Terminating via agent");
        let response = self.client.delete(self.machine_url(handle)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            _ => Err(HypervisorError::Terminate(Self::error_body(response).await)),
        }
    }
}
