//! Lifecycle manager configuration types.

use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// When image artifacts are checked for existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageValidation {
    /// At image registration.
    #[default]
    Eager,
    /// Before the first instance boots from the image.
    Lazy,
}

impl FromStr for ImageValidation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "lazy" => Ok(Self::Lazy),
            other => Err(CoreError::field(
                "imageValidation",
                format!("expected \"eager\" or \"lazy\", got {other:?}"),
            )),
        }
    }
}

impl fmt::Display for ImageValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager => write!(f, "eager"),
            Self::Lazy => write!(f, "lazy"),
        }
    }
}

/// Configuration for the lifecycle manager and its provisioner.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Upper bound on waiting for the hypervisor, both for the boot
    /// acknowledgment and for terminate (default: 120s).
    pub provision_timeout: Duration,
    /// Status poller tick (default: 1s).
    pub poll_interval: Duration,
    /// Bound on a single status call (default: 10s).
    pub status_timeout: Duration,
    /// Image artifact check mode (default: eager).
    pub image_validation: ImageValidation,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            provision_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            status_timeout: Duration::from_secs(10),
            image_validation: ImageValidation::Eager,
        }
    }
}

impl ManagerConfig {
    /// Create a new config builder.
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.provision_timeout.is_zero() {
            return Err(CoreError::field("provisionTimeout", "must be > 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(CoreError::field("pollInterval", "must be > 0"));
        }
        if self.status_timeout.is_zero() {
            return Err(CoreError::field("statusTimeout", "must be > 0"));
        }
        if self.poll_interval > self.provision_timeout {
            return Err(CoreError::field(
                "pollInterval",
                "must not exceed provisionTimeout",
            ));
        }
        Ok(())
    }
}

/// Builder for ManagerConfig.
#[derive(Debug, Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// Set the provisioning timeout.
    pub fn provision_timeout(mut self, timeout: Duration) -> Self {
        self.config.provision_timeout = timeout;
        self
    }

    /// Set the status poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the bound on a single status call.
    pub fn status_timeout(mut self, timeout: Duration) -> Self {
        self.config.status_timeout = timeout;
        self
    }

    /// Set the image validation mode.
    pub fn image_validation(mut self, mode: ImageValidation) -> Self {
        self.config.image_validation = mode;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<ManagerConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
