//! Configuration for the API server.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use stratus_core::{ImageValidation, ManagerConfig};

/// File name of the store snapshot inside the data directory.
pub const SNAPSHOT_FILE: &str = "stratus.json";

/// Which hypervisor backend instances are provisioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HypervisorBackend {
    /// In-process simulator (default, for development)
    #[default]
    Simulated,
    /// Hypervisor agent reached over HTTP
    Remote,
}

impl HypervisorBackend {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "simulated" | "sim" => Some(Self::Simulated),
            "remote" | "http" => Some(Self::Remote),
            _ => None,
        }
    }
}

/// Configuration for the Stratus API server.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// HTTP server bind address.
    pub http_addr: SocketAddr,

    /// Directory holding the store snapshot. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,

    /// How often the snapshot is rewritten (default: 30s).
    pub flush_interval: Duration,

    /// Hypervisor backend (default: simulated).
    pub hypervisor: HypervisorBackend,

    /// Base URL of the remote hypervisor agent.
    pub hypervisor_url: String,

    /// Boot delay of the simulated hypervisor (default: 500ms).
    pub sim_boot_delay: Duration,

    /// Bound on hypervisor acknowledgment and terminate (default: 120s).
    pub provision_timeout: Duration,

    /// Status poll interval (default: 1s).
    pub poll_interval: Duration,

    /// Image artifact check mode (default: eager).
    pub image_validation: ImageValidation,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("data directory parent not found: {0}")]
    InvalidDataDir(PathBuf),

    #[error("hypervisor URL must start with http:// or https://: {0}")]
    InvalidHypervisorUrl(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 3000),
            data_dir: None,
            flush_interval: Duration::from_secs(30),
            hypervisor: HypervisorBackend::Simulated,
            hypervisor_url: "http://127.0.0.1:7070".to_string(),
            sim_boot_delay: Duration::from_millis(500),
            provision_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(1000),
            image_validation: ImageValidation::Eager,
        }
    }
}

impl ApiConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `STRATUS_HTTP_HOST` | `0.0.0.0` |
    /// | `STRATUS_HTTP_PORT` | `3000` |
    /// | `STRATUS_DATA_DIR` | unset (in-memory store) |
    /// | `STRATUS_FLUSH_INTERVAL_SECS` | `30` |
    /// | `STRATUS_HYPERVISOR` | `simulated` (simulated, remote) |
    /// | `STRATUS_HYPERVISOR_URL` | `http://127.0.0.1:7070` |
    /// | `STRATUS_SIM_BOOT_DELAY_MS` | `500` |
    /// | `STRATUS_PROVISION_TIMEOUT_SECS` | `120` |
    /// | `STRATUS_POLL_INTERVAL_MS` | `1000` |
    /// | `STRATUS_IMAGE_VALIDATION` | `eager` (eager, lazy) |
    ///
    /// Unparseable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        let parsed = |var: &str| -> Option<u64> {
            let raw = lookup(var)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(var, value = %raw, "Ignoring unparseable value");
                    None
                }
            }
        };

        let http_host: IpAddr = lookup("STRATUS_HTTP_HOST")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default.http_addr.ip());

        let http_port: u16 = lookup("STRATUS_HTTP_PORT")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default.http_addr.port());

        Self {
            http_addr: SocketAddr::new(http_host, http_port),
            data_dir: lookup("STRATUS_DATA_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            flush_interval: parsed("STRATUS_FLUSH_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.flush_interval),
            hypervisor: lookup("STRATUS_HYPERVISOR")
                .and_then(|v| HypervisorBackend::parse(&v))
                .unwrap_or(default.hypervisor),
            hypervisor_url: lookup("STRATUS_HYPERVISOR_URL").unwrap_or(default.hypervisor_url),
            sim_boot_delay: parsed("STRATUS_SIM_BOOT_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.sim_boot_delay),
            provision_timeout: parsed("STRATUS_PROVISION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.provision_timeout),
            poll_interval: parsed("STRATUS_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.poll_interval),
            image_validation: lookup("STRATUS_IMAGE_VALIDATION")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.image_validation),
        }
    }

    /// Path of the store snapshot, if durable.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(SNAPSHOT_FILE))
    }

    /// Lifecycle manager settings derived from this configuration.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            provision_timeout: self.provision_timeout,
            poll_interval: self.poll_interval,
            image_validation: self.image_validation,
            ..ManagerConfig::default()
        }
    }

    /// Validate settings that would make the server unusable.
    ///
    /// Call this at startup to get clear error messages.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("flush interval", self.flush_interval),
            ("provision timeout", self.provision_timeout),
            ("poll interval", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        if self.poll_interval > self.provision_timeout {
            return Err(ConfigError::InvalidValue {
                var: "STRATUS_POLL_INTERVAL_MS",
                value: self.poll_interval.as_millis().to_string(),
                reason: "must not exceed the provision timeout".into(),
            });
        }

        if self.hypervisor == HypervisorBackend::Remote {
            let url = self.hypervisor_url.to_lowercase();
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidHypervisorUrl(self.hypervisor_url.clone()));
            }
        }

        // the data dir itself is created on first flush
        if let Some(dir) = &self.data_dir {
            if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !parent.exists() {
                    return Err(ConfigError::InvalidDataDir(dir.clone()));
                }
            }
        }

        Ok(())
    }

    /// Log warnings for settings that work but are probably not intended.
    pub fn validate_warn(&self) {
        if self.data_dir.is_none() {
            tracing::warn!("STRATUS_DATA_DIR not set, resources will not survive a restart");
        }

        if self.hypervisor == HypervisorBackend::Simulated {
            tracing::warn!("Using the simulated hypervisor, no real machines will be booted");
        }

        if self.flush_interval > Duration::from_secs(300) {
            tracing::warn!(
                flush_interval_secs = self.flush_interval.as_secs(),
                "Long flush interval, a crash may lose recent changes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> ApiConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.http_addr.port(), 3000);
        assert!(config.data_dir.is_none());
        assert_eq!(config.hypervisor, HypervisorBackend::Simulated);
        assert_eq!(config.provision_timeout, Duration::from_secs(120));
        assert_eq!(config.image_validation, ImageValidation::Eager);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = from_vars(&[]);
        let default = ApiConfig::default();
        assert_eq!(config.http_addr, default.http_addr);
        assert_eq!(config.flush_interval, default.flush_interval);
        assert_eq!(config.hypervisor_url, default.hypervisor_url);
        assert!(config.snapshot_path().is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_vars(&[
            ("STRATUS_HTTP_HOST", "127.0.0.1"),
            ("STRATUS_HTTP_PORT", "8081"),
            ("STRATUS_DATA_DIR", "/var/lib/stratus"),
            ("STRATUS_HYPERVISOR", "REMOTE"),
            ("STRATUS_HYPERVISOR_URL", "http://10.0.0.5:7070"),
            ("STRATUS_PROVISION_TIMEOUT_SECS", "30"),
            ("STRATUS_POLL_INTERVAL_MS", "250"),
            ("STRATUS_IMAGE_VALIDATION", "lazy"),
        ]);

        assert_eq!(config.http_addr, "127.0.0.1:8081".parse().unwrap());
        assert_eq!(
            config.snapshot_path(),
            Some(PathBuf::from("/var/lib/stratus/stratus.json"))
        );
        assert_eq!(config.hypervisor, HypervisorBackend::Remote);
        assert_eq!(config.hypervisor_url, "http://10.0.0.5:7070");

        let manager = config.manager_config();
        assert_eq!(manager.provision_timeout, Duration::from_secs(30));
        assert_eq!(manager.poll_interval, Duration::from_millis(250));
        assert_eq!(manager.image_validation, ImageValidation::Lazy);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = from_vars(&[
            ("STRATUS_HTTP_PORT", "eighty"),
            ("STRATUS_POLL_INTERVAL_MS", "-5"),
            ("STRATUS_HYPERVISOR", "xen"),
            ("STRATUS_IMAGE_VALIDATION", "sometimes"),
        ]);
        let default = ApiConfig::default();
        assert_eq!(config.http_addr.port(), 3000);
        assert_eq!(config.poll_interval, default.poll_interval);
        assert_eq!(config.hypervisor, HypervisorBackend::Simulated);
        assert_eq!(config.image_validation, ImageValidation::Eager);
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!(HypervisorBackend::parse("simulated"), Some(HypervisorBackend::Simulated));
        assert_eq!(HypervisorBackend::parse("Remote"), Some(HypervisorBackend::Remote));
        assert_eq!(HypervisorBackend::parse("kvm"), None);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = ApiConfig {
            provision_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDuration(_))));
    }

    #[test]
    fn test_validate_rejects_bad_remote_url() {
        let config = ApiConfig {
            hypervisor: HypervisorBackend::Remote,
            hypervisor_url: "10.0.0.5:7070".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHypervisorUrl(_))
        ));
    }

    #[test]
    fn test_validate_rejects_missing_data_dir_parent() {
        let config = ApiConfig {
            data_dir: Some(PathBuf::from("/nonexistent/stratus/data")),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDataDir(_))));
    }
}
