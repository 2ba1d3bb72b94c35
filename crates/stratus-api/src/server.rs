//! StratusServer - wires configuration, store, hypervisor and manager together.

use crate::config::{ApiConfig, ConfigError, HypervisorBackend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stratus_core::{CoreError, LifecycleManager, ResourceStore};
use stratus_hypervisor::{Hypervisor, HypervisorError, RemoteHypervisor, SimulatedHypervisor};
use tokio::sync::{Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;

/// Errors that prevent the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("control plane error: {0}")]
    Core(#[from] CoreError),

    #[error("hypervisor setup failed: {0}")]
    Hypervisor(#[from] HypervisorError),
}

/// Background task that periodically flushes the store snapshot.
struct Flusher {
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// The control-plane server.
///
/// Cheap to clone; clones share the same manager.
#[derive(Clone)]
pub struct StratusServer {
    manager: Arc<LifecycleManager>,
    config: ApiConfig,
    flusher: Arc<TokioMutex<Option<Flusher>>>,
}

impl StratusServer {
    /// Build the server: open the store and connect the hypervisor backend.
    pub async fn new(config: ApiConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let store = match config.snapshot_path() {
            Some(path) => ResourceStore::open(path).await?,
            None => ResourceStore::in_memory(),
        };

        let hypervisor: Arc<dyn Hypervisor> = match config.hypervisor {
            HypervisorBackend::Simulated => {
                tracing::info!(
                    boot_delay_ms = config.sim_boot_delay.as_millis() as u64,
                    "Using simulated hypervisor"
                );
                Arc::new(SimulatedHypervisor::with_boot_delay(config.sim_boot_delay))
            }
            HypervisorBackend::Remote => {
                tracing::info!(url = %config.hypervisor_url, "Using remote hypervisor agent");
                Arc::new(RemoteHypervisor::new(config.hypervisor_url.clone())?)
            }
        };

        let manager = LifecycleManager::new(store, hypervisor, config.manager_config())?;
        Ok(Self::with_manager(Arc::new(manager), config))
    }

    /// Wrap an existing manager.
    pub fn with_manager(manager: Arc<LifecycleManager>, config: ApiConfig) -> Self {
        Self {
            manager,
            config,
            flusher: Arc::new(TokioMutex::new(None)),
        }
    }

    /// Get a reference to the lifecycle manager.
    pub fn manager(&self) -> &LifecycleManager {
        &self.manager
    }

    /// Get a cloned Arc to the lifecycle manager.
    pub fn manager_arc(&self) -> Arc<LifecycleManager> {
        Arc::clone(&self.manager)
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Recover interrupted operations, then start the poller and flusher.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.manager.recover().await?;
        self.manager.start().await;

        if self.manager.store().path().is_some() {
            let mut flusher = self.flusher.lock().await;
            if flusher.is_none() {
                *flusher = Some(Self::spawn_flusher(
                    self.manager.store().clone(),
                    self.config.flush_interval,
                ));
                tracing::info!(
                    interval_secs = self.config.flush_interval.as_secs(),
                    "Snapshot flusher started"
                );
            }
        }
        Ok(())
    }

    fn spawn_flusher(store: ResourceStore, interval: Duration) -> Flusher {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_notify = Arc::new(Notify::new());

        let stop = Arc::clone(&shutdown);
        let notify = Arc::clone(&shutdown_notify);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = notify.notified() => break,

                    _ = tokio::time::sleep(interval) => {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = store.flush().await {
                            tracing::error!(error = %e, "Periodic snapshot flush failed");
                        }
                    }
                }
            }
            tracing::debug!("Flusher exited");
        });

        Flusher {
            shutdown,
            shutdown_notify,
            handle,
        }
    }

    /// Stop background tasks and flush the store.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        if let Some(flusher) = self.flusher.lock().await.take() {
            flusher.shutdown.store(true, Ordering::Relaxed);
            flusher.shutdown_notify.notify_one();
            if let Err(e) = flusher.handle.await {
                tracing::error!(error = ?e, "Flusher panicked during shutdown");
            }
        }
        self.manager.shutdown().await?;
        Ok(())
    }
}
