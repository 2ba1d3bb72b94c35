//! Background status poller.
//!
//! Wakes on a fixed interval and asks the [`Provisioner`] to sweep the
//! hypervisor status of every pending instance.

use crate::provisioner::Provisioner;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Periodic driver for [`Provisioner::poll_once`].
pub struct StatusPoller {
    provisioner: Arc<Provisioner>,
    interval: Duration,
    /// Shutdown signal for the poll task.
    shutdown: Arc<AtomicBool>,
    /// Notification to wake up the poll task on shutdown.
    shutdown_notify: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
    /// Completed sweeps.
    sweeps: Arc<AtomicU64>,
}

impl StatusPoller {
    /// Create a poller. Call [`start()`](Self::start) to begin polling.
    pub fn new(provisioner: Arc<Provisioner>, interval: Duration) -> Self {
        Self {
            provisioner,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            handle: None,
            sweeps: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Spawn the poll task.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            tracing::warn!("Status poller already started");
            return;
        }
        self.shutdown.store(false, Ordering::Relaxed);

        let provisioner = Arc::clone(&self.provisioner);
        let shutdown = Arc::clone(&self.shutdown);
        let shutdown_notify = Arc::clone(&self.shutdown_notify);
        let sweeps = Arc::clone(&self.sweeps);
        let interval = self.interval;

        self.handle = Some(tokio::spawn(async move {
            Self::poll_loop(provisioner, interval, shutdown, shutdown_notify, sweeps).await;
        }));
        tracing::info!(interval_ms = interval.as_millis() as u64, "Status poller started");
    }

    async fn poll_loop(
        provisioner: Arc<Provisioner>,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
        shutdown_notify: Arc<Notify>,
        sweeps: Arc<AtomicU64>,
    ) {
        tracing::debug!("Poll loop started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_notify.notified() => {
                    tracing::info!("Status poller received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(interval) => {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }

                    let tracked = provisioner.tracked_count();
                    let settled = provisioner.poll_once().await;
                    sweeps.fetch_add(1, Ordering::Relaxed);
                    if settled > 0 {
                        tracing::debug!(tracked, settled, "Poll sweep settled instances");
                    }
                }
            }
        }

        tracing::debug!("Poll loop exited");
    }

    /// Number of completed sweeps.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Check if the poll task is running.
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shutdown.load(Ordering::Relaxed)
    }

    /// Stop the poll task and wait for it to exit.
    pub async fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_one();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = ?e, "Poll task panicked during shutdown");
            }
            tracing::info!(sweeps = self.sweeps(), "Status poller stopped");
        }
    }
}
