//! mDNS advertisement so LAN clients can find the server without a fixed
//! address.
//!
//! Advertising is best-effort: a failure to register (no multicast, no
//! network) is logged and retried on an interval, and never affects query
//! serving.

use crate::config::DiscoveryConfig;
use crate::error::{BurrowError, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Periodically-retried mDNS service registration.
pub struct DiscoveryBroadcaster {
    daemon: Arc<Mutex<Option<ServiceDaemon>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryBroadcaster {
    /// Start advertising `port` on the local segment.
    ///
    /// `pairing_hint` is a short non-secret prefix of the pairing code,
    /// published so clients can tell instances apart before pairing.
    pub fn start(port: u16, pairing_hint: String, retry_interval: Duration) -> Self {
        let daemon: Arc<Mutex<Option<ServiceDaemon>>> = Arc::new(Mutex::new(None));

        let slot = daemon.clone();
        let task = tokio::spawn(async move {
            loop {
                match register_service(port, &pairing_hint) {
                    Ok(registered) => {
                        if let Ok(mut guard) = slot.lock() {
                            *guard = Some(registered);
                        }
                        info!(
                            "advertising {} on port {}",
                            DiscoveryConfig::SERVICE_TYPE,
                            port
                        );
                        return;
                    }
                    Err(e) => {
                        warn!("mDNS registration failed ({}), retrying in {:?}", e, retry_interval);
                        tokio::time::sleep(retry_interval).await;
                    }
                }
            }
        });

        Self {
            daemon,
            task: Mutex::new(Some(task)),
        }
    }

    /// Whether a registration is currently held.
    pub fn is_advertising(&self) -> bool {
        self.daemon.lock().map(|d| d.is_some()).unwrap_or(false)
    }

    /// Stop advertising and shut the daemon down.
    pub fn stop(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
        if let Ok(mut daemon) = self.daemon.lock() {
            if let Some(daemon) = daemon.take() {
                let _ = daemon.shutdown();
                info!("stopped mDNS advertisement");
            }
        }
    }
}

impl Drop for DiscoveryBroadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}

fn register_service(port: u16, pairing_hint: &str) -> Result<ServiceDaemon> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| BurrowError::Discovery(format!("failed to create mDNS daemon: {}", e)))?;

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "burrow-host".to_string());

    let properties = [
        ("version", env!("CARGO_PKG_VERSION")),
        ("pairing_prefix", pairing_hint),
    ];

    let service = ServiceInfo::new(
        DiscoveryConfig::SERVICE_TYPE,
        &instance_name(&host),
        &format!("{}.local.", host),
        "",
        port,
        &properties[..],
    )
    .map_err(|e| BurrowError::Discovery(format!("failed to build service info: {}", e)))?
    .enable_addr_auto();

    daemon
        .register(service)
        .map_err(|e| BurrowError::Discovery(format!("failed to register service: {}", e)))?;

    Ok(daemon)
}

/// Instance name shown in clients' discovery listings.
fn instance_name(host: &str) -> String {
    format!("{} ({})", DiscoveryConfig::INSTANCE_PREFIX, host)
}
