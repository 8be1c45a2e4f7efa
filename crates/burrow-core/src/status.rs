//! Live status snapshot composed from the registry and pairing authority.
//!
//! Read-only and cheap: safe for a dashboard to poll every few seconds. A
//! field that cannot be computed degrades to its default instead of failing
//! the snapshot.

use crate::pairing::PairingAuthority;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Point-in-time view of server health and inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub port: u16,
    pub databases_count: usize,
    pub active_connections: usize,
    pub pairing_code: String,
    pub local_address: Option<String>,
    pub uptime_secs: u64,
}

/// What a client needs to reach this server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub pairing_code: String,
    pub base_url: String,
}

/// Composes snapshots; never mutates the components it reads.
pub struct StatusAggregator {
    registry: Arc<Registry>,
    pairing: Arc<PairingAuthority>,
    port: AtomicU16,
    started_at: Instant,
}

impl StatusAggregator {
    pub fn new(registry: Arc<Registry>, pairing: Arc<PairingAuthority>) -> Self {
        Self {
            registry,
            pairing,
            port: AtomicU16::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record the bound port once the listener is up.
    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::SeqCst);
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            running: true,
            port: self.port(),
            databases_count: self.registry.count().await,
            active_connections: self.pairing.active_connections(),
            pairing_code: self.pairing.current_code(),
            local_address: local_address(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        let host = local_address().unwrap_or_else(|| "127.0.0.1".to_string());
        let port = self.port();
        ConnectionInfo {
            base_url: format!("http://{}:{}/api", host, port),
            host,
            port,
            pairing_code: self.pairing.current_code(),
        }
    }
}

/// LAN-reachable address of this host, found by routing a UDP socket toward a
/// public address (no packet is sent).
fn local_address() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use tempfile::TempDir;

    async fn aggregator() -> (TempDir, Arc<Registry>, Arc<PairingAuthority>, StatusAggregator) {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(
            Registry::open(temp.path().to_path_buf(), EngineConfig::default())
                .await
                .unwrap(),
        );
        let pairing = Arc::new(PairingAuthority::new(
            EngineConfig::DEFAULT_SESSION_IDLE_TIMEOUT,
        ));
        let status = StatusAggregator::new(registry.clone(), pairing.clone());
        (temp, registry, pairing, status)
    }

    #[tokio::test]
    async fn test_snapshot_composes_components() {
        let (_temp, registry, pairing, status) = aggregator().await;
        status.set_port(8080);

        registry.create("one", "app").await.unwrap();
        registry.create("two", "app").await.unwrap();
        let code = pairing.current_code();
        pairing.open_session(&code, "app", None).unwrap();

        let snapshot = status.snapshot().await;
        assert!(snapshot.running);
        assert_eq!(snapshot.port, 8080);
        assert_eq!(snapshot.databases_count, 2);
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.pairing_code, code);
    }

    #[tokio::test]
    async fn test_snapshot_never_fails_when_empty() {
        let (_temp, _registry, _pairing, status) = aggregator().await;
        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.databases_count, 0);
        assert_eq!(snapshot.active_connections, 0);
        assert_eq!(snapshot.port, 0);
    }

    #[tokio::test]
    async fn test_connection_info_has_base_url() {
        let (_temp, _registry, _pairing, status) = aggregator().await;
        status.set_port(9000);
        let info = status.connection_info();
        assert_eq!(info.port, 9000);
        assert!(info.base_url.starts_with("http://"));
        assert!(info.base_url.ends_with(":9000/api"));
    }
}
