use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::balancer::{self, BalancerKind, LoadBalancer};
use crate::error::{ProxyError, Result};
use crate::health::spawn_health_check;
use crate::server::Server;

/// One configured upstream, as seen from outside the group (for `info` /
/// `getserver` and for config snapshotting).
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    pub addr: String,
    pub weight: i32,
    pub probe: String,
    pub pfail: bool,
    pub active_req: i32,
    pub last_ack: i64,
}

/// Owns the authoritative `addr -> Server` map, delegates selection to the
/// configured [`LoadBalancer`], and keeps a running count of pfail servers.
///
/// All mutators take the write lock; `select` and snapshot reads take the
/// read lock. The balancer's own internal locking means selection never
/// needs to hold the group's lock across a forward.
pub struct ServerGroup {
    servers: RwLock<HashMap<SocketAddr, Arc<Server>>>,
    balancer: Box<dyn LoadBalancer>,
    pfail_count: AtomicI32,
    health_check_interval: std::time::Duration,
    pfail_timeout: std::time::Duration,
    health_check_enabled: bool,
}

impl ServerGroup {
    pub fn new(
        kind: BalancerKind,
        health_check_enabled: bool,
        health_check_interval: std::time::Duration,
        pfail_timeout: std::time::Duration,
    ) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            balancer: balancer::build(kind),
            pfail_count: AtomicI32::new(0),
            health_check_interval,
            pfail_timeout,
            health_check_enabled,
        }
    }

    pub fn balancer_kind(&self) -> BalancerKind {
        self.balancer.kind()
    }

    pub fn pfail_count(&self) -> i32 {
        self.pfail_count.load(Ordering::SeqCst)
    }

    /// Adds a server to the pool: validates its fields, registers it with
    /// the balancer, and (if it carries a probe) spawns its health-check
    /// task.
    pub async fn add_server(self: &Arc<Self>, addr: &str, weight: i32, probe: &str) -> Result<()> {
        let (server, stop_rx) = Server::new(addr, weight, probe)?;
        let server = Arc::new(server);

        {
            let mut servers = self.servers.write().await;
            if servers.contains_key(&server.addr()) {
                return Err(ProxyError::ServerExists);
            }
            self.balancer.add_server_node(server.clone()).await?;
            servers.insert(server.addr(), server.clone());
        }

        if self.health_check_enabled {
            if let Some(stop_rx) = stop_rx {
                spawn_health_check(
                    self.clone(),
                    server,
                    stop_rx,
                    self.health_check_interval,
                    self.pfail_timeout,
                );
            }
        }
        Ok(())
    }

    /// Removes a server from the pool, stopping its health-check task.
    pub async fn delete_server(&self, addr: &str) -> Result<()> {
        let addr: SocketAddr = addr.parse().map_err(|_| ProxyError::ServerAddrInvalid)?;
        let server = {
            let mut servers = self.servers.write().await;
            let server = servers.remove(&addr).ok_or(ProxyError::ServerNotExists)?;
            self.balancer.delete_server_node(&server).await?;
            server
        };
        if server.is_pfail() {
            self.pfail_count.fetch_sub(1, Ordering::SeqCst);
        }
        server.close_health_check().await;
        Ok(())
    }

    pub async fn set_weight(&self, addr: &str, weight: i32) -> Result<()> {
        let addr: SocketAddr = addr.parse().map_err(|_| ProxyError::ServerAddrInvalid)?;
        let servers = self.servers.read().await;
        let server = servers.get(&addr).ok_or(ProxyError::ServerNotExists)?;
        server.set_weight(weight)
    }

    pub async fn is_server_exists(&self, addr: &str) -> bool {
        match addr.parse::<SocketAddr>() {
            Ok(addr) => self.servers.read().await.contains_key(&addr),
            Err(_) => false,
        }
    }

    pub async fn get_server(&self, addr: &str) -> Result<ServerSnapshot> {
        let addr: SocketAddr = addr.parse().map_err(|_| ProxyError::ServerAddrInvalid)?;
        let servers = self.servers.read().await;
        let server = servers.get(&addr).ok_or(ProxyError::ServerNotExists)?;
        Ok(snapshot_of(server))
    }

    /// Picks a server for an incoming request, or [`ProxyError::NoServer`]
    /// if none are currently eligible.
    pub async fn select(&self) -> Result<Arc<Server>> {
        self.balancer.select_node().await
    }

    /// Marks a server pfail (called by the request-path circuit breaker).
    /// Idempotent with respect to `pfail_count`.
    pub async fn mark_pfail(&self, addr: SocketAddr) {
        let servers = self.servers.read().await;
        if let Some(server) = servers.get(&addr) {
            if !server.is_pfail() {
                server.set_pfail(true);
                self.pfail_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Clears pfail on a server (called by the health checker on recovery).
    /// Idempotent with respect to `pfail_count`.
    pub async fn clear_pfail(&self, addr: SocketAddr) {
        let servers = self.servers.read().await;
        if let Some(server) = servers.get(&addr) {
            if server.is_pfail() {
                server.set_pfail(false);
                self.pfail_count.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Takes a consistent snapshot of every server currently in the pool.
    /// Holds the read lock across the whole iteration, unlike the source
    /// this was ported from.
    pub async fn snapshot(&self) -> Vec<ServerSnapshot> {
        let servers = self.servers.read().await;
        servers.values().map(snapshot_of).collect()
    }

    /// Signals every server's health-check task to stop. Used during
    /// shutdown, ahead of dropping the group.
    pub async fn close_all_health_checks(&self) {
        let servers = self.servers.read().await;
        for server in servers.values() {
            server.close_health_check().await;
        }
    }

    /// Re-populates the group from a fresh server list (used at startup and
    /// on config reload); replaces the balancer's and group's state wholesale.
    pub async fn init_from(self: &Arc<Self>, entries: &[(String, i32, String)]) -> Result<()> {
        {
            let mut servers = self.servers.write().await;
            self.balancer.reset().await;
            servers.clear();
        }
        for (addr, weight, probe) in entries {
            self.add_server(addr, *weight, probe).await?;
        }
        Ok(())
    }
}

fn snapshot_of(server: &Arc<Server>) -> ServerSnapshot {
    ServerSnapshot {
        addr: server.addr_str().to_string(),
        weight: server.weight(),
        probe: server.probe_str().to_string(),
        pfail: server.is_pfail(),
        active_req: server.active_req(),
        last_ack: server.last_ack(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn group() -> Arc<ServerGroup> {
        Arc::new(ServerGroup::new(
            BalancerKind::RoundRobin,
            false,
            Duration::from_secs(1),
            Duration::from_secs(3),
        ))
    }

    #[tokio::test]
    async fn add_then_exists_then_duplicate_errors() {
        let group = group();
        group.add_server("127.0.0.1:8080", 150, "").await.unwrap();
        assert!(group.is_server_exists("127.0.0.1:8080").await);
        let err = group
            .add_server("127.0.0.1:8080", 150, "")
            .await
            .unwrap_err();
        assert_eq!(err, ProxyError::ServerExists);
    }

    #[tokio::test]
    async fn delete_missing_errors() {
        let group = group();
        let err = group.delete_server("127.0.0.1:8080").await.unwrap_err();
        assert_eq!(err, ProxyError::ServerNotExists);
    }

    #[tokio::test]
    async fn set_weight_zero_normalizes_to_default() {
        let group = group();
        group.add_server("127.0.0.1:8080", 150, "").await.unwrap();
        group.set_weight("127.0.0.1:8080", 0).await.unwrap();
        let snap = group.get_server("127.0.0.1:8080").await.unwrap();
        assert_eq!(snap.weight, 100);
    }

    #[tokio::test]
    async fn set_weight_negative_errors() {
        let group = group();
        group.add_server("127.0.0.1:8080", 150, "").await.unwrap();
        let err = group.set_weight("127.0.0.1:8080", -1).await.unwrap_err();
        assert_eq!(err, ProxyError::ServerWeightNegative);
    }

    #[tokio::test]
    async fn set_weight_above_max_errors() {
        let group = group();
        group.add_server("127.0.0.1:8080", 150, "").await.unwrap();
        let err = group
            .set_weight("127.0.0.1:8080", 2_000_000)
            .await
            .unwrap_err();
        assert_eq!(err, ProxyError::ServerWeightGreaterThanMax);
    }

    #[tokio::test]
    async fn mark_and_clear_pfail_is_idempotent_on_count() {
        let group = group();
        group.add_server("127.0.0.1:8080", 150, "").await.unwrap();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        group.mark_pfail(addr).await;
        group.mark_pfail(addr).await;
        assert_eq!(group.pfail_count(), 1);
        group.clear_pfail(addr).await;
        group.clear_pfail(addr).await;
        assert_eq!(group.pfail_count(), 0);
    }

    #[tokio::test]
    async fn delete_decrements_pfail_count() {
        let group = group();
        group.add_server("127.0.0.1:8080", 150, "").await.unwrap();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        group.mark_pfail(addr).await;
        assert_eq!(group.pfail_count(), 1);
        group.delete_server("127.0.0.1:8080").await.unwrap();
        assert_eq!(group.pfail_count(), 0);
    }

    #[tokio::test]
    async fn snapshot_reflects_members() {
        let group = group();
        group.add_server("127.0.0.1:8080", 150, "").await.unwrap();
        group.add_server("127.0.0.1:8081", 100, "").await.unwrap();
        let snap = group.snapshot().await;
        assert_eq!(snap.len(), 2);
    }
}
