mod least_active;
mod random;
mod round_robin;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use least_active::LeastActiveBalancer;
pub use random::RandomBalancer;
pub use round_robin::RoundRobinBalancer;

use crate::error::{ProxyError, Result};
use crate::server::Server;

/// Which balancing policy a [`crate::server_group::ServerGroup`] is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalancerKind {
    RoundRobin,
    Random,
    LeastActive,
}

impl BalancerKind {
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "round-robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "least-active" => Ok(Self::LeastActive),
            _ => Err(ProxyError::UnknownLoadBalancer),
        }
    }
}

/// A load balancing policy over a shared pool of servers.
///
/// Implementations are responsible for their own internal synchronization:
/// all methods may be called concurrently with each other and must never
/// observe (or produce) a half-updated internal structure. No implementation
/// performs blocking I/O while holding its internal locks.
#[async_trait::async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Registers a new server with the balancer.
    async fn add_server_node(&self, server: Arc<Server>) -> Result<()>;

    /// Removes a previously added server from the balancer.
    async fn delete_server_node(&self, server: &Arc<Server>) -> Result<()>;

    /// Picks the next server to forward a request to.
    async fn select_node(&self) -> Result<Arc<Server>>;

    /// Clears all internal state, forgetting every server.
    async fn reset(&self);

    /// Resets then re-populates the balancer from `servers`, in order.
    async fn init_server_node(&self, servers: &[Arc<Server>]) -> Result<()> {
        self.reset().await;
        for server in servers {
            self.add_server_node(server.clone()).await?;
        }
        Ok(())
    }

    fn kind(&self) -> BalancerKind;
}

/// Builds a fresh, empty balancer for the given policy.
pub fn build(kind: BalancerKind) -> Box<dyn LoadBalancer> {
    match kind {
        BalancerKind::RoundRobin => Box::new(RoundRobinBalancer::new()),
        BalancerKind::Random => Box::new(RandomBalancer::new()),
        BalancerKind::LeastActive => Box::new(LeastActiveBalancer::new()),
    }
}
