use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use rand::Rng;

use super::{BalancerKind, LoadBalancer};
use crate::error::{ProxyError, Result};
use crate::server::Server;

/// Number of candidates sampled per selection (power-of-two choices).
const CHOICES: usize = 2;

/// Least-active balancer using power-of-two-choices.
///
/// Each selection samples up to [`CHOICES`] non-pfail candidates and picks
/// the one with fewer active requests, breaking ties by higher weight. The
/// scan starts at a randomized offset into the member set so that, unlike
/// an unordered hash-map walk, no subset of servers is systematically
/// favored across repeated calls.
pub struct LeastActiveBalancer {
    members: Mutex<HashMap<SocketAddr, Arc<Server>>>,
}

impl LeastActiveBalancer {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LeastActiveBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LoadBalancer for LeastActiveBalancer {
    async fn add_server_node(&self, server: Arc<Server>) -> Result<()> {
        let mut members = self.members.lock().unwrap();
        if members.contains_key(&server.addr()) {
            return Err(ProxyError::ServerExists);
        }
        members.insert(server.addr(), server);
        Ok(())
    }

    async fn delete_server_node(&self, server: &Arc<Server>) -> Result<()> {
        let mut members = self.members.lock().unwrap();
        if members.remove(&server.addr()).is_none() {
            return Err(ProxyError::ServerNotExists);
        }
        Ok(())
    }

    async fn select_node(&self) -> Result<Arc<Server>> {
        let servers: Vec<Arc<Server>> = {
            let members = self.members.lock().unwrap();
            if members.is_empty() {
                return Err(ProxyError::NoServer);
            }
            members.values().cloned().collect()
        };

        let len = servers.len();
        let start = rand::thread_rng().gen_range(0..len);
        let mut candidates = Vec::with_capacity(CHOICES);
        for offset in 0..len {
            let server = &servers[(start + offset) % len];
            if server.is_pfail() {
                continue;
            }
            candidates.push(server.clone());
            if candidates.len() == CHOICES {
                break;
            }
        }

        let mut best: Option<Arc<Server>> = None;
        for candidate in candidates {
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if candidate.active_req() < current.active_req()
                        || (candidate.active_req() == current.active_req()
                            && candidate.weight() > current.weight())
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        best.ok_or(ProxyError::NoServer)
    }

    async fn reset(&self) {
        self.members.lock().unwrap().clear();
    }

    fn kind(&self) -> BalancerKind {
        BalancerKind::LeastActive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(addr: &str, weight: i32) -> Arc<Server> {
        let (s, _rx) = Server::new(addr, weight, "").unwrap();
        Arc::new(s)
    }

    #[tokio::test]
    async fn picks_lower_active_req() {
        let lb = LeastActiveBalancer::new();
        let busy = server("127.0.0.1:1", 100);
        busy.incr_active_req();
        busy.incr_active_req();
        let idle = server("127.0.0.1:2", 100);
        lb.add_server_node(busy.clone()).await.unwrap();
        lb.add_server_node(idle.clone()).await.unwrap();
        for _ in 0..20 {
            let picked = lb.select_node().await.unwrap();
            assert_eq!(picked.addr(), idle.addr());
        }
    }

    #[tokio::test]
    async fn ties_break_on_higher_weight() {
        let lb = LeastActiveBalancer::new();
        let low_weight = server("127.0.0.1:1", 50);
        let high_weight = server("127.0.0.1:2", 150);
        lb.add_server_node(low_weight.clone()).await.unwrap();
        lb.add_server_node(high_weight.clone()).await.unwrap();
        for _ in 0..20 {
            let picked = lb.select_node().await.unwrap();
            assert_eq!(picked.addr(), high_weight.addr());
        }
    }

    #[tokio::test]
    async fn pfail_servers_are_excluded() {
        let lb = LeastActiveBalancer::new();
        let down = server("127.0.0.1:1", 100);
        down.set_pfail(true);
        let up = server("127.0.0.1:2", 100);
        lb.add_server_node(down).await.unwrap();
        lb.add_server_node(up.clone()).await.unwrap();
        for _ in 0..20 {
            let picked = lb.select_node().await.unwrap();
            assert_eq!(picked.addr(), up.addr());
        }
    }

    #[tokio::test]
    async fn empty_balancer_returns_no_server() {
        let lb = LeastActiveBalancer::new();
        assert_eq!(lb.select_node().await.unwrap_err(), ProxyError::NoServer);
    }

    #[tokio::test]
    async fn duplicate_add_errors() {
        let lb = LeastActiveBalancer::new();
        lb.add_server_node(server("127.0.0.1:1", 100)).await.unwrap();
        let err = lb.add_server_node(server("127.0.0.1:1", 100)).await.unwrap_err();
        assert_eq!(err, ProxyError::ServerExists);
    }
}
