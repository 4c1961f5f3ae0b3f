use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use super::{BalancerKind, LoadBalancer};
use crate::error::{ProxyError, Result};
use crate::server::Server;

struct Node {
    server: Arc<Server>,
    remaining_credits: i32,
}

/// Weighted round-robin balancer.
///
/// Servers live in one of two lists: `current`, the set of servers still
/// owed selections this epoch, and `backup`, servers that have either used
/// up their credits or are presently pfail. Once `current` is exhausted the
/// two lists swap (backup becomes the new current, with credits refreshed
/// from each server's live weight), starting a new epoch.
///
/// Locks are always acquired in the order membership, current, backup, to
/// avoid cycles between concurrent mutators and selectors.
pub struct RoundRobinBalancer {
    members: Mutex<HashSet<SocketAddr>>,
    current: Mutex<VecDeque<Node>>,
    backup: Mutex<VecDeque<Node>>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(HashSet::new()),
            current: Mutex::new(VecDeque::new()),
            backup: Mutex::new(VecDeque::new()),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn add_server_node(&self, server: Arc<Server>) -> Result<()> {
        {
            let mut members = self.members.lock().unwrap();
            if !members.insert(server.addr()) {
                return Err(ProxyError::ServerExists);
            }
        }
        let credits = server.weight().max(1);
        self.current.lock().unwrap().push_back(Node {
            server,
            remaining_credits: credits,
        });
        Ok(())
    }

    async fn delete_server_node(&self, server: &Arc<Server>) -> Result<()> {
        let mut members = self.members.lock().unwrap();
        if !members.remove(&server.addr()) {
            return Err(ProxyError::ServerNotExists);
        }
        let mut current = self.current.lock().unwrap();
        let before = current.len();
        current.retain(|node| node.server.addr() != server.addr());
        if current.len() != before {
            return Ok(());
        }
        drop(current);
        let mut backup = self.backup.lock().unwrap();
        backup.retain(|node| node.server.addr() != server.addr());
        Ok(())
    }

    async fn select_node(&self) -> Result<Arc<Server>> {
        let mut current = self.current.lock().unwrap();
        // Bounded by the total node count (current + backup, locked below):
        // every node we see pfail and park counts against this budget, so a
        // pool that's entirely pfail returns NoServer after at most one full
        // lap instead of spinning current/backup back and forth forever.
        let member_count = current.len() + self.backup.lock().unwrap().len();
        let mut examined = 0;
        loop {
            if examined > member_count {
                return Err(ProxyError::NoServer);
            }
            let mut node = match current.pop_front() {
                Some(node) => node,
                None => {
                    let mut backup = self.backup.lock().unwrap();
                    if backup.is_empty() {
                        return Err(ProxyError::NoServer);
                    }
                    current.extend(backup.drain(..));
                    continue;
                }
            };
            if node.server.is_pfail() {
                // skip: refresh credits from the live weight and park it in
                // backup until the health checker clears the pfail flag.
                node.remaining_credits = node.server.weight().max(1);
                self.backup.lock().unwrap().push_back(node);
                examined += 1;
                continue;
            }
            node.remaining_credits -= 1;
            let picked = node.server.clone();
            if node.remaining_credits > 0 {
                current.push_back(node);
            } else {
                node.remaining_credits = node.server.weight().max(1);
                self.backup.lock().unwrap().push_back(node);
            }
            return Ok(picked);
        }
    }

    async fn reset(&self) {
        *self.members.lock().unwrap() = HashSet::new();
        *self.current.lock().unwrap() = VecDeque::new();
        *self.backup.lock().unwrap() = VecDeque::new();
    }

    fn kind(&self) -> BalancerKind {
        BalancerKind::RoundRobin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn server(addr: &str, weight: i32) -> Arc<Server> {
        let (s, _rx) = Server::new(addr, weight, "").unwrap();
        Arc::new(s)
    }

    #[tokio::test]
    async fn full_epoch_matches_weights() {
        let lb = RoundRobinBalancer::new();
        let weights = [("127.0.0.1:1", 1), ("127.0.0.1:2", 4), ("127.0.0.1:3", 2), ("127.0.0.1:4", 3), ("127.0.0.1:5", 5)];
        for (addr, w) in weights {
            lb.add_server_node(server(addr, w)).await.unwrap();
        }
        let total: i32 = weights.iter().map(|(_, w)| w).sum();
        let mut counts: HashMap<String, i32> = HashMap::new();
        for _ in 0..total {
            let s = lb.select_node().await.unwrap();
            *counts.entry(s.addr_str().to_string()).or_default() += 1;
        }
        for (addr, w) in weights {
            assert_eq!(counts.get(addr).copied().unwrap_or(0), w);
        }
    }

    #[tokio::test]
    async fn duplicate_add_errors() {
        let lb = RoundRobinBalancer::new();
        lb.add_server_node(server("127.0.0.1:1", 100)).await.unwrap();
        let err = lb.add_server_node(server("127.0.0.1:1", 100)).await.unwrap_err();
        assert_eq!(err, ProxyError::ServerExists);
    }

    #[tokio::test]
    async fn delete_missing_errors() {
        let lb = RoundRobinBalancer::new();
        let err = lb
            .delete_server_node(&server("127.0.0.1:1", 100))
            .await
            .unwrap_err();
        assert_eq!(err, ProxyError::ServerNotExists);
    }

    #[tokio::test]
    async fn pfail_server_is_skipped() {
        let lb = RoundRobinBalancer::new();
        let down = server("127.0.0.1:1", 100);
        down.set_pfail(true);
        let up = server("127.0.0.1:2", 100);
        lb.add_server_node(down.clone()).await.unwrap();
        lb.add_server_node(up.clone()).await.unwrap();
        for _ in 0..10 {
            let picked = lb.select_node().await.unwrap();
            assert_eq!(picked.addr(), up.addr());
        }
    }

    #[tokio::test]
    async fn empty_balancer_returns_no_server() {
        let lb = RoundRobinBalancer::new();
        assert_eq!(lb.select_node().await.unwrap_err(), ProxyError::NoServer);
    }

    #[tokio::test]
    async fn all_pfail_returns_no_server_instead_of_spinning() {
        let lb = RoundRobinBalancer::new();
        let s1 = server("127.0.0.1:1", 3);
        let s2 = server("127.0.0.1:2", 2);
        s1.set_pfail(true);
        s2.set_pfail(true);
        lb.add_server_node(s1).await.unwrap();
        lb.add_server_node(s2).await.unwrap();
        assert_eq!(lb.select_node().await.unwrap_err(), ProxyError::NoServer);
    }

    #[tokio::test]
    async fn deleted_server_never_selected_again() {
        let lb = RoundRobinBalancer::new();
        let s1 = server("127.0.0.1:1", 100);
        let s2 = server("127.0.0.1:2", 100);
        lb.add_server_node(s1.clone()).await.unwrap();
        lb.add_server_node(s2.clone()).await.unwrap();
        lb.delete_server_node(&s1).await.unwrap();
        for _ in 0..20 {
            let picked = lb.select_node().await.unwrap();
            assert_eq!(picked.addr(), s2.addr());
        }
    }
}
