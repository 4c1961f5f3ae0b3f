use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

use rand::Rng;

use super::{BalancerKind, LoadBalancer};
use crate::error::{ProxyError, Result};
use crate::server::Server;

/// Fraction of total weight that may sit tombstoned before a compaction is
/// triggered on the next successful delete.
const LAZY_DEL_THRESHOLD: f64 = 0.2;
/// Number of CDF draws attempted before falling back to a linear scan.
const DEFAULT_MAX_RETRY: usize = 3;

struct Inner {
    /// `server_list[i]` is `None` for a tombstoned (deleted) slot.
    server_list: Vec<Option<Arc<Server>>>,
    /// Prefix sums of weights, parallel to `server_list`.
    weight_sum: Vec<i64>,
    deleted_weight_sum: i64,
}

/// Weighted random balancer using a cumulative-distribution-function draw
/// with lazy deletion.
///
/// Deleting a server tombstones its slot rather than shifting the vector;
/// once the tombstoned weight exceeds [`LAZY_DEL_THRESHOLD`] of the total,
/// the next delete compacts both vectors. This keeps selection close to
/// O(log n) without paying for a full rebuild on every removal.
pub struct RandomBalancer {
    inner: RwLock<Inner>,
    members: Mutex<HashMap<SocketAddr, usize>>,
}

impl RandomBalancer {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                server_list: Vec::new(),
                weight_sum: Vec::new(),
                deleted_weight_sum: 0,
            }),
            members: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for RandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LoadBalancer for RandomBalancer {
    async fn add_server_node(&self, server: Arc<Server>) -> Result<()> {
        let mut members = self.members.lock().unwrap();
        if members.contains_key(&server.addr()) {
            return Err(ProxyError::ServerExists);
        }

        let mut inner = self.inner.write().unwrap();
        let weight = server.weight().max(1) as i64;
        let index = inner.server_list.len();
        let prefix = inner.weight_sum.last().copied().unwrap_or(0) + weight;
        inner.server_list.push(Some(server.clone()));
        inner.weight_sum.push(prefix);
        members.insert(server.addr(), index);
        Ok(())
    }

    async fn delete_server_node(&self, server: &Arc<Server>) -> Result<()> {
        let mut members = self.members.lock().unwrap();
        let index = match members.remove(&server.addr()) {
            Some(index) => index,
            None => return Err(ProxyError::ServerNotExists),
        };

        let mut inner = self.inner.write().unwrap();
        inner.server_list[index] = None;
        inner.deleted_weight_sum += server.weight().max(1) as i64;

        let total = *inner.weight_sum.last().unwrap_or(&0);
        if total > 0 && inner.deleted_weight_sum as f64 / total as f64 > LAZY_DEL_THRESHOLD {
            compact(&mut inner, &mut members);
        }
        Ok(())
    }

    async fn select_node(&self) -> Result<Arc<Server>> {
        let inner = self.inner.read().unwrap();
        if inner.server_list.is_empty() {
            return Err(ProxyError::NoServer);
        }

        let total = *inner.weight_sum.last().unwrap();
        for _ in 0..=DEFAULT_MAX_RETRY {
            let target = rand::thread_rng().gen_range(1..=total);
            let index = lower_bound(&inner.weight_sum, target);
            if let Some(server) = &inner.server_list[index] {
                if !server.is_pfail() {
                    return Ok(server.clone());
                }
            }
        }

        let len = inner.server_list.len();
        let start = rand::thread_rng().gen_range(0..len);
        for offset in 0..len {
            let idx = (start + offset) % len;
            if let Some(server) = &inner.server_list[idx] {
                if !server.is_pfail() {
                    return Ok(server.clone());
                }
            }
        }
        Err(ProxyError::NoServer)
    }

    async fn reset(&self) {
        *self.inner.write().unwrap() = Inner {
            server_list: Vec::new(),
            weight_sum: Vec::new(),
            deleted_weight_sum: 0,
        };
        self.members.lock().unwrap().clear();
    }

    fn kind(&self) -> BalancerKind {
        BalancerKind::Random
    }
}

/// Index of the first prefix-sum entry `>= target`.
fn lower_bound(weight_sum: &[i64], target: i64) -> usize {
    let (mut l, mut r) = (0usize, weight_sum.len() - 1);
    while l < r {
        let mid = (l + r) / 2;
        if weight_sum[mid] >= target {
            r = mid;
        } else {
            l = mid + 1;
        }
    }
    l
}

fn compact(inner: &mut Inner, members: &mut HashMap<SocketAddr, usize>) {
    members.clear();
    let mut server_list = Vec::with_capacity(inner.server_list.len());
    let mut weight_sum = Vec::with_capacity(inner.weight_sum.len());
    for slot in inner.server_list.drain(..) {
        if let Some(server) = slot {
            let index = server_list.len();
            let prefix = weight_sum.last().copied().unwrap_or(0) + server.weight().max(1) as i64;
            members.insert(server.addr(), index);
            server_list.push(Some(server));
            weight_sum.push(prefix);
        }
    }
    inner.server_list = server_list;
    inner.weight_sum = weight_sum;
    inner.deleted_weight_sum = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn server(addr: &str, weight: i32) -> Arc<Server> {
        let (s, _rx) = Server::new(addr, weight, "").unwrap();
        Arc::new(s)
    }

    #[tokio::test]
    async fn converges_to_weight_ratio() {
        let lb = RandomBalancer::new();
        let weights = [("127.0.0.1:1", 1), ("127.0.0.1:2", 3)];
        for (addr, w) in weights {
            lb.add_server_node(server(addr, w)).await.unwrap();
        }
        let draws = 200_000;
        let mut counts: StdHashMap<String, i32> = StdHashMap::new();
        for _ in 0..draws {
            let s = lb.select_node().await.unwrap();
            *counts.entry(s.addr_str().to_string()).or_default() += 1;
        }
        let ratio = *counts.get("127.0.0.1:2").unwrap() as f64 / draws as f64;
        assert!((ratio - 0.75).abs() < 0.02, "ratio was {ratio}");
    }

    #[tokio::test]
    async fn lazy_delete_stays_under_threshold() {
        let lb = RandomBalancer::new();
        for i in 0..10 {
            lb.add_server_node(server(&format!("127.0.0.1:{}", i + 1), 100))
                .await
                .unwrap();
        }
        let victim = server("127.0.0.1:1", 100);
        lb.delete_server_node(&victim).await.unwrap();
        let inner = lb.inner.read().unwrap();
        let total = *inner.weight_sum.last().unwrap();
        assert!(inner.deleted_weight_sum as f64 / total as f64 <= LAZY_DEL_THRESHOLD + f64::EPSILON);
    }

    #[tokio::test]
    async fn deleted_server_never_selected_again() {
        let lb = RandomBalancer::new();
        let s1 = server("127.0.0.1:1", 100);
        let s2 = server("127.0.0.1:2", 100);
        lb.add_server_node(s1.clone()).await.unwrap();
        lb.add_server_node(s2.clone()).await.unwrap();
        lb.delete_server_node(&s1).await.unwrap();
        for _ in 0..50 {
            let picked = lb.select_node().await.unwrap();
            assert_eq!(picked.addr(), s2.addr());
        }
    }

    #[tokio::test]
    async fn empty_balancer_returns_no_server() {
        let lb = RandomBalancer::new();
        assert_eq!(lb.select_node().await.unwrap_err(), ProxyError::NoServer);
    }
}
