use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::server::{Server, NO_ACK};
use crate::server_group::ServerGroup;

/// Spawns the per-server health-check task described by the group's
/// configuration.
///
/// The loop waits for either the check interval to elapse or the server's
/// cancellation signal to fire, probes once, and updates pfail state. Only
/// the health checker ever clears pfail; the request path's circuit
/// breaker only ever sets it.
pub fn spawn_health_check(
    group: Arc<ServerGroup>,
    server: Arc<Server>,
    mut stop_rx: oneshot::Receiver<()>,
    interval: Duration,
    pfail_timeout: Duration,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    log::debug!("health check for {} stopped", server.addr_str());
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let ack = server.heartbeat(pfail_timeout).await;
            if ack == NO_ACK {
                let was_pfail = server.is_pfail();
                group.mark_pfail(server.addr()).await;
                if !was_pfail {
                    log::warn!("server {} seems unreachable", server.addr_str());
                }
            } else {
                server.set_last_ack(ack);
                let was_pfail = server.is_pfail();
                group.clear_pfail(server.addr()).await;
                if was_pfail {
                    log::info!("server {} is back online", server.addr_str());
                }
            }
        }
    });
}
