use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::commands::{self, CommandError};
use crate::proxy::ProxyState;
use crate::shutdown::ShutdownCoordinator;

/// Shared state reachable from an admin connection.
pub struct AdminState {
    pub proxy: Arc<ProxyState>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub read_buffer_size: usize,
    pub config_path: std::path::PathBuf,

    pub admin_addr: String,
    pub health_check: bool,
    pub health_check_interval: std::time::Duration,
    pub pfail_timeout: std::time::Duration,
    pub keep_alive: bool,
    pub url_path_map: Vec<String>,
}

const UNKNOWN_COMMAND: &str = "[ERROR]:Unknown command error.";

/// Accepts admin connections until `shutdown` resolves. One task per
/// connection; each connection is read-reply-read in a loop until the
/// client disconnects or a read fails.
pub async fn serve(
    addr: std::net::SocketAddr,
    state: Arc<AdminState>,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("admin listening on {}", addr);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("admin listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (conn, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        log::warn!("admin accept failed: {}", err);
                        continue;
                    }
                };
                log::info!("admin client connected: {}", peer);
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(conn, state).await {
                        log::warn!("admin client {} disconnected: {}", peer, err);
                    }
                });
            }
        }
    }
}

async fn handle_connection(mut conn: TcpStream, state: Arc<AdminState>) -> anyhow::Result<()> {
    let mut buf = vec![0u8; state.read_buffer_size];
    loop {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf[..n]).to_lowercase();
        let args: Vec<&str> = line.split_whitespace().collect();
        if args.is_empty() {
            continue;
        }

        let reply = match commands::dispatch(&args, &state).await {
            Ok(reply) => reply,
            Err(CommandError::Unknown) => UNKNOWN_COMMAND.to_string(),
            Err(CommandError::Message(msg)) => msg,
        };
        conn.write_all(reply.as_bytes()).await?;

        if matches!(args[0], "shutdown") {
            return Ok(());
        }
    }
}
