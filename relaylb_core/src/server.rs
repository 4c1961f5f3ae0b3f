use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hyper::client::HttpConnector;
use hyper::{Client, Uri};
use tokio::sync::{oneshot, Mutex};

use crate::error::{ProxyError, Result};

/// Weight assigned to a server whose configured weight was `0`.
pub const DEFAULT_WEIGHT: i32 = 100;
/// Largest weight a server may be assigned.
pub const MAX_WEIGHT: i32 = 1_000_000;
/// Sentinel returned by [`Server::heartbeat`] when the probe did not succeed.
pub const NO_ACK: i64 = -1;

/// A single upstream endpoint the proxy can forward to.
///
/// All mutable fields are wait-free: counters and flags are plain atomics,
/// so the request path never blocks on a server's own state.
pub struct Server {
    addr: SocketAddr,
    addr_str: String,
    weight: AtomicI32,
    probe: Option<Uri>,
    probe_str: String,
    active_req: AtomicI32,
    pfail: AtomicBool,
    last_ack: AtomicI64,
    stop_health_check: Mutex<Option<oneshot::Sender<()>>>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.addr_str)
            .field("weight", &self.weight())
            .field("pfail", &self.is_pfail())
            .field("active_req", &self.active_req())
            .finish()
    }
}

impl Server {
    /// Builds a new server, validating `addr` and `weight`, and parsing
    /// `probe` as an HTTP(S) URL if non-empty.
    ///
    /// Returns the server along with the receiving half of its health-check
    /// cancellation signal, which is `None` when no probe is configured
    /// (there is nothing to check, so no task is ever spawned for it).
    pub fn new(addr: &str, weight: i32, probe: &str) -> Result<(Self, Option<oneshot::Receiver<()>>)> {
        let addr_sock: SocketAddr = addr.parse().map_err(|_| ProxyError::ServerAddrInvalid)?;
        let weight = normalize_weight(weight)?;

        let (probe_uri, probe_str) = if probe.is_empty() {
            (None, String::new())
        } else {
            let uri: Uri = probe.parse().map_err(|_| ProxyError::ServerProbeInvalid)?;
            match uri.scheme_str() {
                Some("http") | Some("https") => {}
                _ => return Err(ProxyError::ServerProbeInvalid),
            }
            (Some(uri), probe.to_string())
        };

        let (stop_health_check, stop_rx) = if probe_uri.is_some() {
            let (tx, rx) = oneshot::channel();
            (Mutex::new(Some(tx)), Some(rx))
        } else {
            (Mutex::new(None), None)
        };

        Ok((
            Self {
                addr: addr_sock,
                addr_str: addr.to_string(),
                weight: AtomicI32::new(weight),
                probe: probe_uri,
                probe_str,
                active_req: AtomicI32::new(0),
                pfail: AtomicBool::new(false),
                last_ack: AtomicI64::new(NO_ACK),
                stop_health_check,
            },
            stop_rx,
        ))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn addr_str(&self) -> &str {
        &self.addr_str
    }

    pub fn probe_str(&self) -> &str {
        &self.probe_str
    }

    pub fn has_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn weight(&self) -> i32 {
        self.weight.load(Ordering::SeqCst)
    }

    /// Sets the server's weight, normalizing `0` to [`DEFAULT_WEIGHT`] and
    /// rejecting out-of-range values.
    pub fn set_weight(&self, weight: i32) -> Result<()> {
        let weight = normalize_weight(weight)?;
        self.weight.store(weight, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_pfail(&self) -> bool {
        self.pfail.load(Ordering::SeqCst)
    }

    pub fn set_pfail(&self, pfail: bool) {
        self.pfail.store(pfail, Ordering::SeqCst);
    }

    pub fn last_ack(&self) -> i64 {
        self.last_ack.load(Ordering::SeqCst)
    }

    pub fn set_last_ack(&self, ts: i64) {
        self.last_ack.store(ts, Ordering::SeqCst);
    }

    pub fn active_req(&self) -> i32 {
        self.active_req.load(Ordering::SeqCst)
    }

    pub fn incr_active_req(&self) {
        self.active_req.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decr_active_req(&self) {
        let _ = self
            .active_req
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some((v - 1).max(0)));
    }

    /// Signals the server's health-check task to stop, if one is running.
    /// Safe to call more than once; only the first call has any effect.
    pub async fn close_health_check(&self) {
        if let Some(tx) = self.stop_health_check.lock().await.take() {
            let _ = tx.send(());
        }
    }

    /// Issues an HTTP GET against the configured probe URL, bounded by
    /// `deadline`. Returns the current wall-clock time in milliseconds on a
    /// `200 OK` response, or [`NO_ACK`] on any failure, non-200 status, or
    /// timeout.
    pub async fn heartbeat(&self, deadline: Duration) -> i64 {
        let uri = match &self.probe {
            Some(uri) => uri.clone(),
            None => return NO_ACK,
        };
        let client: Client<HttpConnector> = Client::new();
        let result = tokio::time::timeout(deadline, client.get(uri)).await;
        match result {
            Ok(Ok(resp)) if resp.status().is_success() => now_ms(),
            _ => NO_ACK,
        }
    }
}

fn normalize_weight(weight: i32) -> Result<i32> {
    if weight < 0 {
        return Err(ProxyError::ServerWeightNegative);
    }
    if weight > MAX_WEIGHT {
        return Err(ProxyError::ServerWeightGreaterThanMax);
    }
    if weight == 0 {
        return Ok(DEFAULT_WEIGHT);
    }
    Ok(weight)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_zero_normalizes_to_default() {
        let (server, _rx) = Server::new("127.0.0.1:8080", 0, "").unwrap();
        assert_eq!(server.weight(), DEFAULT_WEIGHT);
    }

    #[test]
    fn negative_weight_rejected() {
        let err = Server::new("127.0.0.1:8080", -1, "").unwrap_err();
        assert_eq!(err, ProxyError::ServerWeightNegative);
    }

    #[test]
    fn weight_above_max_rejected() {
        let err = Server::new("127.0.0.1:8080", 2_000_000, "").unwrap_err();
        assert_eq!(err, ProxyError::ServerWeightGreaterThanMax);
    }

    #[test]
    fn invalid_addr_rejected() {
        let err = Server::new("not-an-addr", 100, "").unwrap_err();
        assert_eq!(err, ProxyError::ServerAddrInvalid);
    }

    #[test]
    fn probe_without_scheme_rejected() {
        let err = Server::new("127.0.0.1:8080", 100, "127.0.0.1:9080").unwrap_err();
        assert_eq!(err, ProxyError::ServerProbeInvalid);
    }

    #[test]
    fn probe_allocates_stop_signal() {
        let (server, rx) = Server::new("127.0.0.1:8080", 100, "http://127.0.0.1:9080/check").unwrap();
        assert!(server.has_probe());
        assert!(rx.is_some());
    }

    #[test]
    fn no_probe_has_no_stop_signal() {
        let (server, rx) = Server::new("127.0.0.1:8080", 100, "").unwrap();
        assert!(!server.has_probe());
        assert!(rx.is_none());
    }

    #[tokio::test]
    async fn close_health_check_is_idempotent() {
        let (server, rx) = Server::new("127.0.0.1:8080", 100, "http://127.0.0.1:9080/check").unwrap();
        let mut rx = rx.unwrap();
        server.close_health_check().await;
        server.close_health_check().await;
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn active_req_never_goes_negative() {
        let (server, _rx) = Server::new("127.0.0.1:8080", 100, "").unwrap();
        server.decr_active_req();
        assert_eq!(server.active_req(), 0);
        server.incr_active_req();
        server.incr_active_req();
        server.decr_active_req();
        assert_eq!(server.active_req(), 1);
    }
}
