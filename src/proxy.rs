use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response, Server, StatusCode, Uri};
use relaylb_core::{PathMatcher, ProxyError, ServerGroup};

/// Shared state for the proxy's HTTP listener.
pub struct ProxyState {
    pub addr: String,
    pub group: Arc<ServerGroup>,
    pub path_matcher: Arc<PathMatcher>,
    pub path_check_enabled: bool,
    pub circuit_breaker: bool,
    pub request_timeout: Duration,
    pub client: Client<HttpConnector>,
}

impl ProxyState {
    pub fn new(
        addr: String,
        group: Arc<ServerGroup>,
        path_matcher: Arc<PathMatcher>,
        path_check_enabled: bool,
        circuit_breaker: bool,
        request_timeout: Duration,
        keep_alive: bool,
    ) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(if keep_alive { usize::MAX } else { 0 })
            .build_http();
        Self {
            addr,
            group,
            path_matcher,
            path_check_enabled,
            circuit_breaker,
            request_timeout,
            client,
        }
    }
}

/// Binds and serves the proxy HTTP listener until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<ProxyState>,
    shutdown: impl Future<Output = ()>,
) -> hyper::Result<()> {
    let make_service = hyper::service::make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req| {
                handle_request(req, state.clone())
            }))
        }
    });
    log::info!("proxy listening on {}", addr);
    Server::bind(&addr)
        .serve(make_service)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle_request(
    req: Request<Body>,
    state: Arc<ProxyState>,
) -> Result<Response<Body>, Infallible> {
    if state.path_check_enabled && !state.path_matcher.matches(req.uri().path()) {
        return Ok(text_response(StatusCode::BAD_REQUEST, "Invalid URL path."));
    }

    let server = match state.group.select().await {
        Ok(server) => server,
        Err(ProxyError::NoServer) => {
            return Ok(text_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "No available servers.",
            ));
        }
        Err(err) => {
            log::error!("unexpected error selecting a server: {}", err);
            return Ok(text_response(StatusCode::SERVICE_UNAVAILABLE, "No available servers."));
        }
    };

    let upstream_uri = match rewrite_uri(req.uri(), &server.addr_str()) {
        Ok(uri) => uri,
        Err(_) => {
            return Ok(text_response(StatusCode::BAD_GATEWAY, "Bad gateway."));
        }
    };

    server.incr_active_req();
    let forwarded = forward(&state.client, upstream_uri, req);
    let result = if state.circuit_breaker {
        match tokio::time::timeout(state.request_timeout, forwarded).await {
            Ok(result) => result,
            Err(_) => {
                server.decr_active_req();
                if server.has_probe() {
                    state.group.mark_pfail(server.addr()).await;
                }
                log::warn!(
                    "circuit breaker fired for {}, marking it pfail",
                    server.addr_str()
                );
                return Ok(text_response(
                    StatusCode::REQUEST_TIMEOUT,
                    "Sorry, please retry later...",
                ));
            }
        }
    } else {
        forwarded.await
    };
    server.decr_active_req();

    match result {
        Ok(response) => Ok(response),
        Err(err) => {
            log::warn!("forwarding to {} failed: {}", server.addr_str(), err);
            Ok(text_response(StatusCode::BAD_GATEWAY, "Bad gateway."))
        }
    }
}

fn rewrite_uri(original: &Uri, upstream_addr: &str) -> Result<Uri, hyper::http::uri::InvalidUri> {
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("http://{}{}", upstream_addr, path_and_query).parse::<Uri>()
}

/// Forwards `req` to `uri`, streaming both the request and response bodies
/// through untouched.
async fn forward(
    client: &Client<HttpConnector>,
    uri: Uri,
    mut req: Request<Body>,
) -> hyper::Result<Response<Body>> {
    *req.uri_mut() = uri;
    client.request(req).await
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(body))
        .expect("static status/body always produce a valid response")
}
