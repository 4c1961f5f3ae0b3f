use thiserror::Error;

/// Errors surfaced by the server pool and load balancers.
///
/// These map directly to the error texts sent back over the admin
/// protocol, and to HTTP status codes on the request path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("Server already exists.")]
    ServerExists,
    #[error("Server does not exists.")]
    ServerNotExists,
    #[error("Server weight cannot be negative.")]
    ServerWeightNegative,
    #[error("Server weight cannot greater than max limit 1000000.")]
    ServerWeightGreaterThanMax,
    #[error("Server address invalid.")]
    ServerAddrInvalid,
    #[error(
        "Server probe invalid, probe must have an HTTP scheme, for example: http://127.0.0.1:8081/check/"
    )]
    ServerProbeInvalid,
    #[error("No available servers.")]
    NoServer,
    #[error("Unknown load balancer type.")]
    UnknownLoadBalancer,
}

pub type Result<T> = std::result::Result<T, ProxyError>;
