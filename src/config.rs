use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

fn default_proxy_addr() -> String {
    "127.0.0.1:5200".to_string()
}

fn default_admin_addr() -> String {
    "127.0.0.1:5201".to_string()
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_health_check() -> bool {
    true
}

fn default_health_check_interval_secs() -> u64 {
    1
}

fn default_pfail_timeout_secs() -> u64 {
    3
}

fn default_balancer() -> String {
    "round-robin".to_string()
}

fn default_query_buffer_size() -> usize {
    1024
}

/// One entry of the configured initial server list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub addr: String,
    #[serde(default = "default_weight")]
    pub weight: i32,
    #[serde(default)]
    pub probe: String,
}

fn default_weight() -> i32 {
    relaylb_core::server::DEFAULT_WEIGHT
}

/// The proxy's on-disk configuration document.
///
/// Persisted as TOML; created with defaults on first run, reloaded at
/// startup, and overwritten in place by the `save` admin command and by the
/// save-on-exit shutdown hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default = "default_proxy_addr", alias = "proxy-addr")]
    pub proxy_addr: String,
    #[serde(default = "default_admin_addr", alias = "proxy-manager-addr")]
    pub admin_addr: String,

    #[serde(default, alias = "circuit-breaker-option")]
    pub circuit_breaker: bool,
    #[serde(default = "default_request_timeout_ms", alias = "request-timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_health_check", alias = "health-check-option")]
    pub health_check: bool,
    #[serde(
        default = "default_health_check_interval_secs",
        alias = "health-check-rate"
    )]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_pfail_timeout_secs", alias = "pfail-time")]
    pub pfail_timeout_secs: u64,

    #[serde(default, alias = "keep-alive-option")]
    pub keep_alive: bool,

    #[serde(default = "default_balancer", alias = "load-balancer-type")]
    pub balancer: String,

    #[serde(default, alias = "url-path-check-option")]
    pub path_check: bool,
    #[serde(default, alias = "url-path-map")]
    pub url_path_map: Vec<String>,

    #[serde(default = "default_query_buffer_size", alias = "query-buffer-size")]
    pub query_buffer_size: usize,

    #[serde(default, alias = "server-list")]
    pub servers: Vec<ServerEntry>,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            proxy_addr: default_proxy_addr(),
            admin_addr: default_admin_addr(),
            circuit_breaker: false,
            request_timeout_ms: default_request_timeout_ms(),
            health_check: default_health_check(),
            health_check_interval_secs: default_health_check_interval_secs(),
            pfail_timeout_secs: default_pfail_timeout_secs(),
            keep_alive: false,
            balancer: default_balancer(),
            path_check: false,
            url_path_map: Vec::new(),
            query_buffer_size: default_query_buffer_size(),
            servers: Vec::new(),
        }
    }
}

/// Loads the config file at `path`, creating it with defaults if absent.
pub async fn load_or_create(path: &Path) -> anyhow::Result<RootConfig> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::info!(
                "no configuration file found at {}, writing defaults",
                path.display()
            );
            let config = RootConfig::default();
            save(path, &config).await?;
            Ok(config)
        }
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

/// Overwrites the config file at `path` with `config`, used by the `save`
/// admin command and on graceful shutdown.
pub async fn save(path: &Path, config: &RootConfig) -> anyhow::Result<()> {
    let contents = toml::to_string_pretty(config).context("serializing configuration")?;
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = RootConfig::default();
        assert_eq!(config.proxy_addr, "127.0.0.1:5200");
        assert_eq!(config.admin_addr, "127.0.0.1:5201");
        assert_eq!(config.request_timeout_ms, 3000);
        assert_eq!(config.health_check_interval_secs, 1);
        assert_eq!(config.pfail_timeout_secs, 3);
        assert!(!config.circuit_breaker);
        assert!(config.health_check);
        assert!(!config.path_check);
        assert!(!config.keep_alive);
        assert_eq!(config.balancer, "round-robin");
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = RootConfig::default();
        config.servers.push(ServerEntry {
            addr: "127.0.0.1:9080".to_string(),
            weight: 150,
            probe: "http://127.0.0.1:9080/check".to_string(),
        });
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: RootConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.servers.len(), 1);
        assert_eq!(parsed.servers[0].addr, "127.0.0.1:9080");
        assert_eq!(parsed.servers[0].weight, 150);
    }
}
