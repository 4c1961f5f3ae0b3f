use std::fmt::Write as _;

use relaylb_core::{BalancerKind, ProxyError, ServerSnapshot};

use crate::admin::AdminState;
use crate::config::{self, RootConfig, ServerEntry};

const ERR_WRONG_NUM_ARGS: &str = "[ERROR]:wrong number of arguments";
const ERR_SYNTAX: &str = "[ERROR]:syntax error";
const REPLY_OK: &str = "OK";

pub enum CommandError {
    /// Command name not found in the dispatch table.
    Unknown,
    /// Command was recognized but failed; the text is the full reply.
    Message(String),
}

impl From<&str> for CommandError {
    fn from(s: &str) -> Self {
        CommandError::Message(s.to_string())
    }
}

impl From<ProxyError> for CommandError {
    fn from(err: ProxyError) -> Self {
        CommandError::Message(err.to_string())
    }
}

/// Looks up `args[0]` in the command table and runs it, returning the full
/// reply text on success (handlers are responsible for their own reply
/// formatting, matching the source's per-handler `Reply` calls).
pub async fn dispatch(args: &[&str], state: &AdminState) -> Result<String, CommandError> {
    match args[0] {
        "info" => exec_info(args, state).await,
        "addserver" => exec_add_server(args, state).await,
        "deleteserver" => exec_delete_server(args, state).await,
        "exists" => exec_exists(args, state).await,
        "getserver" => exec_get_server(args, state).await,
        "setweight" => exec_set_weight(args, state).await,
        "save" => exec_save(args, state).await,
        "shutdown" => exec_shutdown(args, state).await,
        _ => Err(CommandError::Unknown),
    }
}

fn write_server_info(out: &mut String, s: &ServerSnapshot) {
    let _ = writeln!(out, "address: {}", s.addr);
    let _ = writeln!(out, "weight: {}", s.weight);
    if !s.probe.is_empty() {
        let _ = writeln!(out, "probe: {}", s.probe);
        let _ = writeln!(out, "last ack timestamp: {}", s.last_ack);
    }
    let _ = writeln!(out, "pfail:{}", s.pfail);
    let _ = writeln!(out, "active requests: {}\n", s.active_req);
}

async fn exec_info(args: &[&str], state: &AdminState) -> Result<String, CommandError> {
    if args.len() != 1 {
        return Err(ERR_WRONG_NUM_ARGS.into());
    }
    let proxy = &state.proxy;
    let mut out = String::new();
    out.push_str("[INFO]\n[Proxy]\n");
    let _ = writeln!(out, "proxy address: {}", proxy.addr);
    let _ = writeln!(out, "proxy manager address: {}", state.admin_addr);

    out.push_str("circuit breaker option: ");
    if proxy.circuit_breaker {
        out.push_str("true\n");
        let _ = writeln!(
            out,
            "request timeout: {}ms",
            proxy.request_timeout.as_millis()
        );
    } else {
        out.push_str("false\n");
    }

    out.push_str("health check option: ");
    if state.health_check {
        out.push_str("true\n");
        let _ = writeln!(
            out,
            "heahth check interval: {}ms",
            state.health_check_interval.as_millis()
        );
        let _ = writeln!(out, "pfail time: {}ms", state.pfail_timeout.as_millis());
    } else {
        out.push_str("false\n");
    }

    out.push_str("keep-alive option: ");
    out.push_str(if state.keep_alive { "true\n" } else { "false\n" });

    let _ = writeln!(
        out,
        "load balance type: {}",
        balancer_tag(proxy.group.balancer_kind())
    );

    out.push_str("url path check option: ");
    if proxy.path_check_enabled {
        out.push_str("true\n");
        out.push_str("url path:\n");
        for path in &state.url_path_map {
            let _ = writeln!(out, "\t- {}", path);
        }
    } else {
        out.push_str("false\n");
    }

    let _ = writeln!(
        out,
        "number of pfail servers: {}",
        proxy.group.pfail_count()
    );

    out.push_str("\n[Server]\n");
    for (idx, server) in proxy.group.snapshot().await.iter().enumerate() {
        let _ = writeln!(out, "-----server{}-----", idx + 1);
        write_server_info(&mut out, server);
    }
    Ok(out)
}

fn balancer_tag(kind: BalancerKind) -> &'static str {
    match kind {
        BalancerKind::RoundRobin => "round-robin",
        BalancerKind::Random => "random",
        BalancerKind::LeastActive => "least-active",
    }
}

async fn exec_add_server(args: &[&str], state: &AdminState) -> Result<String, CommandError> {
    if args.len() < 2 || args.len() > 4 {
        return Err(ERR_WRONG_NUM_ARGS.into());
    }
    let addr = args[1];
    let weight = if args.len() >= 3 {
        args[2].parse::<i32>().map_err(|_| ERR_SYNTAX)?
    } else {
        relaylb_core::server::DEFAULT_WEIGHT
    };
    let probe = args.get(3).copied().unwrap_or("");
    state.proxy.group.add_server(addr, weight, probe).await?;
    Ok(REPLY_OK.to_string())
}

async fn exec_delete_server(args: &[&str], state: &AdminState) -> Result<String, CommandError> {
    if args.len() != 2 {
        return Err(ERR_WRONG_NUM_ARGS.into());
    }
    state.proxy.group.delete_server(args[1]).await?;
    Ok(REPLY_OK.to_string())
}

async fn exec_exists(args: &[&str], state: &AdminState) -> Result<String, CommandError> {
    if args.len() != 2 {
        return Err(ERR_WRONG_NUM_ARGS.into());
    }
    Ok(if state.proxy.group.is_server_exists(args[1]).await {
        "true".to_string()
    } else {
        "false".to_string()
    })
}

async fn exec_get_server(args: &[&str], state: &AdminState) -> Result<String, CommandError> {
    if args.len() != 2 {
        return Err(ERR_WRONG_NUM_ARGS.into());
    }
    let snapshot = state.proxy.group.get_server(args[1]).await?;
    let mut out = String::new();
    write_server_info(&mut out, &snapshot);
    Ok(out)
}

async fn exec_set_weight(args: &[&str], state: &AdminState) -> Result<String, CommandError> {
    if args.len() != 3 {
        return Err(ERR_WRONG_NUM_ARGS.into());
    }
    let weight = args[2].parse::<i32>().map_err(|_| ERR_SYNTAX)?;
    state.proxy.group.set_weight(args[1], weight).await?;
    Ok(REPLY_OK.to_string())
}

async fn exec_save(args: &[&str], state: &AdminState) -> Result<String, CommandError> {
    if args.len() != 1 {
        return Err(ERR_WRONG_NUM_ARGS.into());
    }
    match save_server_list(state).await {
        Ok(()) => Ok(REPLY_OK.to_string()),
        Err(err) => {
            log::warn!("save failed: {}", err);
            Ok("Save failed.".to_string())
        }
    }
}

async fn exec_shutdown(args: &[&str], state: &AdminState) -> Result<String, CommandError> {
    if args.len() != 1 {
        return Err(ERR_WRONG_NUM_ARGS.into());
    }
    state.shutdown.trigger();
    Ok(REPLY_OK.to_string())
}

/// Snapshots the current server set into the on-disk config, preserving
/// every other configured field.
pub async fn save_server_list(state: &AdminState) -> anyhow::Result<()> {
    let mut root = RootConfig {
        proxy_addr: state.proxy.addr.clone(),
        admin_addr: state.admin_addr.clone(),
        circuit_breaker: state.proxy.circuit_breaker,
        request_timeout_ms: state.proxy.request_timeout.as_millis() as u64,
        health_check: state.health_check,
        health_check_interval_secs: state.health_check_interval.as_secs(),
        pfail_timeout_secs: state.pfail_timeout.as_secs(),
        keep_alive: state.keep_alive,
        balancer: balancer_tag(state.proxy.group.balancer_kind()).to_string(),
        path_check: state.proxy.path_check_enabled,
        url_path_map: state.url_path_map.clone(),
        query_buffer_size: state.read_buffer_size,
        servers: Vec::new(),
    };
    root.servers = state
        .proxy
        .group
        .snapshot()
        .await
        .into_iter()
        .map(|s| ServerEntry {
            addr: s.addr,
            weight: s.weight,
            probe: s.probe,
        })
        .collect();
    config::save(&state.config_path, &root).await
}
