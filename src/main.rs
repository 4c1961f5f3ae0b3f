use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use relaylb_core::{BalancerKind, PathMatcher, ServerGroup};

mod admin;
mod commands;
mod config;
mod proxy;
mod shutdown;

use admin::AdminState;
use config::RootConfig;
use proxy::ProxyState;
use shutdown::ShutdownCoordinator;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
    /// Verbose level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Disable colors from output.
    #[arg(long)]
    no_color: bool,
    /// Raise the maximum number of open files allowed to avoid issues.
    ///
    /// Not enabled by default as it may not work in all environments.
    #[arg(long)]
    raise_ulimit: bool,
}

fn main() {
    let args = Args::parse();
    let log_level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    SimpleLogger::new()
        .with_level(log_level)
        .with_colors(!args.no_color)
        .init()
        .unwrap();

    if args.raise_ulimit {
        let ulimit = fdlimit::raise_fd_limit().unwrap_or(0);
        log::info!("raised ulimit to {}", ulimit);
    }

    run(args);
}

#[tokio::main]
async fn run(args: Args) {
    let config = match config::load_or_create(&args.config).await {
        Ok(config) => config,
        Err(err) => {
            log::error!(
                "could not load configuration file ({}): {}",
                args.config.display(),
                err
            );
            return;
        }
    };
    log::debug!("parsed configuration: {:#?}", config);

    if let Err(err) = serve(args.config, config).await {
        log::error!("{}", err);
    }
}

async fn serve(config_path: PathBuf, config: RootConfig) -> anyhow::Result<()> {
    let balancer_kind = BalancerKind::from_str(&config.balancer)?;
    let group = Arc::new(ServerGroup::new(
        balancer_kind,
        config.health_check,
        Duration::from_secs(config.health_check_interval_secs),
        Duration::from_secs(config.pfail_timeout_secs),
    ));
    let entries: Vec<(String, i32, String)> = config
        .servers
        .iter()
        .map(|s| (s.addr.clone(), s.weight, s.probe.clone()))
        .collect();
    group.init_from(&entries).await?;

    let path_matcher = Arc::new(PathMatcher::from_entries(config.url_path_map.iter()));

    let proxy_addr: SocketAddr = config.proxy_addr.parse()?;
    let admin_addr: SocketAddr = config.admin_addr.parse()?;

    let proxy_state = Arc::new(ProxyState::new(
        config.proxy_addr.clone(),
        group,
        path_matcher,
        config.path_check,
        config.circuit_breaker,
        Duration::from_millis(config.request_timeout_ms),
        config.keep_alive,
    ));

    let shutdown = Arc::new(ShutdownCoordinator::new());

    let admin_state = Arc::new(AdminState {
        proxy: proxy_state.clone(),
        shutdown: shutdown.clone(),
        read_buffer_size: config.query_buffer_size,
        config_path: config_path.clone(),
        admin_addr: config.admin_addr.clone(),
        health_check: config.health_check,
        health_check_interval: Duration::from_secs(config.health_check_interval_secs),
        pfail_timeout: Duration::from_secs(config.pfail_timeout_secs),
        keep_alive: config.keep_alive,
        url_path_map: config.url_path_map.clone(),
    });

    let proxy_shutdown = shutdown.clone();
    let proxy_task = tokio::spawn(async move {
        proxy::serve(proxy_addr, proxy_state, async move {
            proxy_shutdown.triggered().await
        })
        .await
    });

    let admin_shutdown = shutdown.clone();
    let admin_state_for_task = admin_state.clone();
    let admin_task = tokio::spawn(async move {
        admin::serve(admin_addr, admin_state_for_task, async move {
            admin_shutdown.triggered().await
        })
        .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("received interrupt signal, shutting down...");
        }
        _ = shutdown.triggered() => {
            log::info!("shutdown requested by admin command...");
        }
    }
    shutdown.trigger();

    let _ = proxy_task.await;
    let _ = admin_task.await;
    admin_state.proxy.group.close_all_health_checks().await;

    if let Err(err) = commands::save_server_list(&admin_state).await {
        log::error!("failed to save configuration on shutdown: {}", err);
    }
    Ok(())
}
