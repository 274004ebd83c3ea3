//! `fleetlb start`: wires every component and serves until ctrl-c

use crate::config::{Config, PayoutSettings};
use anyhow::Context;
use chrono::Utc;
use fleet_api::{
    start_pollers, start_server, ApiState, FleetMetrics, MetricsSources, PollIntervals,
    TunnelForwarder,
};
use fleet_core::{FleetDb, RepeatingTask, Repos};
use fleet_network::{AddrPool, KeepAliveConfig, TunnelRegistry, TunnelServer};
use fleet_nodes::{
    FleetGatekeeper, HealthTracker, NodeRegistrar, NodeRouter, RequestRecorder,
};
use fleet_payout::{start_scheduled_payout, PayoutEngine, ScriptTransfer};
use owo_colors::OwoColorize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Store file inside the data dir
pub const DB_FILE: &str = "fleetlb.db";

pub fn open_repos(data_dir: Option<&Path>) -> anyhow::Result<Repos> {
    match data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create data dir {}", dir.display()))?;
            let db = FleetDb::open(dir.join(DB_FILE))?;
            info!(path = %db.path(), "opened persistent store");
            Ok(Repos::sled(db))
        }
        None => {
            warn!("no data dir configured, state is kept in memory only");
            Ok(Repos::in_memory())
        }
    }
}

pub fn payout_engine(
    repos: &Repos,
    settings: &PayoutSettings,
    fee: fleet_core::FeeRate,
) -> anyhow::Result<Arc<PayoutEngine>> {
    let executor = Arc::new(ScriptTransfer::new(&settings.script));
    let engine = PayoutEngine::new(repos.clone(), settings.config.clone(), fee, executor)?;
    Ok(Arc::new(engine))
}

fn advertised_tunnel_address(config: &Config) -> String {
    if let Some(address) = &config.tunnel_server_address {
        return address.clone();
    }
    match local_ip_address::local_ip() {
        Ok(ip) => SocketAddr::new(ip, config.tunnel_server_port).to_string(),
        Err(e) => {
            warn!(error = %e, "could not detect local ip, advertising loopback");
            format!("127.0.0.1:{}", config.tunnel_server_port)
        }
    }
}

fn print_banner(config: &Config, tunnel_address: &str) {
    println!("{}", "fleetlb load balancer".cyan().bold());
    println!("{}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_black());
    println!("{}: {}", "Version".yellow().bold(), crate::version_string());
    println!("{}: {}", "API port".yellow().bold(), config.server_port);
    println!("{}: {}", "Tunnel server".yellow().bold(), tunnel_address);
    println!("{}: {}", "Tunnel ports".yellow().bold(), config.port_range);
    println!("{}: {}", "Capacity".yellow().bold(), config.capacity);
    println!("{}: {}", "Selection".yellow().bold(), config.selection);
    println!(
        "{}: {:.2}%",
        "LB fee".yellow().bold(),
        config.fee.as_fraction() * 100.0
    );
    if config.whitelist.is_enabled() {
        println!(
            "{}: {} nodes",
            "Whitelist".yellow().bold(),
            config.whitelist.len()
        );
    }
    match &config.payout {
        Some(payout) => println!(
            "{}: every {} days, {} tokens",
            "Payouts".yellow().bold(),
            payout.config.interval_days,
            payout.config.total_reward
        ),
        None => println!("{}", "⚠ Scheduled payout not configured".yellow()),
    }
    println!("{}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_black());
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let repos = open_repos(config.data_dir.as_deref())?;
    let whitelist = Arc::new(config.whitelist.clone());

    let pool = Arc::new(AddrPool::new(config.port_range));
    let registry = Arc::new(TunnelRegistry::with_capacity(
        pool,
        KeepAliveConfig::default(),
        config.capacity,
    ));
    let gatekeeper = Arc::new(FleetGatekeeper::new(repos.clone(), whitelist.clone()));

    let tunnel_listen = SocketAddr::from(([0, 0, 0, 0], config.tunnel_server_port));
    let tunnel_server = TunnelServer::bind(tunnel_listen, registry.clone(), gatekeeper)
        .await
        .context("failed to start tunnel server")?;

    let health = Arc::new(HealthTracker::with_threshold(
        repos.clone(),
        config.ping_threshold,
    ));
    let router = Arc::new(NodeRouter::new(
        repos.clone(),
        registry.clone(),
        whitelist.clone(),
        config.selection,
    ));
    let registrar = Arc::new(NodeRegistrar::new(
        repos.clone(),
        whitelist,
        registry.clone(),
    ));

    let metrics = Arc::new(FleetMetrics::new(config.fee));
    let mut tasks: Vec<RepeatingTask> = start_pollers(
        metrics.clone(),
        MetricsSources {
            repos: repos.clone(),
            fee: config.fee,
            payout_interval_days: config.payout.as_ref().map(|p| p.config.interval_days),
        },
        PollIntervals::from_env(),
    );

    if let Some(settings) = &config.payout {
        let engine = payout_engine(&repos, settings, config.fee)?;
        if engine.ensure_anchor(Utc::now())? {
            info!("no payout history, anchored payout schedule");
        }
        info!(
            next = %engine.next_payout_date()?.format("%Y-%m-%d"),
            "scheduled payout enabled"
        );
        tasks.push(start_scheduled_payout(engine));
    }

    let tunnel_address = advertised_tunnel_address(&config);
    let state = ApiState {
        repos: repos.clone(),
        registry: registry.clone(),
        router,
        recorder: RequestRecorder::new(repos),
        health,
        registrar,
        metrics,
        forwarder: Arc::new(TunnelForwarder::new(registry.clone())),
        tunnel_server_address: tunnel_address.clone(),
        start_time: Instant::now(),
    };

    print_banner(&config, &tunnel_address);

    let tunnel_task = tokio::spawn(tunnel_server.run());
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));

    let outcome = tokio::select! {
        result = start_server(api_addr, state) => {
            result.context("api server stopped")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    };

    tunnel_task.abort();
    for task in tasks {
        task.shutdown().await;
    }
    println!("{}", "✓ fleetlb stopped".green());
    outcome
}
