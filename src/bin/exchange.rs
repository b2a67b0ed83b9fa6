// src/bin/exchange.rs
//! Exchange server: matching engine + order gateway + market data
//! publisher (with snapshot synthesizer), wired through SPSC queues.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use tradecore::config::AppConfig;
use tradecore::engine::MatchingEngine;
use tradecore::gateway_server::OrderGatewayServer;
use tradecore::net;
use tradecore::publisher::MarketDataPublisher;
use tradecore::spsc::SpscQueue;
use tradecore::synthesizer::SnapshotSynthesizer;
use tradecore::types::limits;
use tradecore::util::{lock_all_memory_if, set_realtime_priority_if, RunFlag};

fn init_logging(json: bool) {
    if json {
        let mut b =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        b.format(|buf, record| {
            use std::io::Write;
            let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            writeln!(
                buf,
                "{{\"ts\":\"{}\",\"level\":\"{}\",\"target\":\"{}\",\"msg\":\"{}\"}}",
                ts,
                record.level(),
                record.target(),
                record.args().to_string().replace('"', "'")
            )
        })
        .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
}

fn main() -> anyhow::Result<()> {
    let cfg_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let cfg = AppConfig::from_file(&cfg_path)?;
    init_logging(cfg.general.json_logs);
    info!("loaded config: {cfg:?}");

    let shutdown = Arc::new(RunFlag::default());
    {
        let s = shutdown.clone();
        ctrlc::set_handler(move || s.raise())?;
    }

    lock_all_memory_if(cfg.general.mlock_all);
    set_realtime_priority_if(cfg.cpu.rt_priority);

    let _metrics_handle = cfg.metrics.as_ref().map(|m| tradecore::metrics::spawn_http(m.bind.clone()));

    // OrderGatewayServer -> MatchingEngine -> {gateway, publisher}
    let client_requests = Arc::new(SpscQueue::new(cfg.queues.client_updates));
    let client_responses = Arc::new(SpscQueue::new(cfg.queues.client_updates));
    let market_updates = Arc::new(SpscQueue::new(cfg.queues.market_updates));
    // MarketDataPublisher -> SnapshotSynthesizer fork
    let snapshot_fork = Arc::new(SpscQueue::new(cfg.queues.market_updates));

    let mut engine = MatchingEngine::new(
        limits::MAX_TICKERS,
        limits::MAX_ORDER_IDS,
        client_requests.clone(),
        client_responses.clone(),
        market_updates.clone(),
    );
    engine.set_core(cfg.cpu.engine_core);
    engine.start();

    let mut gateway =
        OrderGatewayServer::new(cfg.gateway.bind, client_requests, client_responses)?;
    gateway.set_core(cfg.cpu.gateway_core);
    gateway.start();
    info!("order gateway listening on {}", gateway.local_addr());

    let incremental_sock = net::build_mcast_tx_socket(
        cfg.feed.incremental.group,
        cfg.feed.incremental.port,
        cfg.feed.iface_addr,
    )?;
    let mut publisher = MarketDataPublisher::new(
        market_updates,
        snapshot_fork.clone(),
        incremental_sock,
        cfg.general.spin_loops_per_yield,
    );
    publisher.set_core(cfg.cpu.publisher_core);
    publisher.start();

    let snapshot_sock = net::build_mcast_tx_socket(
        cfg.feed.snapshot.group,
        cfg.feed.snapshot.port,
        cfg.feed.iface_addr,
    )?;
    let mut synthesizer = SnapshotSynthesizer::new(
        snapshot_fork,
        snapshot_sock,
        limits::MAX_TICKERS,
        Duration::from_secs(cfg.feed.snapshot_interval_secs),
    );
    synthesizer.set_core(cfg.cpu.synthesizer_core);
    synthesizer.start();

    info!("exchange running; ctrl-c to stop");
    while !shutdown.is_raised() {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("stopping exchange components");
    gateway.stop(); // stop taking orders first
    engine.stop(); // drains whatever the gateway already forwarded
    publisher.stop();
    synthesizer.stop();
    info!("clean shutdown");
    Ok(())
}
