// src/bin/trader.rs
//! Trading client harness: order gateway client + market data consumer
//! driving a local book replica. Logs top-of-book changes and order
//! responses; strategy layers sit on top of these queues.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use tradecore::config::AppConfig;
use tradecore::consumer::MarketDataConsumer;
use tradecore::gateway_client::OrderGatewayClient;
use tradecore::net;
use tradecore::replica::MarketBooks;
use tradecore::spsc::SpscQueue;
use tradecore::types::limits;
use tradecore::util::RunFlag;

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

    // trading side -> gateway client -> exchange, and back
    let order_requests = Arc::new(SpscQueue::new(cfg.queues.client_updates));
    let order_responses = Arc::new(SpscQueue::new(cfg.queues.client_updates));
    // consumer -> trading side
    let market_updates = Arc::new(SpscQueue::new(cfg.queues.market_updates));

    let mut gateway = OrderGatewayClient::new(
        cfg.gateway.client_id,
        cfg.gateway.connect,
        order_requests.clone(),
        order_responses.clone(),
    )?;
    gateway.start();

    let incremental_sock = net::build_mcast_rx_socket(
        cfg.feed.incremental.group,
        cfg.feed.incremental.port,
        cfg.feed.iface_addr,
        cfg.feed.recv_buffer_bytes,
    )?;
    let mut consumer = MarketDataConsumer::new(
        market_updates.clone(),
        incremental_sock,
        cfg.feed.snapshot.group,
        cfg.feed.snapshot.port,
        cfg.feed.iface_addr,
        cfg.feed.recv_buffer_bytes,
        cfg.general.spin_loops_per_yield,
    );
    consumer.set_core(cfg.cpu.consumer_core);
    consumer.start();

    let mut books = MarketBooks::new(limits::MAX_TICKERS);
    info!("trader running as client {}; ctrl-c to stop", cfg.gateway.client_id);
    while !shutdown.is_raised() {
        let mut moved = false;
        while let Some(update) = market_updates.pop() {
            if let Some(ticker) = books.apply(&update) {
                info!("ticker {ticker} bbo: {}", books.book(ticker).bbo());
            }
            moved = true;
        }
        while let Some(response) = order_responses.pop() {
            info!("order response: {response}");
            moved = true;
        }
        if !moved {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    info!("stopping trader components");
    gateway.stop();
    consumer.stop();
    info!("clean shutdown");
    Ok(())
}
