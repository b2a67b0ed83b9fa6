// src/metrics.rs
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::net::ToSocketAddrs;
use std::thread;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static GATEWAY_FRAMES_IN: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("gateway_frames_in", "Request frames received by the order gateway")
        .expect("gateway_frames_in");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static GATEWAY_FRAMES_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("gateway_frames_dropped", "Request frames dropped by the order gateway"),
        &["reason"],
    )
    .expect("gateway_frames_dropped");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static GATEWAY_RESPONSES_OUT: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("gateway_responses_out", "Response frames sent to clients")
        .expect("gateway_responses_out");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static ENGINE_REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("engine_requests", "Client requests processed by the matching engine")
        .expect("engine_requests");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static UPDATES_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "md_updates_published",
        "Incremental market updates published to the multicast group",
    )
    .expect("md_updates_published");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static BYTES_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("md_bytes_published", "Incremental market data bytes sent")
        .expect("md_bytes_published");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static SNAPSHOTS_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("md_snapshots_published", "Full snapshots published")
        .expect("md_snapshots_published");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static CONSUMER_PACKETS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("consumer_packets", "Datagrams received by the market data consumer"),
        &["stream"],
    )
    .expect("consumer_packets");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static CONSUMER_GAPS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "consumer_gaps",
        "Incremental sequence gaps that pushed the consumer into recovery",
    )
    .expect("consumer_gaps");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static CONSUMER_RECOVERIES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("consumer_recoveries", "Snapshot recoveries completed")
        .expect("consumer_recoveries");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static CONSUMER_IN_RECOVERY: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("consumer_in_recovery", "1 while the consumer is in recovery")
        .expect("consumer_in_recovery");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static QUEUE_LEN: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("queue_len", "Current length of internal SPSC queues"),
        &["queue"],
    )
    .expect("queue_len");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub fn inc_gateway_frames_in() {
    GATEWAY_FRAMES_IN.inc();
}
pub fn inc_gateway_dropped(reason: &str) {
    GATEWAY_FRAMES_DROPPED.with_label_values(&[reason]).inc();
}
pub fn inc_gateway_responses_out() {
    GATEWAY_RESPONSES_OUT.inc();
}
pub fn inc_engine_requests() {
    ENGINE_REQUESTS.inc();
}
pub fn inc_update_published(bytes: usize) {
    UPDATES_PUBLISHED.inc();
    BYTES_PUBLISHED.inc_by(bytes as u64);
}
pub fn inc_snapshot_published() {
    SNAPSHOTS_PUBLISHED.inc();
}
pub fn inc_consumer_packet(stream: &str) {
    CONSUMER_PACKETS.with_label_values(&[stream]).inc();
}
pub fn inc_consumer_gap() {
    CONSUMER_GAPS.inc();
}
pub fn inc_consumer_recovery() {
    CONSUMER_RECOVERIES.inc();
}
pub fn set_consumer_in_recovery(v: bool) {
    CONSUMER_IN_RECOVERY.set(if v { 1 } else { 0 });
}
pub fn set_queue_len(queue: &'static str, len: usize) {
    QUEUE_LEN.with_label_values(&[queue]).set(len as i64);
}

/// Serve the registry over HTTP (`/metrics`, `/healthz`). Runs until the
/// process exits; binaries spawn it once when a metrics bind is
/// configured.
pub fn spawn_http<A: ToSocketAddrs + Send + 'static>(addr: A) -> thread::JoinHandle<()> {
    let addr_string = addr
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "0.0.0.0:9100".to_string());

    thread::spawn(move || {
        let server = tiny_http::Server::http(&addr_string).expect("start metrics http");
        log::info!("prometheus metrics listening on http://{addr_string}/metrics");
        let encoder = TextEncoder::new();
        loop {
            if let Ok(req) = server.recv() {
                match req.url() {
                    "/metrics" => {
                        let metric_families = REGISTRY.gather();
                        let mut buf = Vec::with_capacity(16 * 1024);
                        encoder.encode(&metric_families, &mut buf).ok();
                        let resp = tiny_http::Response::from_data(buf)
                            .with_status_code(200)
                            .with_header(
                                tiny_http::Header::from_bytes(
                                    &b"Content-Type"[..],
                                    &b"text/plain; version=0.0.4"[..],
                                )
                                .unwrap(),
                            );
                        let _ = req.respond(resp);
                    }
                    "/live" | "/healthz" => {
                        let _ = req
                            .respond(tiny_http::Response::from_string("OK").with_status_code(200));
                    }
                    _ => {
                        let _ = req.respond(tiny_http::Response::empty(404));
                    }
                }
            }
        }
    })
}
