// src/config.rs
use serde::Deserialize;
use std::{
    fs,
    net::{Ipv4Addr, SocketAddrV4},
    path::Path,
};

/// Application configuration for both binaries. One TOML file describes a
/// deployment; `exchange` reads the server-side sections and `trader`
/// the client-side ones. Loading happens once at process start.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: General,
    pub gateway: Gateway,
    pub feed: Feed,
    #[serde(default)]
    pub queues: Queues,
    #[serde(default)]
    pub cpu: Cpu,
    pub metrics: Option<Metrics>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    #[serde(default)]
    pub json_logs: bool, // structured JSON logs to stdout
    #[serde(default)]
    pub mlock_all: bool, // mlockall current+future (Linux; best-effort)
    #[serde(default = "default_spin_loops")]
    pub spin_loops_per_yield: u32,
}

impl Default for General {
    fn default() -> Self {
        Self {
            json_logs: false,
            mlock_all: false,
            spin_loops_per_yield: default_spin_loops(),
        }
    }
}

fn default_spin_loops() -> u32 {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct Gateway {
    /// Exchange side: interface:port the order gateway listens on.
    pub bind: SocketAddrV4,
    /// Client side: exchange endpoint to connect to.
    pub connect: SocketAddrV4,
    /// Client side: participant id this trader signs requests with.
    #[serde(default)]
    pub client_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Feed {
    /// Local interface IPv4 the multicast sockets attach to.
    pub iface_addr: Ipv4Addr,
    pub incremental: FeedChannel,
    pub snapshot: FeedChannel,
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer_bytes: usize,
    /// Seconds between full snapshots (60 in production, 1 in tests).
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedChannel {
    pub group: Ipv4Addr, // e.g. 239.50.10.1
    pub port: u16,
}

fn default_recv_buffer() -> usize {
    8 << 20
}

fn default_snapshot_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct Queues {
    #[serde(default = "default_client_updates")]
    pub client_updates: usize,
    #[serde(default = "default_market_updates")]
    pub market_updates: usize,
}

impl Default for Queues {
    fn default() -> Self {
        Self {
            client_updates: default_client_updates(),
            market_updates: default_market_updates(),
        }
    }
}

fn default_client_updates() -> usize {
    crate::types::limits::MAX_CLIENT_UPDATES
}

fn default_market_updates() -> usize {
    crate::types::limits::MAX_MARKET_UPDATES
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cpu {
    pub engine_core: Option<usize>,
    pub gateway_core: Option<usize>,
    pub publisher_core: Option<usize>,
    pub synthesizer_core: Option<usize>,
    pub consumer_core: Option<usize>,
    #[serde(default)]
    pub rt_priority: Option<i32>, // SCHED_FIFO priority if set (Linux)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metrics {
    /// Bind address for the Prometheus exporter (e.g. "0.0.0.0:9100").
    pub bind: String,
}

impl AppConfig {
    pub fn from_file(p: &Path) -> anyhow::Result<Self> {
        let s = fs::read_to_string(p)?;
        let cfg: AppConfig = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.feed.incremental.group.is_multicast() || !self.feed.snapshot.group.is_multicast() {
            anyhow::bail!("feed.incremental.group and feed.snapshot.group must be multicast IPv4 addresses");
        }
        if self.feed.incremental.port == 0 || self.feed.snapshot.port == 0 {
            anyhow::bail!("feed ports must be non-zero");
        }
        if (self.feed.incremental.group, self.feed.incremental.port)
            == (self.feed.snapshot.group, self.feed.snapshot.port)
        {
            anyhow::bail!("incremental and snapshot channels must not share group:port");
        }
        if self.feed.snapshot_interval_secs == 0 {
            anyhow::bail!("feed.snapshot_interval_secs must be > 0");
        }
        if self.queues.client_updates == 0 || self.queues.market_updates == 0 {
            anyhow::bail!("queue capacities must be > 0");
        }
        Ok(())
    }
}
