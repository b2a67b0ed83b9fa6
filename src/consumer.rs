// src/consumer.rs
//! Market data consumer: receives the incremental multicast stream,
//! detects sequence loss, and rebuilds state by splicing a full snapshot
//! with buffered incrementals.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::thread;

use log::{info, warn};

use crate::messages::{MarketUpdate, SeqMarketUpdate, UpdateKind};
use crate::metrics;
use crate::net;
use crate::spsc::SpscQueue;
use crate::util::{pin_to_core_if_set, spin_wait, RunFlag};

/// The recovery state machine, separated from socket plumbing so the
/// splice logic can be driven directly by tests.
pub struct RecoveryState {
    tx_updates: Arc<SpscQueue<MarketUpdate>>,
    /// Next expected incremental sequence number.
    n_seq_inc_next: u64,
    in_recovery: bool,
    queued_incremental: BTreeMap<u64, MarketUpdate>,
    queued_snapshot: BTreeMap<u64, MarketUpdate>,
}

impl RecoveryState {
    pub fn new(tx_updates: Arc<SpscQueue<MarketUpdate>>) -> Self {
        Self {
            tx_updates,
            n_seq_inc_next: 1,
            in_recovery: false,
            queued_incremental: BTreeMap::new(),
            queued_snapshot: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    pub fn next_expected(&self) -> u64 {
        self.n_seq_inc_next
    }

    /// One record from the incremental stream.
    pub fn on_incremental(&mut self, frame: &SeqMarketUpdate) {
        if !self.in_recovery && frame.n_seq == self.n_seq_inc_next {
            // steady state: forward and advance
            self.n_seq_inc_next += 1;
            self.forward(frame.update);
            return;
        }
        if !self.in_recovery {
            warn!(
                "<Consumer> lost incremental packets: expected n_seq {}, received {}",
                self.n_seq_inc_next, frame.n_seq
            );
            metrics::inc_consumer_gap();
            self.enter_recovery();
        }
        self.queued_incremental.insert(frame.n_seq, frame.update);
        self.sync_check();
    }

    /// One record from the snapshot stream; only meaningful in recovery.
    pub fn on_snapshot(&mut self, frame: &SeqMarketUpdate) {
        if !self.in_recovery {
            warn!("<Consumer> snapshot record received while not in recovery");
            return;
        }
        if self.queued_snapshot.contains_key(&frame.n_seq) {
            // a snapshot sequence number repeating means a new snapshot
            // started; collection restarts from it
            warn!(
                "<Consumer> snapshot restarted at n_seq {}; discarding partial snapshot",
                frame.n_seq
            );
            self.queued_snapshot.clear();
        }
        self.queued_snapshot.insert(frame.n_seq, frame.update);
        self.sync_check();
    }

    fn enter_recovery(&mut self) {
        self.queued_incremental.clear();
        self.queued_snapshot.clear();
        self.in_recovery = true;
        metrics::set_consumer_in_recovery(true);
    }

    /// Try to splice the buffered snapshot with buffered incrementals.
    /// Every early return leaves the machine waiting for more records.
    fn sync_check(&mut self) {
        if self.queued_snapshot.is_empty() {
            return;
        }

        // collection must begin with SNAPSHOT_START at n_seq 0
        let (first_seq, first) = self.queued_snapshot.iter().next().expect("non-empty");
        if *first_seq != 0 || first.kind != UpdateKind::SnapshotStart {
            warn!("<Consumer> waiting for SNAPSHOT_START; discarding snapshot buffer");
            self.queued_snapshot.clear();
            return;
        }

        // the snapshot itself must be gap-free
        let mut updates_to_process: Vec<MarketUpdate> = Vec::new();
        let mut n_seq_snapshot_next = 0u64;
        for (n_seq, update) in &self.queued_snapshot {
            if *n_seq != n_seq_snapshot_next {
                warn!(
                    "<Consumer> snapshot stream loss: expected n_seq {}, found {}",
                    n_seq_snapshot_next, n_seq
                );
                self.queued_snapshot.clear();
                return;
            }
            if update.kind != UpdateKind::SnapshotStart && update.kind != UpdateKind::SnapshotEnd {
                updates_to_process.push(*update);
            }
            n_seq_snapshot_next += 1;
        }

        // incomplete until SNAPSHOT_END shows up
        let last = self.queued_snapshot.values().next_back().expect("non-empty");
        if last.kind != UpdateKind::SnapshotEnd {
            return;
        }

        // the anchor splices the two streams: every incremental after it
        // happened strictly after the snapshot was constructed
        let anchor = last.order_id;
        let mut n_seq_next = anchor + 1;
        for (n_seq, update) in &self.queued_incremental {
            if *n_seq < n_seq_next {
                continue;
            }
            if *n_seq != n_seq_next {
                warn!(
                    "<Consumer> incremental stream still has a gap: expected n_seq {}, found {}",
                    n_seq_next, n_seq
                );
                return;
            }
            updates_to_process.push(*update);
            n_seq_next += 1;
        }

        info!(
            "<Consumer> snapshot recovery complete: {} snapshot records, {} incrementals, anchor {}",
            self.queued_snapshot.len().saturating_sub(2),
            n_seq_next - (anchor + 1),
            anchor
        );
        for update in updates_to_process {
            self.forward(update);
        }
        self.n_seq_inc_next = n_seq_next;
        self.queued_incremental.clear();
        self.queued_snapshot.clear();
        self.in_recovery = false;
        metrics::set_consumer_in_recovery(false);
        metrics::inc_consumer_recovery();
    }

    fn forward(&self, update: MarketUpdate) {
        if self.tx_updates.push(update).is_err() {
            panic!("<Consumer> outbound update queue overflow");
        }
    }
}

struct ConsumerCore {
    state: RecoveryState,
    socket_incremental: UdpSocket,
    snapshot_group: Ipv4Addr,
    snapshot_port: u16,
    iface_addr: Ipv4Addr,
    recv_buffer_bytes: usize,
    socket_snapshot: Option<UdpSocket>,
    spin_loops: u32,
}

impl ConsumerCore {
    fn drain_socket(socket: &UdpSocket, stream: &str, mut on_frame: impl FnMut(&SeqMarketUpdate)) -> bool {
        let mut moved = false;
        let mut buf = [0u8; 256];
        loop {
            match socket.recv(&mut buf) {
                Ok(n) => {
                    metrics::inc_consumer_packet(stream);
                    // each datagram carries exactly one framed record
                    match SeqMarketUpdate::decode(&buf[..n]) {
                        Some(frame) => on_frame(&frame),
                        None => warn!("<Consumer> undecodable {stream} datagram of {n} bytes"),
                    }
                    moved = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("<Consumer> {stream} recv failed: {e}");
                    break;
                }
            }
        }
        moved
    }

    fn poll_once(&mut self) -> bool {
        let mut moved = false;

        let state = &mut self.state;
        moved |= Self::drain_socket(&self.socket_incremental, "incremental", |frame| {
            state.on_incremental(frame)
        });

        // membership in the snapshot group tracks the recovery flag
        if self.state.in_recovery() && self.socket_snapshot.is_none() {
            match net::build_mcast_rx_socket(
                self.snapshot_group,
                self.snapshot_port,
                self.iface_addr,
                self.recv_buffer_bytes,
            ) {
                Ok(sock) => {
                    info!(
                        "<Consumer> joined snapshot stream {}:{}",
                        self.snapshot_group, self.snapshot_port
                    );
                    self.socket_snapshot = Some(sock);
                }
                Err(e) => panic!("<Consumer> snapshot stream join failed: {e:#}"),
            }
        }

        if let Some(sock) = &self.socket_snapshot {
            let state = &mut self.state;
            moved |= Self::drain_socket(sock, "snapshot", |frame| state.on_snapshot(frame));
        }

        if !self.state.in_recovery() {
            if let Some(sock) = self.socket_snapshot.take() {
                net::leave_mcast_group(&sock, self.snapshot_group, self.iface_addr);
                info!("<Consumer> left snapshot stream");
            }
        }
        moved
    }
}

pub struct MarketDataConsumer {
    core: Option<ConsumerCore>,
    run: Arc<RunFlag>,
    worker: Option<thread::JoinHandle<()>>,
    core_index: Option<usize>,
}

impl MarketDataConsumer {
    /// `socket_incremental` must already be joined to the incremental
    /// group; the snapshot group is joined on demand when recovery starts
    /// and left once it completes.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx_updates: Arc<SpscQueue<MarketUpdate>>,
        socket_incremental: UdpSocket,
        snapshot_group: Ipv4Addr,
        snapshot_port: u16,
        iface_addr: Ipv4Addr,
        recv_buffer_bytes: usize,
        spin_loops: u32,
    ) -> Self {
        Self {
            core: Some(ConsumerCore {
                state: RecoveryState::new(tx_updates),
                socket_incremental,
                snapshot_group,
                snapshot_port,
                iface_addr,
                recv_buffer_bytes,
                socket_snapshot: None,
                spin_loops,
            }),
            run: Arc::new(RunFlag::default()),
            worker: None,
            core_index: None,
        }
    }

    pub fn set_core(&mut self, core_index: Option<usize>) {
        self.core_index = core_index;
    }

    pub fn start(&mut self) {
        let mut core = self.core.take().expect("<Consumer> started twice");
        let run = self.run.clone();
        let pin = self.core_index;
        run.raise();
        let handle = thread::Builder::new()
            .name("md-consumer".into())
            .spawn(move || {
                pin_to_core_if_set(pin);
                info!("<Consumer> running");
                while run.is_raised() {
                    if !core.poll_once() {
                        spin_wait(core.spin_loops);
                    }
                }
                info!("<Consumer> stopped");
            })
            .expect("<Consumer> failed to spawn worker");
        self.worker = Some(handle);
    }

    pub fn stop(&mut self) {
        self.run.lower();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MarketDataConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}
