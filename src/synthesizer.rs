// src/synthesizer.rs
//! Snapshot synthesizer: rebuilds the live-order picture from the
//! publisher's forked incremental stream and periodically multicasts a
//! full snapshot for late joiners and recovering consumers.

use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::messages::{MarketUpdate, SeqMarketUpdate, UpdateKind};
use crate::metrics;
use crate::spsc::SpscQueue;
use crate::types::*;
use crate::util::{now_nanos, pin_to_core_if_set, RunFlag};

/// Book replica keyed by market order id, plus the last incremental
/// sequence number observed — the anchor embedded in `SNAPSHOT_END`.
///
/// The replica trusts the publisher's fork completely: a duplicate ADD,
/// a MODIFY/CANCEL of an unknown order, or a non-contiguous sequence
/// number means the exchange's own data path is corrupt, and the process
/// aborts rather than publish a wrong snapshot.
pub struct SnapshotState {
    tickers: Vec<BTreeMap<OrderId, MarketUpdate>>,
    n_seq_last: u64,
}

impl SnapshotState {
    pub fn new(n_tickers: usize) -> Self {
        Self {
            tickers: (0..n_tickers).map(|_| BTreeMap::new()).collect(),
            n_seq_last: 0,
        }
    }

    /// Fold one forked incremental update into the replica.
    pub fn apply(&mut self, frame: &SeqMarketUpdate) {
        let update = frame.update;
        if frame.n_seq != self.n_seq_last + 1 {
            panic!(
                "<Synthesizer> expected n_seq {} from publisher fork, got {}",
                self.n_seq_last + 1,
                frame.n_seq
            );
        }
        let ticker = update.ticker_id as usize;
        match update.kind {
            UpdateKind::Add => {
                let orders = self.ticker_mut(ticker, &update);
                if orders.contains_key(&update.order_id) {
                    panic!("<Synthesizer> duplicate ADD for update: {update}");
                }
                orders.insert(update.order_id, update);
            }
            UpdateKind::Modify => {
                let orders = self.ticker_mut(ticker, &update);
                let order = orders
                    .get_mut(&update.order_id)
                    .unwrap_or_else(|| panic!("<Synthesizer> MODIFY of unknown order: {update}"));
                assert_eq!(order.side, update.side, "<Synthesizer> MODIFY changed side: {update}");
                order.qty = update.qty;
                order.price = update.price;
            }
            UpdateKind::Cancel => {
                let orders = self.ticker_mut(ticker, &update);
                let order = orders
                    .remove(&update.order_id)
                    .unwrap_or_else(|| panic!("<Synthesizer> CANCEL of unknown order: {update}"));
                assert_eq!(order.side, update.side, "<Synthesizer> CANCEL changed side: {update}");
            }
            UpdateKind::Trade => {} // trades never alter resting state
            UpdateKind::Clear => {
                self.ticker_mut(ticker, &update).clear();
            }
            UpdateKind::Invalid | UpdateKind::SnapshotStart | UpdateKind::SnapshotEnd => {
                panic!("<Synthesizer> unexpected update kind on fork: {update}")
            }
        }
        self.n_seq_last = frame.n_seq;
    }

    fn ticker_mut(
        &mut self,
        ticker: usize,
        update: &MarketUpdate,
    ) -> &mut BTreeMap<OrderId, MarketUpdate> {
        if ticker >= self.tickers.len() {
            panic!("<Synthesizer> update for unknown ticker: {update}");
        }
        &mut self.tickers[ticker]
    }

    /// Frame a complete snapshot. Snapshot sequence numbers restart at 0:
    /// `SNAPSHOT_START`, then per ticker ascending a `CLEAR` followed by
    /// an `ADD` per live order (order-id ascending), then `SNAPSHOT_END`.
    /// Both sentinels carry the incremental anchor in `order_id`.
    pub fn build_snapshot(&self) -> Vec<SeqMarketUpdate> {
        let mut frames = Vec::with_capacity(2 + self.tickers.len() + self.live_orders());
        let mut n_seq = 0u64;
        let mut push = |frames: &mut Vec<SeqMarketUpdate>, update: MarketUpdate| {
            frames.push(SeqMarketUpdate { n_seq, update });
            n_seq += 1;
        };

        push(
            &mut frames,
            MarketUpdate::sentinel(UpdateKind::SnapshotStart, self.n_seq_last),
        );
        for (ticker, orders) in self.tickers.iter().enumerate() {
            push(
                &mut frames,
                MarketUpdate {
                    kind: UpdateKind::Clear,
                    ticker_id: ticker as TickerId,
                    ..Default::default()
                },
            );
            for order in orders.values() {
                push(&mut frames, *order);
            }
        }
        push(
            &mut frames,
            MarketUpdate::sentinel(UpdateKind::SnapshotEnd, self.n_seq_last),
        );
        frames
    }

    pub fn live_orders(&self) -> usize {
        self.tickers.iter().map(|t| t.len()).sum()
    }

    pub fn n_seq_last(&self) -> u64 {
        self.n_seq_last
    }
}

struct SynthesizerCore {
    rx_updates: Arc<SpscQueue<SeqMarketUpdate>>,
    socket: UdpSocket,
    state: SnapshotState,
    interval_nanos: u64,
    t_last_snapshot: u64,
}

impl SynthesizerCore {
    fn drain_once(&mut self) -> bool {
        let mut moved = false;
        while let Some(frame) = self.rx_updates.pop() {
            self.state.apply(&frame);
            moved = true;
        }
        moved
    }

    fn publish_snapshot(&mut self) {
        let frames = self.state.build_snapshot();
        let mut buf = [0u8; SeqMarketUpdate::WIRE_SIZE];
        for frame in &frames {
            frame.encode(&mut buf);
            loop {
                match self.socket.send(&buf) {
                    Ok(_) => break,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::hint::spin_loop();
                    }
                    Err(e) => {
                        warn!("<Synthesizer> snapshot send failed: {e}");
                        break;
                    }
                }
            }
        }
        metrics::inc_snapshot_published();
        info!(
            "<Synthesizer> snapshot published: {} records, anchor {}",
            frames.len(),
            self.state.n_seq_last()
        );
    }
}

pub struct SnapshotSynthesizer {
    core: Option<SynthesizerCore>,
    run: Arc<RunFlag>,
    worker: Option<thread::JoinHandle<()>>,
    core_index: Option<usize>,
}

impl SnapshotSynthesizer {
    /// `socket` must be connected to the snapshot group:port.
    pub fn new(
        rx_updates: Arc<SpscQueue<SeqMarketUpdate>>,
        socket: UdpSocket,
        n_tickers: usize,
        interval: Duration,
    ) -> Self {
        Self {
            core: Some(SynthesizerCore {
                rx_updates,
                socket,
                state: SnapshotState::new(n_tickers),
                interval_nanos: interval.as_nanos() as u64,
                t_last_snapshot: 0,
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
        let mut core = self.core.take().expect("<Synthesizer> started twice");
        let run = self.run.clone();
        let pin = self.core_index;
        run.raise();
        let handle = thread::Builder::new()
            .name("snapshot-synthesizer".into())
            .spawn(move || {
                pin_to_core_if_set(pin);
                info!("<Synthesizer> running");
                core.t_last_snapshot = now_nanos();
                while run.is_raised() {
                    let moved = core.drain_once();
                    if now_nanos().saturating_sub(core.t_last_snapshot) > core.interval_nanos {
                        core.t_last_snapshot = now_nanos();
                        core.publish_snapshot();
                    }
                    if !moved {
                        // interval check only needs millisecond resolution
                        thread::sleep(Duration::from_millis(1));
                    }
                }
                info!("<Synthesizer> stopped");
            })
            .expect("<Synthesizer> failed to spawn worker");
        self.worker = Some(handle);
    }

    pub fn stop(&mut self) {
        self.run.lower();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SnapshotSynthesizer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn add(n_seq: u64, ticker: u32, oid: u64, price: i64, qty: u32) -> SeqMarketUpdate {
        SeqMarketUpdate {
            n_seq,
            update: MarketUpdate {
                kind: UpdateKind::Add,
                order_id: oid,
                ticker_id: ticker,
                side: Side::Sell,
                price,
                qty,
                priority: 1,
            },
        }
    }

    #[test]
    fn empty_state_snapshot_is_start_clears_end() {
        let state = SnapshotState::new(8);
        let frames = state.build_snapshot();
        assert_eq!(frames.len(), 10);
        assert_eq!(frames[0].n_seq, 0);
        assert_eq!(frames[0].update.kind, UpdateKind::SnapshotStart);
        for t in 0..8u64 {
            assert_eq!(frames[1 + t as usize].n_seq, 1 + t);
            assert_eq!(frames[1 + t as usize].update.kind, UpdateKind::Clear);
            assert_eq!(frames[1 + t as usize].update.ticker_id, t as u32);
        }
        assert_eq!(frames[9].n_seq, 9);
        assert_eq!(frames[9].update.kind, UpdateKind::SnapshotEnd);
    }

    #[test]
    fn snapshot_carries_anchor_and_live_orders() {
        let mut state = SnapshotState::new(2);
        state.apply(&add(1, 0, 10, 100, 5));
        state.apply(&add(2, 1, 11, 200, 7));
        state.apply(&SeqMarketUpdate {
            n_seq: 3,
            update: MarketUpdate {
                kind: UpdateKind::Modify,
                order_id: 10,
                ticker_id: 0,
                side: Side::Sell,
                price: 101,
                qty: 4,
                priority: 1,
            },
        });
        assert_eq!(state.n_seq_last(), 3);
        assert_eq!(state.live_orders(), 2);

        let frames = state.build_snapshot();
        // START, CLEAR(0), ADD(10), CLEAR(1), ADD(11), END
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0].update.order_id, 3, "anchor in SNAPSHOT_START");
        assert_eq!(frames[2].update.kind, UpdateKind::Add);
        assert_eq!(frames[2].update.order_id, 10);
        assert_eq!(frames[2].update.price, 101, "MODIFY folded into replica");
        assert_eq!(frames[2].update.qty, 4);
        assert_eq!(frames[5].update.kind, UpdateKind::SnapshotEnd);
        assert_eq!(frames[5].update.order_id, 3, "anchor in SNAPSHOT_END");
        // snapshot sequencing restarts at 0 and is contiguous
        for (i, f) in frames.iter().enumerate() {
            assert_eq!(f.n_seq, i as u64);
        }
    }

    #[test]
    fn cancel_removes_and_trade_is_ignored() {
        let mut state = SnapshotState::new(1);
        state.apply(&add(1, 0, 5, 100, 9));
        state.apply(&SeqMarketUpdate {
            n_seq: 2,
            update: MarketUpdate {
                kind: UpdateKind::Trade,
                order_id: ORDER_ID_INVALID,
                ticker_id: 0,
                side: Side::Buy,
                price: 100,
                qty: 3,
                priority: PRIORITY_INVALID,
            },
        });
        assert_eq!(state.live_orders(), 1);
        state.apply(&SeqMarketUpdate {
            n_seq: 3,
            update: MarketUpdate {
                kind: UpdateKind::Cancel,
                order_id: 5,
                ticker_id: 0,
                side: Side::Sell,
                price: 100,
                qty: 0,
                priority: 1,
            },
        });
        assert_eq!(state.live_orders(), 0);
    }

    #[test]
    #[should_panic(expected = "duplicate ADD")]
    fn duplicate_add_aborts() {
        let mut state = SnapshotState::new(1);
        state.apply(&add(1, 0, 5, 100, 9));
        state.apply(&add(2, 0, 5, 100, 9));
    }

    #[test]
    #[should_panic(expected = "MODIFY of unknown order")]
    fn modify_of_unknown_order_aborts() {
        let mut state = SnapshotState::new(1);
        state.apply(&SeqMarketUpdate {
            n_seq: 1,
            update: MarketUpdate {
                kind: UpdateKind::Modify,
                order_id: 5,
                ticker_id: 0,
                side: Side::Sell,
                price: 100,
                qty: 1,
                priority: 1,
            },
        });
    }

    #[test]
    #[should_panic(expected = "expected n_seq")]
    fn sequence_gap_on_fork_aborts() {
        let mut state = SnapshotState::new(1);
        state.apply(&add(1, 0, 5, 100, 9));
        state.apply(&add(3, 0, 6, 100, 9));
    }
}
