// src/engine.rs
//! Matching engine worker: owns one order book per ticker and drives them
//! from the inbound client-request queue on a dedicated spinning thread.

use std::sync::Arc;
use std::thread;

use log::info;

use crate::messages::{ClientRequest, ClientResponse, MarketUpdate, RequestKind};
use crate::metrics;
use crate::orderbook::OrderBook;
use crate::spsc::SpscQueue;
use crate::util::{pin_to_core_if_set, spin_wait, RunFlag};

struct EngineCore {
    books: Vec<OrderBook>,
    rx_requests: Arc<SpscQueue<ClientRequest>>,
}

impl EngineCore {
    fn dispatch(&mut self, request: &ClientRequest) {
        let ticker = request.ticker_id as usize;
        if ticker >= self.books.len() {
            panic!("<Engine> request for unknown ticker: {request}");
        }
        match request.kind {
            RequestKind::New | RequestKind::Cancel => self.books[ticker].process(request),
            RequestKind::Invalid => panic!("<Engine> invalid client request: {request}"),
        }
        metrics::inc_engine_requests();
    }

    fn drain(&mut self) -> bool {
        let mut moved = false;
        while let Some(request) = self.rx_requests.pop() {
            self.dispatch(&request);
            moved = true;
        }
        moved
    }
}

pub struct MatchingEngine {
    core: Option<EngineCore>,
    run: Arc<RunFlag>,
    worker: Option<thread::JoinHandle<()>>,
    core_index: Option<usize>,
}

impl MatchingEngine {
    /// Build books for `n_tickers` instruments. All books produce into the
    /// same pair of outbound queues; the single worker thread is the only
    /// producer so the SPSC contract holds.
    pub fn new(
        n_tickers: usize,
        order_capacity: usize,
        rx_requests: Arc<SpscQueue<ClientRequest>>,
        tx_responses: Arc<SpscQueue<ClientResponse>>,
        tx_updates: Arc<SpscQueue<MarketUpdate>>,
    ) -> Self {
        let books = (0..n_tickers)
            .map(|t| {
                OrderBook::new(
                    t as u32,
                    order_capacity,
                    tx_responses.clone(),
                    tx_updates.clone(),
                )
            })
            .collect();
        Self {
            core: Some(EngineCore { books, rx_requests }),
            run: Arc::new(RunFlag::default()),
            worker: None,
            core_index: None,
        }
    }

    pub fn set_core(&mut self, core_index: Option<usize>) {
        self.core_index = core_index;
    }

    /// Launch the worker. The loop is a tight non-blocking poll: the
    /// request queue is single-reader and its producer lives on another
    /// thread of the same process.
    pub fn start(&mut self) {
        let mut core = self.core.take().expect("<Engine> started twice");
        let run = self.run.clone();
        let pin = self.core_index;
        run.raise();
        let handle = thread::Builder::new()
            .name("matching-engine".into())
            .spawn(move || {
                pin_to_core_if_set(pin);
                info!("<Engine> accepting client order requests");
                while run.is_raised() {
                    if !core.drain() {
                        spin_wait(64);
                    }
                }
                // Best-effort drain of whatever arrived before the stop
                core.drain();
                info!("<Engine> stopped");
            })
            .expect("<Engine> failed to spawn worker");
        self.worker = Some(handle);
    }

    /// Lower the run flag and join. The worker drains its inbound queue
    /// before exiting.
    pub fn stop(&mut self) {
        self.run.lower();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.is_raised()
    }
}

impl Drop for MatchingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ResponseKind, UpdateKind};
    use crate::types::Side;
    use std::time::{Duration, Instant};

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() && Instant::now() < deadline {
            std::thread::yield_now();
        }
        assert!(cond(), "condition not reached before deadline");
    }

    #[test]
    fn engine_matches_across_queue_boundary() {
        let requests = Arc::new(SpscQueue::new(64));
        let responses = Arc::new(SpscQueue::new(64));
        let updates = Arc::new(SpscQueue::new(64));
        let mut engine = MatchingEngine::new(
            2,
            32,
            requests.clone(),
            responses.clone(),
            updates.clone(),
        );
        engine.start();

        let new = |client_id, order_id, side, price, qty| ClientRequest {
            kind: RequestKind::New,
            client_id,
            ticker_id: 1,
            order_id,
            side,
            price,
            qty,
        };
        requests.push(new(1, 1, Side::Sell, 100, 100)).unwrap();
        requests.push(new(2, 1, Side::Buy, 100, 40)).unwrap();

        // ACCEPTED + ACCEPTED + 2x FILLED
        wait_for(|| responses.len() >= 4);
        engine.stop();

        let rs: Vec<_> = std::iter::from_fn(|| responses.pop()).collect();
        assert_eq!(rs[0].kind, ResponseKind::Accepted);
        assert_eq!(rs[1].kind, ResponseKind::Accepted);
        assert_eq!(rs[2].kind, ResponseKind::Filled);
        assert_eq!(rs[2].client_id, 2);
        assert_eq!(rs[3].kind, ResponseKind::Filled);
        assert_eq!(rs[3].client_id, 1);
        assert_eq!(rs[3].qty_remain, 60);

        let us: Vec<_> = std::iter::from_fn(|| updates.pop()).collect();
        let kinds: Vec<_> = us.iter().map(|u| u.kind).collect();
        assert_eq!(
            kinds,
            vec![UpdateKind::Add, UpdateKind::Trade, UpdateKind::Modify]
        );
    }

    #[test]
    fn stop_drains_pending_requests() {
        let requests = Arc::new(SpscQueue::new(64));
        let responses = Arc::new(SpscQueue::new(64));
        let updates = Arc::new(SpscQueue::new(64));
        let mut engine =
            MatchingEngine::new(1, 32, requests.clone(), responses.clone(), updates);
        for i in 0..10u64 {
            requests
                .push(ClientRequest {
                    kind: RequestKind::New,
                    client_id: 1,
                    ticker_id: 0,
                    order_id: i,
                    side: Side::Buy,
                    price: 50 + i as i64,
                    qty: 1,
                })
                .unwrap();
        }
        engine.start();
        engine.stop();
        assert!(requests.is_empty(), "inbound queue drained on shutdown");
        assert_eq!(responses.len(), 10);
    }
}
