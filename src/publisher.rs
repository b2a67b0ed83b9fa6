// src/publisher.rs
//! Market data publisher: sequences the engine's outbound updates onto
//! the incremental multicast group and forks each framed update to the
//! snapshot synthesizer.

use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;

use log::{info, warn};

use crate::messages::{MarketUpdate, SeqMarketUpdate};
use crate::metrics;
use crate::spsc::SpscQueue;
use crate::util::{pin_to_core_if_set, spin_wait, RunFlag};

struct PublisherCore {
    rx_updates: Arc<SpscQueue<MarketUpdate>>,
    fork_tx: Arc<SpscQueue<SeqMarketUpdate>>,
    socket: UdpSocket,
    /// Next incremental sequence number; starts at 1 and never resets for
    /// the publisher's lifetime.
    n_seq_next: u64,
    spin_loops: u32,
}

impl PublisherCore {
    fn drain_once(&mut self) -> bool {
        let mut moved = false;
        let mut buf = [0u8; SeqMarketUpdate::WIRE_SIZE];
        while let Some(update) = self.rx_updates.pop() {
            let framed = SeqMarketUpdate {
                n_seq: self.n_seq_next,
                update,
            };
            framed.encode(&mut buf);
            self.send(&buf);
            // The synthesizer replica is built solely from this fork; it
            // falling behind is unrecoverable.
            if self.fork_tx.push(framed).is_err() {
                panic!("<Publisher> snapshot fork queue overflow at n_seq {}", framed.n_seq);
            }
            metrics::inc_update_published(buf.len());
            self.n_seq_next += 1;
            moved = true;
        }
        moved
    }

    fn send(&self, buf: &[u8]) {
        loop {
            match self.socket.send(buf) {
                Ok(_) => return,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::hint::spin_loop();
                }
                Err(e) => {
                    warn!("<Publisher> incremental send failed: {e}");
                    return;
                }
            }
        }
    }
}

pub struct MarketDataPublisher {
    core: Option<PublisherCore>,
    run: Arc<RunFlag>,
    worker: Option<thread::JoinHandle<()>>,
    core_index: Option<usize>,
}

impl MarketDataPublisher {
    /// `socket` must already be connected to the incremental group:port
    /// (see [`crate::net::build_mcast_tx_socket`]). `fork_tx` feeds the
    /// snapshot synthesizer.
    pub fn new(
        rx_updates: Arc<SpscQueue<MarketUpdate>>,
        fork_tx: Arc<SpscQueue<SeqMarketUpdate>>,
        socket: UdpSocket,
        spin_loops: u32,
    ) -> Self {
        Self {
            core: Some(PublisherCore {
                rx_updates,
                fork_tx,
                socket,
                n_seq_next: 1,
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
        let mut core = self.core.take().expect("<Publisher> started twice");
        let run = self.run.clone();
        let pin = self.core_index;
        run.raise();
        let handle = thread::Builder::new()
            .name("md-publisher".into())
            .spawn(move || {
                pin_to_core_if_set(pin);
                info!("<Publisher> publishing incremental market data");
                while run.is_raised() {
                    if !core.drain_once() {
                        spin_wait(core.spin_loops);
                    }
                }
                core.drain_once();
                info!("<Publisher> stopped at n_seq {}", core.n_seq_next);
            })
            .expect("<Publisher> failed to spawn worker");
        self.worker = Some(handle);
    }

    pub fn stop(&mut self) {
        self.run.lower();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MarketDataPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::UpdateKind;
    use crate::types::Side;
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    fn update(ticker: u32, price: i64) -> MarketUpdate {
        MarketUpdate {
            kind: UpdateKind::Add,
            order_id: 1,
            ticker_id: ticker,
            side: Side::Buy,
            price,
            qty: 10,
            priority: 1,
            }
    }

    /// Unicast socket pair stands in for the multicast group; the
    /// publisher only calls `send` on a connected socket either way.
    fn socket_pair() -> (UdpSocket, UdpSocket) {
        let rx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let tx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        tx.connect(rx.local_addr().unwrap()).unwrap();
        rx.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        (tx, rx)
    }

    #[test]
    fn publishes_strictly_sequenced_datagrams_and_forks() {
        let (tx_sock, rx_sock) = socket_pair();
        let updates = Arc::new(SpscQueue::new(16));
        let fork = Arc::new(SpscQueue::new(16));
        let mut publisher =
            MarketDataPublisher::new(updates.clone(), fork.clone(), tx_sock, 16);
        publisher.start();

        for i in 0..3 {
            updates.push(update(0, 100 + i)).unwrap();
        }

        let mut buf = [0u8; 128];
        for expect_seq in 1..=3u64 {
            let n = rx_sock.recv(&mut buf).unwrap();
            assert_eq!(n, SeqMarketUpdate::WIRE_SIZE);
            let frame = SeqMarketUpdate::decode(&buf[..n]).unwrap();
            assert_eq!(frame.n_seq, expect_seq);
            assert_eq!(frame.update.price, 100 + expect_seq as i64 - 1);
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while fork.len() < 3 && Instant::now() < deadline {
            std::thread::yield_now();
        }
        publisher.stop();

        let forked: Vec<_> = std::iter::from_fn(|| fork.pop()).collect();
        assert_eq!(forked.iter().map(|f| f.n_seq).collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
