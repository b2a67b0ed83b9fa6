// src/gateway_server.rs
//! Order gateway server: terminates client TCP connections, enforces
//! per-client sequencing both ways, and bridges the byte stream to the
//! matching engine's queues through the FIFO re-sequencer.

use std::io::{Read, Write};
use std::net::{SocketAddrV4, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use bytes::{Buf, BytesMut};
use log::{info, warn};

use crate::messages::{ClientResponse, SeqClientRequest, SeqClientResponse};
use crate::metrics;
use crate::net;
use crate::sequencer::FifoSequencer;
use crate::spsc::SpscQueue;
use crate::types::limits::MAX_N_CLIENTS;
use crate::util::{now_nanos, pin_to_core_if_set, spin_wait, RunFlag};

const RX_CHUNK: usize = 4096;

struct Connection {
    stream: TcpStream,
    rx: BytesMut,
    tx: BytesMut,
    open: bool,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            rx: BytesMut::with_capacity(16 * 1024),
            tx: BytesMut::with_capacity(16 * 1024),
            open: true,
        }
    }
}

struct ServerCore {
    listener: TcpListener,
    connections: Vec<Connection>,
    sequencer: FifoSequencer,
    rx_responses: Arc<SpscQueue<ClientResponse>>,
    /// client id -> connection slot the client is pinned to
    client_to_conn: Vec<Option<usize>>,
    /// client id -> next outgoing response sequence number
    tx_n_seq: Vec<u64>,
    /// client id -> next incoming request sequence number expected
    rx_n_seq: Vec<u64>,
}

impl ServerCore {
    fn accept_new(&mut self) -> bool {
        let mut accepted = false;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true).ok();
                    stream.set_nodelay(true).ok();
                    info!("<Gateway> connection from {peer}");
                    self.connections.push(Connection::new(stream));
                    accepted = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("<Gateway> accept failed: {e}");
                    break;
                }
            }
        }
        accepted
    }

    /// Read every open connection and push whole request frames through
    /// the sequence checks into the re-sequencer.
    fn rx_all(&mut self) -> bool {
        let mut moved = false;
        let mut scratch = [0u8; RX_CHUNK];
        for conn_idx in 0..self.connections.len() {
            let conn = &mut self.connections[conn_idx];
            if !conn.open {
                continue;
            }
            loop {
                match conn.stream.read(&mut scratch) {
                    Ok(0) => {
                        conn.open = false;
                        break;
                    }
                    Ok(n) => {
                        conn.rx.extend_from_slice(&scratch[..n]);
                        moved = true;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("<Gateway> read failed, dropping connection: {e}");
                        conn.open = false;
                        break;
                    }
                }
            }
            let t_rx = now_nanos();
            self.consume_frames(conn_idx, t_rx);
            if !self.connections[conn_idx].open {
                self.release_pins(conn_idx);
            }
        }
        moved
    }

    fn consume_frames(&mut self, conn_idx: usize, t_rx: u64) {
        loop {
            let frame = {
                let conn = &mut self.connections[conn_idx];
                if conn.rx.len() < SeqClientRequest::WIRE_SIZE {
                    break;
                }
                let decoded = SeqClientRequest::decode(&conn.rx[..SeqClientRequest::WIRE_SIZE]);
                conn.rx.advance(SeqClientRequest::WIRE_SIZE);
                decoded
            };
            metrics::inc_gateway_frames_in();
            let Some(frame) = frame else {
                warn!("<Gateway> undecodable request frame on connection {conn_idx}");
                metrics::inc_gateway_dropped("decode");
                continue;
            };
            let cid = frame.request.client_id;
            if cid as usize >= MAX_N_CLIENTS {
                warn!("<Gateway> request with out-of-range client id {cid}");
                metrics::inc_gateway_dropped("client_id");
                continue;
            }

            // first frame from a client pins it to this socket
            match self.client_to_conn[cid as usize] {
                None => self.client_to_conn[cid as usize] = Some(conn_idx),
                Some(pinned) if pinned != conn_idx => {
                    // todo: send a rejection instead of silently dropping
                    warn!(
                        "<Gateway> client {cid} sent on connection {conn_idx} but is pinned to {pinned}"
                    );
                    metrics::inc_gateway_dropped("socket_mismatch");
                    continue;
                }
                Some(_) => {}
            }

            let expected = self.rx_n_seq[cid as usize];
            if frame.n_seq != expected {
                // todo: send a rejection instead of silently dropping
                warn!(
                    "<Gateway> client {cid} sequence error: expected {expected}, received {}",
                    frame.n_seq
                );
                metrics::inc_gateway_dropped("sequence");
                continue;
            }
            self.rx_n_seq[cid as usize] += 1;
            self.sequencer.push(frame.request, t_rx);
        }
    }

    /// Drain engine responses onto their clients' pinned connections.
    fn tx_responses(&mut self) -> bool {
        let mut moved = false;
        let mut buf = [0u8; SeqClientResponse::WIRE_SIZE];
        while let Some(response) = self.rx_responses.pop() {
            moved = true;
            let cid = response.client_id;
            if cid as usize >= MAX_N_CLIENTS {
                warn!("<Gateway> response for out-of-range client id {cid}");
                continue;
            }
            let Some(conn_idx) =
                self.client_to_conn[cid as usize].filter(|i| self.connections[*i].open)
            else {
                warn!("<Gateway> response for client {cid} with no live connection: {response}");
                continue;
            };
            let n_seq = self.tx_n_seq[cid as usize];
            self.tx_n_seq[cid as usize] += 1;
            SeqClientResponse { n_seq, response }.encode(&mut buf);
            self.connections[conn_idx].tx.extend_from_slice(&buf);
            metrics::inc_gateway_responses_out();
        }
        moved
    }

    fn flush_all(&mut self) {
        for conn_idx in 0..self.connections.len() {
            let conn = &mut self.connections[conn_idx];
            if !conn.open || conn.tx.is_empty() {
                continue;
            }
            loop {
                if conn.tx.is_empty() {
                    break;
                }
                match conn.stream.write(&conn.tx) {
                    Ok(0) => {
                        conn.open = false;
                        break;
                    }
                    Ok(n) => conn.tx.advance(n),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("<Gateway> write failed, dropping connection: {e}");
                        conn.open = false;
                        break;
                    }
                }
            }
            if !self.connections[conn_idx].open {
                self.release_pins(conn_idx);
            }
        }
    }

    fn release_pins(&mut self, conn_idx: usize) {
        for pin in self.client_to_conn.iter_mut() {
            if *pin == Some(conn_idx) {
                *pin = None;
            }
        }
    }

    /// One poll cycle: accept, rx, rx-done (sequence-and-publish), tx.
    fn poll_cycle(&mut self) -> bool {
        let mut moved = self.accept_new();
        moved |= self.rx_all();
        self.sequencer.sequence_and_publish();
        moved |= self.tx_responses();
        self.flush_all();
        moved
    }
}

pub struct OrderGatewayServer {
    core: Option<ServerCore>,
    run: Arc<RunFlag>,
    worker: Option<thread::JoinHandle<()>>,
    core_index: Option<usize>,
    local_addr: SocketAddrV4,
}

impl OrderGatewayServer {
    /// Bind the gateway listener. Requests flow into `tx_requests` (via
    /// the re-sequencer); responses drain from `rx_responses`.
    pub fn new(
        bind: SocketAddrV4,
        tx_requests: Arc<SpscQueue<crate::messages::ClientRequest>>,
        rx_responses: Arc<SpscQueue<ClientResponse>>,
    ) -> anyhow::Result<Self> {
        let listener = net::build_tcp_listener(bind)?;
        let local_addr = match listener.local_addr()? {
            std::net::SocketAddr::V4(a) => a,
            other => anyhow::bail!("unexpected listener address family: {other}"),
        };
        Ok(Self {
            core: Some(ServerCore {
                listener,
                connections: Vec::new(),
                sequencer: FifoSequencer::new(tx_requests),
                rx_responses,
                client_to_conn: vec![None; MAX_N_CLIENTS],
                tx_n_seq: vec![1; MAX_N_CLIENTS],
                rx_n_seq: vec![1; MAX_N_CLIENTS],
            }),
            run: Arc::new(RunFlag::default()),
            worker: None,
            core_index: None,
            local_addr,
        })
    }

    /// Actual bound address (useful when configured with port 0).
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub fn set_core(&mut self, core_index: Option<usize>) {
        self.core_index = core_index;
    }

    pub fn start(&mut self) {
        let mut core = self.core.take().expect("<Gateway> started twice");
        let run = self.run.clone();
        let pin = self.core_index;
        run.raise();
        let handle = thread::Builder::new()
            .name("order-gateway".into())
            .spawn(move || {
                pin_to_core_if_set(pin);
                info!("<Gateway> accepting order connections");
                while run.is_raised() {
                    if !core.poll_cycle() {
                        spin_wait(64);
                    }
                }
                // flush any responses produced before the stop
                core.poll_cycle();
                info!("<Gateway> stopped");
            })
            .expect("<Gateway> failed to spawn worker");
        self.worker = Some(handle);
    }

    pub fn stop(&mut self) {
        self.run.lower();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OrderGatewayServer {
    fn drop(&mut self) {
        self.stop();
    }
}
