// src/gateway_client.rs
//! Client-side order gateway: one TCP connection to the exchange with a
//! sequence counter per direction. Requests from the trading side go out
//! framed with the next tx sequence; inbound responses are validated
//! against the expected rx sequence before reaching the trading queues.

use std::io::{Read, Write};
use std::net::{SocketAddrV4, TcpStream};
use std::sync::Arc;
use std::thread;

use bytes::{Buf, BytesMut};
use log::{info, warn};

use crate::messages::{ClientRequest, ClientResponse, SeqClientRequest, SeqClientResponse};
use crate::net;
use crate::spsc::SpscQueue;
use crate::types::ClientId;
use crate::util::{pin_to_core_if_set, spin_wait, RunFlag};

const RX_CHUNK: usize = 4096;

struct ClientCore {
    client_id: ClientId,
    stream: TcpStream,
    rx: BytesMut,
    tx: BytesMut,
    rx_requests: Arc<SpscQueue<ClientRequest>>,
    tx_responses: Arc<SpscQueue<ClientResponse>>,
    /// Next sequence number for outgoing requests.
    n_seq_next_request: u64,
    /// Next sequence number expected on incoming responses.
    n_seq_next_expected: u64,
}

impl ClientCore {
    fn stage_requests(&mut self) -> bool {
        let mut moved = false;
        let mut buf = [0u8; SeqClientRequest::WIRE_SIZE];
        while let Some(request) = self.rx_requests.pop() {
            SeqClientRequest {
                n_seq: self.n_seq_next_request,
                request,
            }
            .encode(&mut buf);
            self.tx.extend_from_slice(&buf);
            self.n_seq_next_request += 1;
            moved = true;
        }
        moved
    }

    fn flush(&mut self) {
        while !self.tx.is_empty() {
            match self.stream.write(&self.tx) {
                Ok(0) => {
                    warn!("<GatewayClient> exchange closed the connection");
                    break;
                }
                Ok(n) => self.tx.advance(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("<GatewayClient> write failed: {e}");
                    break;
                }
            }
        }
    }

    fn rx_responses(&mut self) -> bool {
        let mut moved = false;
        let mut scratch = [0u8; RX_CHUNK];
        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => {
                    warn!("<GatewayClient> exchange closed the connection");
                    break;
                }
                Ok(n) => {
                    self.rx.extend_from_slice(&scratch[..n]);
                    moved = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("<GatewayClient> read failed: {e}");
                    break;
                }
            }
        }
        while self.rx.len() >= SeqClientResponse::WIRE_SIZE {
            let frame = SeqClientResponse::decode(&self.rx[..SeqClientResponse::WIRE_SIZE]);
            self.rx.advance(SeqClientResponse::WIRE_SIZE);
            let Some(frame) = frame else {
                warn!("<GatewayClient> undecodable response frame");
                continue;
            };
            if frame.response.client_id != self.client_id {
                warn!(
                    "<GatewayClient> response for wrong client: expected {}, got {}",
                    self.client_id, frame.response.client_id
                );
                continue;
            }
            if frame.n_seq != self.n_seq_next_expected {
                warn!(
                    "<GatewayClient> response sequence error: expected {}, got {}",
                    self.n_seq_next_expected, frame.n_seq
                );
                continue;
            }
            self.n_seq_next_expected += 1;
            if self.tx_responses.push(frame.response).is_err() {
                panic!("<GatewayClient> response queue overflow");
            }
        }
        moved
    }

    fn poll_once(&mut self) -> bool {
        let mut moved = self.stage_requests();
        self.flush();
        moved |= self.rx_responses();
        moved
    }
}

pub struct OrderGatewayClient {
    core: Option<ClientCore>,
    run: Arc<RunFlag>,
    worker: Option<thread::JoinHandle<()>>,
    core_index: Option<usize>,
}

impl OrderGatewayClient {
    /// Connect to the exchange order gateway. `rx_requests` carries
    /// requests from the trading side; validated responses are pushed to
    /// `tx_responses`.
    pub fn new(
        client_id: ClientId,
        connect: SocketAddrV4,
        rx_requests: Arc<SpscQueue<ClientRequest>>,
        tx_responses: Arc<SpscQueue<ClientResponse>>,
    ) -> anyhow::Result<Self> {
        let stream = net::connect_tcp(connect)?;
        Ok(Self {
            core: Some(ClientCore {
                client_id,
                stream,
                rx: BytesMut::with_capacity(16 * 1024),
                tx: BytesMut::with_capacity(16 * 1024),
                rx_requests,
                tx_responses,
                n_seq_next_request: 1,
                n_seq_next_expected: 1,
            }),
            run: Arc::new(RunFlag::default()),
            worker: None,
            core_index: None,
        })
    }

    pub fn set_core(&mut self, core_index: Option<usize>) {
        self.core_index = core_index;
    }

    pub fn start(&mut self) {
        let mut core = self.core.take().expect("<GatewayClient> started twice");
        let run = self.run.clone();
        let pin = self.core_index;
        run.raise();
        let handle = thread::Builder::new()
            .name("order-gateway-client".into())
            .spawn(move || {
                pin_to_core_if_set(pin);
                info!("<GatewayClient> connected as client {}", core.client_id);
                while run.is_raised() {
                    if !core.poll_once() {
                        spin_wait(64);
                    }
                }
                // push out anything the trading side queued before the stop
                core.poll_once();
                info!("<GatewayClient> stopped");
            })
            .expect("<GatewayClient> failed to spawn worker");
        self.worker = Some(handle);
    }

    pub fn stop(&mut self) {
        self.run.lower();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OrderGatewayClient {
    fn drop(&mut self) {
        self.stop();
    }
}
