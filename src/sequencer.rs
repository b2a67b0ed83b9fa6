// src/sequencer.rs
//! FIFO re-sequencer for the order gateway.
//!
//! TCP multiplexing across many client sockets can reorder requests
//! within one poll batch relative to their arrival times. The gateway
//! stamps each request at receive time and hands it here; once per poll
//! cycle the batch is sorted by that timestamp and published to the
//! matching engine in true first-in order.

use std::sync::Arc;

use log::debug;

use crate::messages::ClientRequest;
use crate::spsc::SpscQueue;
use crate::types::limits::MAX_PENDING_ORDER_REQUESTS;

#[derive(Clone, Copy, Default)]
struct PendingRequest {
    t_rx: u64,
    request: ClientRequest,
}

pub struct FifoSequencer {
    pending: Vec<PendingRequest>,
    n_pending: usize,
    tx_requests: Arc<SpscQueue<ClientRequest>>,
}

impl FifoSequencer {
    pub fn new(tx_requests: Arc<SpscQueue<ClientRequest>>) -> Self {
        Self {
            pending: vec![PendingRequest::default(); MAX_PENDING_ORDER_REQUESTS],
            n_pending: 0,
            tx_requests,
        }
    }

    /// Buffer one request with its receive timestamp. More pending
    /// requests than one poll batch can hold is a sizing error.
    pub fn push(&mut self, request: ClientRequest, t_rx: u64) {
        if self.n_pending >= self.pending.len() {
            panic!("<FifoSequencer> too many pending requests");
        }
        self.pending[self.n_pending] = PendingRequest { t_rx, request };
        self.n_pending += 1;
    }

    /// Sort the pending batch by receive time and push each request into
    /// the engine queue. Called once after every gateway poll cycle.
    pub fn sequence_and_publish(&mut self) {
        if self.n_pending == 0 {
            return;
        }
        debug!("<FifoSequencer> publishing {} pending requests", self.n_pending);
        // Stable sort: equal timestamps keep their socket-poll order
        self.pending[..self.n_pending].sort_by_key(|p| p.t_rx);
        for i in 0..self.n_pending {
            if self.tx_requests.push(self.pending[i].request).is_err() {
                panic!("<FifoSequencer> client request queue overflow");
            }
        }
        self.n_pending = 0;
    }

    pub fn pending_len(&self) -> usize {
        self.n_pending
    }
}
