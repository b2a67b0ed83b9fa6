// src/messages.rs
//! Wire records exchanged between the gateway, matching engine, market
//! data publisher and clients.
//!
//! Every record has a fixed, tightly packed little-endian wire image with
//! no alignment padding; framing on both TCP and UDP is purely by record
//! size. The framed variants prepend a `u64` sequence number.

use std::fmt;

use crate::types::*;

/// Client request kinds accepted by the matching engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestKind {
    #[default]
    Invalid = 0,
    New = 1,
    Cancel = 2,
}

impl RequestKind {
    #[inline]
    const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RequestKind::Invalid),
            1 => Some(RequestKind::New),
            2 => Some(RequestKind::Cancel),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestKind::New => "NEW",
            RequestKind::Cancel => "CANCEL",
            RequestKind::Invalid => "INVALID",
        })
    }
}

/// Order request passed from the gateway to the matching engine on behalf
/// of a market participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientRequest {
    pub kind: RequestKind,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
}

impl Default for ClientRequest {
    fn default() -> Self {
        Self {
            kind: RequestKind::Invalid,
            client_id: CLIENT_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            order_id: ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
        }
    }
}

impl ClientRequest {
    pub const WIRE_SIZE: usize = 30;

    pub fn encode(&self, out: &mut [u8]) {
        out[0] = self.kind as u8;
        out[1..5].copy_from_slice(&self.client_id.to_le_bytes());
        out[5..9].copy_from_slice(&self.ticker_id.to_le_bytes());
        out[9..17].copy_from_slice(&self.order_id.to_le_bytes());
        out[17] = self.side.as_i8() as u8;
        out[18..26].copy_from_slice(&self.price.to_le_bytes());
        out[26..30].copy_from_slice(&self.qty.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            kind: RequestKind::from_u8(buf[0])?,
            client_id: u32::from_le_bytes(buf[1..5].try_into().unwrap()),
            ticker_id: u32::from_le_bytes(buf[5..9].try_into().unwrap()),
            order_id: u64::from_le_bytes(buf[9..17].try_into().unwrap()),
            side: Side::from_i8(buf[17] as i8)?,
            price: i64::from_le_bytes(buf[18..26].try_into().unwrap()),
            qty: u32::from_le_bytes(buf[26..30].try_into().unwrap()),
        })
    }
}

impl fmt::Display for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<ClientRequest> [type: {}, client: {}, ticker: {}, oid: {}, side: {}, qty: {}, price: {}]",
            self.kind,
            client_id_str(self.client_id),
            ticker_id_str(self.ticker_id),
            order_id_str(self.order_id),
            self.side,
            qty_str(self.qty),
            price_str(self.price),
        )
    }
}

/// Client response kinds emitted by the matching engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseKind {
    #[default]
    Invalid = 0,
    Accepted = 1,
    Cancelled = 2,
    Filled = 3,
    CancelRejected = 4,
}

impl ResponseKind {
    #[inline]
    const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ResponseKind::Invalid),
            1 => Some(ResponseKind::Accepted),
            2 => Some(ResponseKind::Cancelled),
            3 => Some(ResponseKind::Filled),
            4 => Some(ResponseKind::CancelRejected),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResponseKind::Accepted => "ACCEPTED",
            ResponseKind::Cancelled => "CANCELLED",
            ResponseKind::Filled => "FILLED",
            ResponseKind::CancelRejected => "CANCEL_REJECTED",
            ResponseKind::Invalid => "INVALID",
        })
    }
}

/// Response from the matching engine, forwarded to the owning client by
/// the order gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientResponse {
    pub kind: ResponseKind,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub client_order_id: OrderId,
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty_exec: Qty,
    pub qty_remain: Qty,
}

impl Default for ClientResponse {
    fn default() -> Self {
        Self {
            kind: ResponseKind::Invalid,
            client_id: CLIENT_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            client_order_id: ORDER_ID_INVALID,
            market_order_id: ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty_exec: QTY_INVALID,
            qty_remain: QTY_INVALID,
        }
    }
}

impl ClientResponse {
    pub const WIRE_SIZE: usize = 42;

    pub fn encode(&self, out: &mut [u8]) {
        out[0] = self.kind as u8;
        out[1..5].copy_from_slice(&self.client_id.to_le_bytes());
        out[5..9].copy_from_slice(&self.ticker_id.to_le_bytes());
        out[9..17].copy_from_slice(&self.client_order_id.to_le_bytes());
        out[17..25].copy_from_slice(&self.market_order_id.to_le_bytes());
        out[25] = self.side.as_i8() as u8;
        out[26..34].copy_from_slice(&self.price.to_le_bytes());
        out[34..38].copy_from_slice(&self.qty_exec.to_le_bytes());
        out[38..42].copy_from_slice(&self.qty_remain.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            kind: ResponseKind::from_u8(buf[0])?,
            client_id: u32::from_le_bytes(buf[1..5].try_into().unwrap()),
            ticker_id: u32::from_le_bytes(buf[5..9].try_into().unwrap()),
            client_order_id: u64::from_le_bytes(buf[9..17].try_into().unwrap()),
            market_order_id: u64::from_le_bytes(buf[17..25].try_into().unwrap()),
            side: Side::from_i8(buf[25] as i8)?,
            price: i64::from_le_bytes(buf[26..34].try_into().unwrap()),
            qty_exec: u32::from_le_bytes(buf[34..38].try_into().unwrap()),
            qty_remain: u32::from_le_bytes(buf[38..42].try_into().unwrap()),
        })
    }
}

impl fmt::Display for ClientResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<ClientResponse> [type: {}, client: {}, ticker: {}, oid_client: {}, oid_market: {}, \
             side: {}, qty_exec: {}, qty_remain: {}, price: {}]",
            self.kind,
            client_id_str(self.client_id),
            ticker_id_str(self.ticker_id),
            order_id_str(self.client_order_id),
            order_id_str(self.market_order_id),
            self.side,
            qty_str(self.qty_exec),
            qty_str(self.qty_remain),
            price_str(self.price),
        )
    }
}

/// Market data update kinds published to all participants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateKind {
    #[default]
    Invalid = 0,
    Clear = 1,
    Add = 2,
    Modify = 3,
    Cancel = 4,
    Trade = 5,
    SnapshotStart = 6,
    SnapshotEnd = 7,
}

impl UpdateKind {
    #[inline]
    const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(UpdateKind::Invalid),
            1 => Some(UpdateKind::Clear),
            2 => Some(UpdateKind::Add),
            3 => Some(UpdateKind::Modify),
            4 => Some(UpdateKind::Cancel),
            5 => Some(UpdateKind::Trade),
            6 => Some(UpdateKind::SnapshotStart),
            7 => Some(UpdateKind::SnapshotEnd),
            _ => None,
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateKind::Clear => "CLEAR",
            UpdateKind::Add => "ADD",
            UpdateKind::Modify => "MODIFY",
            UpdateKind::Cancel => "CANCEL",
            UpdateKind::Trade => "TRADE",
            UpdateKind::SnapshotStart => "SNAPSHOT_START",
            UpdateKind::SnapshotEnd => "SNAPSHOT_END",
            UpdateKind::Invalid => "INVALID",
        })
    }
}

/// One delta in the public market data stream.
///
/// `order_id` carries the market order id for book deltas; for the
/// snapshot sentinels it carries the incremental-stream anchor instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarketUpdate {
    pub kind: UpdateKind,
    pub order_id: OrderId,
    pub ticker_id: TickerId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
}

impl Default for MarketUpdate {
    fn default() -> Self {
        Self {
            kind: UpdateKind::Invalid,
            order_id: ORDER_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
            priority: PRIORITY_INVALID,
        }
    }
}

impl MarketUpdate {
    pub const WIRE_SIZE: usize = 34;

    /// Snapshot sentinel records carry only a kind and the anchor id.
    pub fn sentinel(kind: UpdateKind, anchor: OrderId) -> Self {
        Self {
            kind,
            order_id: anchor,
            ..Default::default()
        }
    }

    pub fn encode(&self, out: &mut [u8]) {
        out[0] = self.kind as u8;
        out[1..9].copy_from_slice(&self.order_id.to_le_bytes());
        out[9..13].copy_from_slice(&self.ticker_id.to_le_bytes());
        out[13] = self.side.as_i8() as u8;
        out[14..22].copy_from_slice(&self.price.to_le_bytes());
        out[22..26].copy_from_slice(&self.qty.to_le_bytes());
        out[26..34].copy_from_slice(&self.priority.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            kind: UpdateKind::from_u8(buf[0])?,
            order_id: u64::from_le_bytes(buf[1..9].try_into().unwrap()),
            ticker_id: u32::from_le_bytes(buf[9..13].try_into().unwrap()),
            side: Side::from_i8(buf[13] as i8)?,
            price: i64::from_le_bytes(buf[14..22].try_into().unwrap()),
            qty: u32::from_le_bytes(buf[22..26].try_into().unwrap()),
            priority: u64::from_le_bytes(buf[26..34].try_into().unwrap()),
        })
    }
}

impl fmt::Display for MarketUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<MarketUpdate> [type: {}, ticker: {}, oid: {}, side: {}, qty: {}, price: {}, priority: {}]",
            self.kind,
            ticker_id_str(self.ticker_id),
            order_id_str(self.order_id),
            self.side,
            qty_str(self.qty),
            price_str(self.price),
            priority_str(self.priority),
        )
    }
}

pub const SEQ_PREFIX_SIZE: usize = 8;

/// `u64 n_seq || ClientRequest` as framed on the gateway TCP stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeqClientRequest {
    pub n_seq: u64,
    pub request: ClientRequest,
}

impl SeqClientRequest {
    pub const WIRE_SIZE: usize = SEQ_PREFIX_SIZE + ClientRequest::WIRE_SIZE;

    pub fn encode(&self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.n_seq.to_le_bytes());
        self.request.encode(&mut out[8..]);
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            n_seq: u64::from_le_bytes(buf[..8].try_into().unwrap()),
            request: ClientRequest::decode(&buf[8..])?,
        })
    }
}

/// `u64 n_seq || ClientResponse` as framed on the gateway TCP stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeqClientResponse {
    pub n_seq: u64,
    pub response: ClientResponse,
}

impl SeqClientResponse {
    pub const WIRE_SIZE: usize = SEQ_PREFIX_SIZE + ClientResponse::WIRE_SIZE;

    pub fn encode(&self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.n_seq.to_le_bytes());
        self.response.encode(&mut out[8..]);
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            n_seq: u64::from_le_bytes(buf[..8].try_into().unwrap()),
            response: ClientResponse::decode(&buf[8..])?,
        })
    }
}

/// `u64 n_seq || MarketUpdate` as carried in one multicast datagram.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeqMarketUpdate {
    pub n_seq: u64,
    pub update: MarketUpdate,
}

impl SeqMarketUpdate {
    pub const WIRE_SIZE: usize = SEQ_PREFIX_SIZE + MarketUpdate::WIRE_SIZE;

    pub fn encode(&self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.n_seq.to_le_bytes());
        self.update.encode(&mut out[8..]);
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            n_seq: u64::from_le_bytes(buf[..8].try_into().unwrap()),
            update: MarketUpdate::decode(&buf[8..])?,
        })
    }
}

impl fmt::Display for SeqMarketUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[n: {} {}]", self.n_seq, self.update)
    }
}
