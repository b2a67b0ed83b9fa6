// src/types.rs
//! Identifiers and constants shared by the exchange and client sides.
//!
//! Every id type reserves its maximum value as the "invalid" sentinel so
//! that wire records can be default-initialized to an unambiguous state.

use std::fmt;

pub type OrderId = u64;
pub type TickerId = u32;
pub type ClientId = u32;
pub type Priority = u64;
pub type Qty = u32;
/// Price in ticks. Signed so spreads and signed edge math stay branch-free.
pub type Price = i64;

pub const ORDER_ID_INVALID: OrderId = OrderId::MAX;
pub const TICKER_ID_INVALID: TickerId = TickerId::MAX;
pub const CLIENT_ID_INVALID: ClientId = ClientId::MAX;
pub const PRIORITY_INVALID: Priority = Priority::MAX;
pub const QTY_INVALID: Qty = Qty::MAX;
pub const PRICE_INVALID: Price = Price::MAX;

/// Render an id, printing `INVALID` for the reserved sentinel.
pub struct IdDisplay<T>(pub T, pub T);

impl<T: PartialEq + fmt::Display> fmt::Display for IdDisplay<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == self.1 {
            write!(f, "INVALID")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[inline]
pub fn order_id_str(id: OrderId) -> IdDisplay<OrderId> {
    IdDisplay(id, ORDER_ID_INVALID)
}
#[inline]
pub fn ticker_id_str(id: TickerId) -> IdDisplay<TickerId> {
    IdDisplay(id, TICKER_ID_INVALID)
}
#[inline]
pub fn client_id_str(id: ClientId) -> IdDisplay<ClientId> {
    IdDisplay(id, CLIENT_ID_INVALID)
}
#[inline]
pub fn priority_str(p: Priority) -> IdDisplay<Priority> {
    IdDisplay(p, PRIORITY_INVALID)
}
#[inline]
pub fn qty_str(q: Qty) -> IdDisplay<Qty> {
    IdDisplay(q, QTY_INVALID)
}
#[inline]
pub fn price_str(p: Price) -> IdDisplay<Price> {
    IdDisplay(p, PRICE_INVALID)
}

/// Which side of the market an order rests on. The wire encoding is a
/// single signed byte: +1 buy, -1 sell, 0 invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Side {
    Invalid = 0,
    Buy = 1,
    Sell = -1,
}

impl Side {
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
            Side::Invalid => Side::Invalid,
        }
    }

    #[inline]
    pub const fn as_i8(self) -> i8 {
        self as i8
    }

    #[inline]
    pub const fn from_i8(v: i8) -> Option<Self> {
        match v {
            1 => Some(Side::Buy),
            -1 => Some(Side::Sell),
            0 => Some(Side::Invalid),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
            Side::Invalid => "INVALID",
        })
    }
}

/// Fixed system limits. These size pools and queues once at construction;
/// nothing resizes afterwards. Constructors take explicit capacities so
/// tests can run with far smaller footprints.
pub mod limits {
    /// Trading instruments supported.
    pub const MAX_TICKERS: usize = 8;
    /// Market participants.
    pub const MAX_N_CLIENTS: usize = 256;
    /// Live orders for a single instrument (book node pool capacity).
    pub const MAX_ORDER_IDS: usize = 1 << 20;
    /// Depth of distinct price levels in one book.
    pub const MAX_PRICE_LEVELS: usize = 256;
    /// Matching requests and responses queued at once.
    pub const MAX_CLIENT_UPDATES: usize = 256 * 1024;
    /// Market updates queued to the publisher at once.
    pub const MAX_MARKET_UPDATES: usize = 256 * 1024;
    /// Pending requests on the order gateway within one poll batch.
    pub const MAX_PENDING_ORDER_REQUESTS: usize = 1024;
}
